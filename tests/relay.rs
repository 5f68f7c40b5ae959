//! Hub relay end-to-end: fan-out, identity records, edit/delete
//! propagation, failure handling, cache coherence.

mod common;

use common::{InjectedFailure, RecordingTransport, harness, snapshot};
use interchatd::processor::ProcessOutcome;
use interchatd::transport::MessageSnapshot;

async fn settle() {
    // Let fire-and-forget sinks land.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
}

#[tokio::test]
async fn relays_to_every_sibling_but_not_the_source() {
    let h = harness().await;
    h.hub_with_connections("Gaming", &[("ch-1", "s-1"), ("ch-2", "s-2")])
        .await;

    let msg = snapshot("ch-1", "s-1", "u-1", "hello");
    let outcome = h.runtime.processor.handle_event(msg.clone()).await;
    assert!(matches!(outcome, ProcessOutcome::HandledHub { .. }));

    let to_sibling = h.transport.sent_to(&RecordingTransport::webhook_url("ch-2"));
    assert_eq!(to_sibling.len(), 1);
    assert_eq!(to_sibling[0].payload.username, "name-u-1");
    assert_eq!(
        to_sibling[0].payload.embed.as_ref().unwrap().description,
        "hello"
    );
    assert!(
        h.transport
            .sent_to(&RecordingTransport::webhook_url("ch-1"))
            .is_empty(),
        "source channel must not receive its own message"
    );

    let record = h
        .runtime
        .broadcast
        .ledger()
        .find_by_source(&msg.message_id)
        .await
        .unwrap()
        .expect("record persisted");
    assert_eq!(record.broadcasts.len(), 1);
    assert!(record.broadcasts.contains_key("ch-2"));
    assert_eq!(record.author_user_id, "u-1");

    settle().await;
    use interchatd::kv::KvStore;
    assert_eq!(
        h.kv.get("leaderboard:user:u-1").await.unwrap().as_deref(),
        Some("1")
    );
    assert_eq!(
        h.kv.get("leaderboard:server:s-1").await.unwrap().as_deref(),
        Some("1")
    );
}

#[tokio::test]
async fn same_source_messages_arrive_in_order() {
    let h = harness().await;
    h.hub_with_connections("Ordered", &[("ord-1", "s-1"), ("ord-2", "s-2")])
        .await;

    for text in ["first", "second", "third"] {
        let outcome = h
            .runtime
            .processor
            .handle_event(snapshot("ord-1", "s-1", "u-1", text))
            .await;
        assert!(matches!(outcome, ProcessOutcome::HandledHub { .. }));
    }

    let delivered: Vec<String> = h
        .transport
        .sent_to(&RecordingTransport::webhook_url("ord-2"))
        .iter()
        .map(|s| s.payload.embed.as_ref().unwrap().description.clone())
        .collect();
    assert_eq!(delivered, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn zero_siblings_records_an_empty_fanout() {
    let h = harness().await;
    h.hub_with_connections("Lonely", &[("solo-1", "s-1")]).await;

    let msg = snapshot("solo-1", "s-1", "u-1", "anyone here");
    h.runtime.processor.handle_event(msg.clone()).await;

    assert!(h.transport.sent.lock().unwrap().is_empty());
    let record = h
        .runtime
        .broadcast
        .ledger()
        .find_by_source(&msg.message_id)
        .await
        .unwrap()
        .expect("record persisted even with no siblings");
    assert!(record.broadcasts.is_empty());
}

#[tokio::test]
async fn gone_webhook_clears_url_and_other_siblings_still_receive() {
    let h = harness().await;
    h.hub_with_connections(
        "Resilient",
        &[("res-1", "s-1"), ("res-2", "s-2"), ("res-3", "s-3")],
    )
    .await;

    h.transport
        .fail_url(&RecordingTransport::webhook_url("res-2"), InjectedFailure::Gone);

    let msg = snapshot("res-1", "s-1", "u-1", "still here");
    h.runtime.processor.handle_event(msg.clone()).await;

    // The healthy sibling was delivered.
    assert_eq!(
        h.transport
            .sent_to(&RecordingTransport::webhook_url("res-3"))
            .len(),
        1
    );

    // The gone sibling lost its stored URL for re-provisioning.
    let broken = h
        .db()
        .connections()
        .find_by_channel("res-2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(broken.webhook_url, "");

    // And the record only names the sibling that succeeded.
    let record = h
        .runtime
        .broadcast
        .ledger()
        .find_by_source(&msg.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.broadcasts.len(), 1);
    assert!(record.broadcasts.contains_key("res-3"));
}

#[tokio::test]
async fn unhealthy_sibling_is_skipped_until_a_probe_revives_it() {
    let mut config = common::test_config();
    config.relay.fanout_max_retries = 0;
    config.relay.unhealthy_after_failures = 2;
    let h = common::harness_with(config).await;
    h.hub_with_connections(
        "Flaky",
        &[("fk-1", "s-1"), ("fk-2", "s-2"), ("fk-3", "s-3")],
    )
    .await;

    let bad = RecordingTransport::webhook_url("fk-2");
    h.transport.fail_url(&bad, InjectedFailure::Server);

    // Two failing deliveries cross the unhealthy threshold.
    for text in ["one", "two"] {
        h.runtime
            .processor
            .handle_event(snapshot("fk-1", "s-1", "u-1", text))
            .await;
    }
    assert_eq!(h.transport.attempts_to(&bad), 2);

    // The next fan-out never dials the unhealthy sibling; the healthy one
    // still receives and the record omits the skipped channel.
    let msg = snapshot("fk-1", "s-1", "u-1", "three");
    h.runtime.processor.handle_event(msg.clone()).await;
    assert_eq!(h.transport.attempts_to(&bad), 2, "no dial while unhealthy");
    let record = h
        .runtime
        .broadcast
        .ledger()
        .find_by_source(&msg.message_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!record.broadcasts.contains_key("fk-2"));
    assert!(record.broadcasts.contains_key("fk-3"));

    // A successful probe revives the sibling; delivery resumes.
    h.transport.clear_failures();
    h.runtime.broadcast.probe_unhealthy().await.unwrap();
    h.runtime
        .processor
        .handle_event(snapshot("fk-1", "s-1", "u-1", "four"))
        .await;
    assert_eq!(h.transport.attempts_to(&bad), 3);
    assert_eq!(h.transport.sent_to(&bad).len(), 1);
}

#[tokio::test]
async fn record_resolves_from_any_participating_id() {
    let h = harness().await;
    h.hub_with_connections("Lookup", &[("lk-1", "s-1"), ("lk-2", "s-2")])
        .await;

    let msg = snapshot("lk-1", "s-1", "u-1", "find me");
    h.runtime.processor.handle_event(msg.clone()).await;

    let ledger = h.runtime.broadcast.ledger();
    let by_source = ledger.find_by_source(&msg.message_id).await.unwrap().unwrap();
    let sibling_id = by_source.broadcasts.get("lk-2").unwrap();
    let by_sibling = ledger.find_by_any(sibling_id).await.unwrap().unwrap();
    assert_eq!(by_sibling, by_source);
}

#[tokio::test]
async fn edits_propagate_to_stored_sibling_messages() {
    let h = harness().await;
    h.hub_with_connections("Editable", &[("ed-1", "s-1"), ("ed-2", "s-2")])
        .await;

    let msg = snapshot("ed-1", "s-1", "u-1", "hello");
    h.runtime.processor.handle_event(msg.clone()).await;
    let record = h
        .runtime
        .broadcast
        .ledger()
        .find_by_source(&msg.message_id)
        .await
        .unwrap()
        .unwrap();
    let sibling_id = record.broadcasts.get("ed-2").unwrap().clone();

    let edited = MessageSnapshot {
        content: "hello!!".to_string(),
        ..msg.clone()
    };
    let outcome = h.runtime.processor.on_message_edit(&edited).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::HandledHub { .. }));

    let edits = h.transport.edits.lock().unwrap().clone();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].0, RecordingTransport::webhook_url("ed-2"));
    assert_eq!(edits[0].1, sibling_id);
    assert_eq!(edits[0].2.embed.as_ref().unwrap().description, "hello!!");

    // The identity record is untouched by edits.
    let after = h
        .runtime
        .broadcast
        .ledger()
        .find_by_source(&msg.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after, record);
}

#[tokio::test]
async fn deleting_any_mirror_cascades_to_the_others() {
    let h = harness().await;
    h.hub_with_connections(
        "Deletable",
        &[("del-1", "s-1"), ("del-2", "s-2"), ("del-3", "s-3")],
    )
    .await;

    let msg = snapshot("del-1", "s-1", "u-1", "remove me");
    h.runtime.processor.handle_event(msg.clone()).await;
    let record = h
        .runtime
        .broadcast
        .ledger()
        .find_by_source(&msg.message_id)
        .await
        .unwrap()
        .unwrap();

    // Trigger from a sibling mirror, not the source.
    let trigger = record.broadcasts.get("del-2").unwrap().clone();
    h.runtime.processor.on_message_delete(&trigger).await.unwrap();

    let deletes = h.transport.deletes.lock().unwrap().clone();
    assert_eq!(deletes.len(), 1, "only the other mirror is deleted");
    assert_eq!(deletes[0].0, RecordingTransport::webhook_url("del-3"));
    assert_eq!(&deletes[0].1, record.broadcasts.get("del-3").unwrap());
}

#[tokio::test]
async fn aged_out_records_make_edit_and_delete_noops() {
    let h = harness().await;
    h.hub_with_connections("Aged", &[("ag-1", "s-1"), ("ag-2", "s-2")])
        .await;

    let msg = snapshot("ag-1", "s-1", "u-1", "was never recorded");
    let outcome = h.runtime.processor.on_message_edit(&msg).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Unhandled);
    let outcome = h.runtime.processor.on_message_delete("unknown-id").await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Unhandled);
    assert!(h.transport.edits.lock().unwrap().is_empty());
    assert!(h.transport.deletes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn disconnecting_a_channel_is_visible_immediately() {
    let h = harness().await;
    h.hub_with_connections("Coherent", &[("co-1", "s-1"), ("co-2", "s-2")])
        .await;

    // Warm the cache.
    assert!(h.runtime.store.resolve_channel("co-1").await.unwrap().is_some());

    h.runtime.hubs.leave_hub("co-1").await.unwrap();

    // No TTL wait: the mutation invalidated both tiers.
    assert!(h.runtime.store.resolve_channel("co-1").await.unwrap().is_none());
    let outcome = h
        .runtime
        .processor
        .handle_event(snapshot("co-1", "s-1", "u-1", "ghost"))
        .await;
    assert_eq!(outcome, ProcessOutcome::Unhandled);
    assert!(h.transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn sibling_roster_updates_after_join() {
    let h = harness().await;
    h.hub_with_connections("Growing", &[("gr-1", "s-1"), ("gr-2", "s-2")])
        .await;

    // Warm the hub cache, then join a third channel.
    h.runtime.processor.handle_event(snapshot("gr-1", "s-1", "u-1", "one")).await;
    h.runtime.hubs.join_hub("Growing", "gr-3", "s-3").await.unwrap();

    h.runtime.processor.handle_event(snapshot("gr-1", "s-1", "u-1", "two")).await;
    let to_new = h.transport.sent_to(&RecordingTransport::webhook_url("gr-3"));
    assert_eq!(to_new.len(), 1, "new sibling sees messages sent after joining");
}

#[tokio::test]
async fn bots_and_empty_messages_are_unhandled() {
    let h = harness().await;
    h.hub_with_connections("Quiet", &[("qt-1", "s-1"), ("qt-2", "s-2")])
        .await;

    let mut from_bot = snapshot("qt-1", "s-1", "u-bot", "beep");
    from_bot.author.is_bot = true;
    assert_eq!(
        h.runtime.processor.handle_event(from_bot).await,
        ProcessOutcome::Unhandled
    );

    let empty = snapshot("qt-1", "s-1", "u-1", "   ");
    assert_eq!(
        h.runtime.processor.handle_event(empty).await,
        ProcessOutcome::Unhandled
    );
    assert!(h.transport.sent.lock().unwrap().is_empty());
}
