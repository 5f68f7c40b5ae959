//! Rules gate and admission pipeline end-to-end.

mod common;

use common::{RecordingTransport, harness, snapshot};
use interchatd::db::AntiSwearAction;
use interchatd::interactions::InteractionContext;
use interchatd::processor::ProcessOutcome;

#[tokio::test]
async fn rules_prompt_once_then_admit_after_acceptance() {
    let h = harness().await;
    let (hub, _) = h
        .hub_with_connections("Art", &[("art-1", "s-1"), ("art-2", "s-2")])
        .await;
    h.runtime
        .store
        .set_hub_rules(&hub.id, &["Be kind".to_string()])
        .await
        .unwrap();

    // First message: no broadcast, one prompt.
    let outcome = h
        .runtime
        .processor
        .handle_event(snapshot("art-1", "s-1", "u-1", "hi"))
        .await;
    assert_eq!(outcome, ProcessOutcome::Unhandled);
    assert!(h.transport.sent.lock().unwrap().is_empty());
    let prompts = h.transport.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].1.contains("Be kind"));

    // Hammering the channel inside the cooldown never re-prompts.
    for _ in 0..5 {
        let outcome = h
            .runtime
            .processor
            .handle_event(snapshot("art-1", "s-1", "u-1", "hello?"))
            .await;
        assert_eq!(outcome, ProcessOutcome::Unhandled);
    }
    assert_eq!(h.transport.prompts.lock().unwrap().len(), 1);

    // The user clicks the accept button carried by the prompt token.
    let token = prompts[0].3.clone();
    let consumed = h
        .runtime
        .interactions
        .dispatch(
            &token,
            &InteractionContext {
                user_id: "u-1".into(),
                channel_id: "art-1".into(),
            },
        )
        .await
        .unwrap();
    assert!(consumed);

    // Next message broadcasts.
    let outcome = h
        .runtime
        .processor
        .handle_event(snapshot("art-1", "s-1", "u-1", "hello again"))
        .await;
    assert!(matches!(outcome, ProcessOutcome::HandledHub { .. }));
    assert_eq!(
        h.transport
            .sent_to(&RecordingTransport::webhook_url("art-2"))
            .len(),
        1
    );
}

#[tokio::test]
async fn someone_elses_click_does_not_accept_for_the_prompted_user() {
    let h = harness().await;
    let (hub, _) = h
        .hub_with_connections("Strict", &[("st-1", "s-1"), ("st-2", "s-2")])
        .await;
    h.runtime
        .store
        .set_hub_rules(&hub.id, &["No impersonation".to_string()])
        .await
        .unwrap();

    h.runtime
        .processor
        .handle_event(snapshot("st-1", "s-1", "u-1", "hi"))
        .await;
    let token = h.transport.prompts.lock().unwrap()[0].3.clone();

    h.runtime
        .interactions
        .dispatch(
            &token,
            &InteractionContext {
                user_id: "u-intruder".into(),
                channel_id: "st-1".into(),
            },
        )
        .await
        .unwrap();

    assert!(
        !h.db().hubs().find_acceptance("u-1", &hub.id).await.unwrap(),
        "acceptance must not be created by another user's click"
    );
}

#[tokio::test]
async fn hub_without_rules_needs_no_acceptance() {
    let h = harness().await;
    h.hub_with_connections("Open", &[("op-1", "s-1"), ("op-2", "s-2")])
        .await;

    let outcome = h
        .runtime
        .processor
        .handle_event(snapshot("op-1", "s-1", "u-9", "straight through"))
        .await;
    assert!(matches!(outcome, ProcessOutcome::HandledHub { .. }));
    assert!(h.transport.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn antiswear_blocks_without_broadcast_and_notifies_once() {
    let h = harness().await;
    let (hub, _) = h
        .hub_with_connections("Gaming", &[("gm-1", "s-1"), ("gm-2", "s-2")])
        .await;
    h.db()
        .hubs()
        .add_antiswear(&hub.id, "zorkle", AntiSwearAction::Block, None)
        .await
        .unwrap();

    let first = snapshot("gm-1", "s-1", "u-1", "ban this zorkle");
    assert_eq!(
        h.runtime.processor.handle_event(first.clone()).await,
        ProcessOutcome::Unhandled
    );

    // No webhook calls, no record.
    assert!(h.transport.sent.lock().unwrap().is_empty());
    assert!(
        h.runtime
            .broadcast
            .ledger()
            .find_by_source(&first.message_id)
            .await
            .unwrap()
            .is_none()
    );

    // One author-facing notice; a second offense inside the window stays
    // silent.
    assert_eq!(h.transport.notices_to("gm-1").len(), 1);
    h.runtime
        .processor
        .handle_event(snapshot("gm-1", "s-1", "u-1", "zorkle again"))
        .await;
    assert_eq!(h.transport.notices_to("gm-1").len(), 1);
}

#[tokio::test]
async fn antiswear_replace_rewrites_the_relayed_text() {
    let h = harness().await;
    let (hub, _) = h
        .hub_with_connections("Polite", &[("po-1", "s-1"), ("po-2", "s-2")])
        .await;
    h.db()
        .hubs()
        .add_antiswear(&hub.id, "heck", AntiSwearAction::Replace, Some("h*ck"))
        .await
        .unwrap();

    let outcome = h
        .runtime
        .processor
        .handle_event(snapshot("po-1", "s-1", "u-1", "what the heck"))
        .await;
    assert!(matches!(outcome, ProcessOutcome::HandledHub { .. }));

    let sent = h.transport.sent_to(&RecordingTransport::webhook_url("po-2"));
    assert_eq!(
        sent[0].payload.embed.as_ref().unwrap().description,
        "what the h*ck"
    );
}

#[tokio::test]
async fn content_filter_blocks_scams() {
    let h = harness().await;
    h.hub_with_connections("Filtered", &[("fi-1", "s-1"), ("fi-2", "s-2")])
        .await;

    let outcome = h
        .runtime
        .processor
        .handle_event(snapshot("fi-1", "s-1", "u-1", "click here for FREE NITRO"))
        .await;
    assert_eq!(outcome, ProcessOutcome::Unhandled);
    assert!(h.transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn spam_budget_drops_excess_messages_silently() {
    let mut config = common::test_config();
    config.spam.max_messages = 2;
    let h = common::harness_with(config).await;
    h.hub_with_connections("Busy", &[("bu-1", "s-1"), ("bu-2", "s-2")])
        .await;

    for _ in 0..2 {
        let outcome = h
            .runtime
            .processor
            .handle_event(snapshot("bu-1", "s-1", "u-1", "chatter"))
            .await;
        assert!(matches!(outcome, ProcessOutcome::HandledHub { .. }));
    }

    let outcome = h
        .runtime
        .processor
        .handle_event(snapshot("bu-1", "s-1", "u-1", "chatter"))
        .await;
    assert_eq!(outcome, ProcessOutcome::Unhandled);
    assert_eq!(
        h.transport
            .sent_to(&RecordingTransport::webhook_url("bu-2"))
            .len(),
        2
    );
    // Spam denials are silent.
    assert!(h.transport.notices_to("bu-1").is_empty());
}
