//! Ban state machine and report workflow end-to-end.

mod common;

use common::{harness, snapshot};
use interchatd::calls::matchmaker::InitiateOutcome;
use interchatd::db::{BanKind, BanScope, BanStatus};
use interchatd::error::{BanError, ReportError};
use interchatd::moderation::{BanTarget, ReportStatus};
use interchatd::processor::ProcessOutcome;
use std::time::Duration;

#[tokio::test]
async fn ban_lifecycle_enforces_the_state_machine() {
    let h = harness().await;
    let moderation = &h.runtime.moderation;

    let ban = moderation
        .create_ban(
            BanScope::User,
            "u-bad",
            "staff-1",
            "spam",
            BanKind::Permanent,
            None,
        )
        .await
        .unwrap();
    assert_eq!(ban.status, BanStatus::Active);

    // A second create while ACTIVE is refused, not upserted.
    let err = moderation
        .create_ban(
            BanScope::User,
            "u-bad",
            "staff-1",
            "again",
            BanKind::Permanent,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BanError::AlreadyBanned));

    moderation
        .revoke_ban(BanScope::User, "u-bad", "staff-1")
        .await
        .unwrap();

    // REVOKED is terminal; a second revoke has nothing to act on.
    let err = moderation
        .revoke_ban(BanScope::User, "u-bad", "staff-1")
        .await
        .unwrap_err();
    assert!(matches!(err, BanError::NotRevokable));

    // The subject can be banned afresh afterwards.
    moderation
        .create_ban(
            BanScope::User,
            "u-bad",
            "staff-1",
            "relapse",
            BanKind::Temporary,
            Some(Duration::from_secs(3600)),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn temporary_ban_without_duration_is_rejected() {
    let h = harness().await;
    let err = h
        .runtime
        .moderation
        .create_ban(
            BanScope::User,
            "u-t",
            "staff-1",
            "oops",
            BanKind::Temporary,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BanError::MissingDuration));
}

#[tokio::test]
async fn expired_temporary_ban_reads_as_absent_and_is_rewritten() {
    let h = harness().await;
    let moderation = &h.runtime.moderation;

    // A ban that expires immediately.
    moderation
        .create_ban(
            BanScope::User,
            "u-brief",
            "staff-1",
            "cooling off",
            BanKind::Temporary,
            Some(Duration::ZERO),
        )
        .await
        .unwrap();

    // Admission-style read sees no active ban.
    assert!(
        h.runtime
            .store
            .find_active_ban("u-brief")
            .await
            .unwrap()
            .is_none()
    );

    // The sweeper rewrites the stored row.
    let rewritten = moderation.expire_due_bans().await.unwrap();
    assert!(rewritten >= 1);
    let history = h
        .db()
        .bans()
        .history(BanScope::User, "u-brief")
        .await
        .unwrap();
    assert_eq!(history[0].status, BanStatus::Expired);

    // A fresh ban is possible right away.
    moderation
        .create_ban(
            BanScope::User,
            "u-brief",
            "staff-1",
            "again",
            BanKind::Permanent,
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn banned_users_and_servers_fail_admission() {
    let h = harness().await;
    h.hub_with_connections("Guarded", &[("gd-1", "s-1"), ("gd-2", "s-2")])
        .await;

    h.runtime
        .moderation
        .create_ban(
            BanScope::User,
            "u-banned",
            "staff-1",
            "spam",
            BanKind::Permanent,
            None,
        )
        .await
        .unwrap();
    let outcome = h
        .runtime
        .processor
        .handle_event(snapshot("gd-1", "s-1", "u-banned", "let me in"))
        .await;
    assert_eq!(outcome, ProcessOutcome::Unhandled);

    h.runtime
        .moderation
        .create_ban(
            BanScope::Server,
            "s-1",
            "staff-1",
            "raid source",
            BanKind::Permanent,
            None,
        )
        .await
        .unwrap();
    let outcome = h
        .runtime
        .processor
        .handle_event(snapshot("gd-1", "s-1", "u-fine", "hello"))
        .await;
    assert_eq!(outcome, ProcessOutcome::Unhandled);
    assert!(h.transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn report_then_staff_ban_resolves_and_blocks_at_admission() {
    let h = harness().await;

    // Establish and end a call so a retained record exists.
    h.runtime.matchmaker.initiate("md-a", "srv-a", "u-a").await.unwrap();
    let InitiateOutcome::Connected { call_id } =
        h.runtime.matchmaker.initiate("md-b", "srv-b", "u-b").await.unwrap()
    else {
        panic!("expected pairing");
    };
    h.runtime
        .processor
        .handle_event(snapshot("md-a", "srv-a", "u-a", "nasty stuff"))
        .await;
    h.runtime.matchmaker.hangup("md-b", "u-b").await.unwrap();

    let report = h
        .runtime
        .moderation
        .file_report(&call_id, "u-b", "spam")
        .await
        .unwrap();
    assert_eq!(report.status, ReportStatus::Open);

    let result = h
        .runtime
        .moderation
        .ban_from_call(
            &call_id,
            "staff-1",
            &[
                BanTarget::User("u-a".to_string()),
                BanTarget::User("u-a2".to_string()),
            ],
            BanKind::Permanent,
            None,
            "reported in call",
        )
        .await
        .unwrap();
    assert_eq!(result.banned, vec!["u-a", "u-a2"]);
    assert!(result.failed.is_empty());

    let resolved = h
        .runtime
        .moderation
        .find_report(&call_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.status, ReportStatus::ResolvedBanned);
    assert_eq!(resolved.banned_subjects, vec!["u-a", "u-a2"]);
    assert_eq!(resolved.resolved_by.as_deref(), Some("staff-1"));

    // The banned user is rejected in any hub from now on.
    h.hub_with_connections("Anywhere", &[("aw-1", "s-9"), ("aw-2", "s-8")])
        .await;
    let outcome = h
        .runtime
        .processor
        .handle_event(snapshot("aw-1", "s-9", "u-a", "back again"))
        .await;
    assert_eq!(outcome, ProcessOutcome::Unhandled);
}

#[tokio::test]
async fn partial_failures_do_not_roll_back_earlier_bans() {
    let h = harness().await;

    h.runtime.matchmaker.initiate("pf-a", "srv-a", "u-a").await.unwrap();
    let InitiateOutcome::Connected { call_id } =
        h.runtime.matchmaker.initiate("pf-b", "srv-b", "u-b").await.unwrap()
    else {
        panic!("expected pairing");
    };

    // One target is already banned.
    h.runtime
        .moderation
        .create_ban(
            BanScope::User,
            "u-already",
            "staff-1",
            "old case",
            BanKind::Permanent,
            None,
        )
        .await
        .unwrap();

    let result = h
        .runtime
        .moderation
        .ban_from_call(
            &call_id,
            "staff-1",
            &[
                BanTarget::User("u-new".to_string()),
                BanTarget::User("u-already".to_string()),
            ],
            BanKind::Permanent,
            None,
            "sweep",
        )
        .await
        .unwrap();

    assert_eq!(result.banned, vec!["u-new"]);
    assert_eq!(result.failed.len(), 1);
    assert!(
        h.runtime
            .store
            .find_active_ban("u-new")
            .await
            .unwrap()
            .is_some(),
        "the successful ban stands despite the failure"
    );
}

#[tokio::test]
async fn hub_blacklist_excludes_a_user_from_that_hub_only() {
    let h = harness().await;
    let (hub, _) = h
        .hub_with_connections("Walled", &[("wl-1", "s-1"), ("wl-2", "s-2")])
        .await;
    h.hub_with_connections("Open2", &[("op2-1", "s-1"), ("op2-2", "s-2")])
        .await;

    h.db()
        .infractions()
        .create(&interchatd::db::InfractionRecord {
            id: "inf-1".to_string(),
            hub_id: hub.id.clone(),
            scope: BanScope::User,
            subject_id: "u-listed".to_string(),
            moderator_user_id: "staff-1".to_string(),
            reason: "trouble".to_string(),
            created_at: 0,
            expires_at: None,
        })
        .await
        .unwrap();

    // Blocked in the blacklisting hub.
    let outcome = h
        .runtime
        .processor
        .handle_event(snapshot("wl-1", "s-1", "u-listed", "hi"))
        .await;
    assert_eq!(outcome, ProcessOutcome::Unhandled);

    // The infraction is hub-scoped, not global.
    let outcome = h
        .runtime
        .processor
        .handle_event(snapshot("op2-1", "s-1", "u-listed", "hi"))
        .await;
    assert!(matches!(outcome, ProcessOutcome::HandledHub { .. }));

    // Lifting the entry readmits.
    h.db()
        .infractions()
        .revoke(&hub.id, BanScope::User, "u-listed")
        .await
        .unwrap();
    let outcome = h
        .runtime
        .processor
        .handle_event(snapshot("wl-1", "s-1", "u-listed", "hi again"))
        .await;
    assert!(matches!(outcome, ProcessOutcome::HandledHub { .. }));
}

#[tokio::test]
async fn reports_require_a_retained_call_and_staff_access() {
    let h = harness().await;

    let err = h
        .runtime
        .moderation
        .file_report("no-such-call", "u-1", "spam")
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::CallNotFound));

    h.runtime.matchmaker.initiate("ac-a", "srv-a", "u-a").await.unwrap();
    let InitiateOutcome::Connected { call_id } =
        h.runtime.matchmaker.initiate("ac-b", "srv-b", "u-b").await.unwrap()
    else {
        panic!("expected pairing");
    };
    h.runtime
        .moderation
        .file_report(&call_id, "u-b", "abuse")
        .await
        .unwrap();

    let err = h
        .runtime
        .moderation
        .ban_from_call(
            &call_id,
            "u-random",
            &[BanTarget::User("u-a".to_string())],
            BanKind::Permanent,
            None,
            "nope",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::NotAuthorized));

    let err = h
        .runtime
        .moderation
        .dismiss_report(&call_id, "u-random")
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::NotAuthorized));

    let dismissed = h
        .runtime
        .moderation
        .dismiss_report(&call_id, "staff-1")
        .await
        .unwrap();
    assert_eq!(dismissed.status, ReportStatus::Dismissed);

    // A dismissed report cannot be dismissed again.
    let err = h
        .runtime
        .moderation
        .dismiss_report(&call_id, "staff-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::AlreadyResolved));
}
