//! Message processor: the hot-path entry point.
//!
//! Every inbound chat event lands here. The processor classifies the
//! channel (hub connection, call session, neither), runs the rules gate and
//! admission pipeline, and hands admitted messages to the broadcast service
//! or the call relay. Unexpected errors are logged and swallowed at the top
//! so a poison message can never take the runtime down.

use crate::admission::{Admission, AdmissionPipeline, DenyReason};
use crate::broadcast::BroadcastService;
use crate::calls::session::CallSessionManager;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::rules::{RulesGate, RulesGateOutcome};
use crate::stats::StatsSink;
use crate::store::EntityStore;
use crate::transport::{ChatTransport, MessageSnapshot};
use crate::webhooks::WebhookProvisioner;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// What the processor did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Relayed into a hub.
    HandledHub { hub_id: String },
    /// Consumed by an active call.
    HandledCall,
    /// Not ours: no connection, no call, a bot, or empty.
    Unhandled,
}

/// Top-level classifier and orchestrator.
pub struct MessageProcessor {
    store: EntityStore,
    rules: Arc<RulesGate>,
    admission: Arc<AdmissionPipeline>,
    broadcast: Arc<BroadcastService>,
    sessions: Arc<CallSessionManager>,
    provisioner: Arc<WebhookProvisioner>,
    stats: StatsSink,
    transport: Arc<dyn ChatTransport>,
    config: RelayConfig,
    /// Last blocked-author notice per user, for the notice cooldown.
    notice_marks: DashMap<String, Instant>,
    /// Rotates through the configured blocked-message responses.
    notice_cursor: AtomicUsize,
}

impl MessageProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: EntityStore,
        rules: Arc<RulesGate>,
        admission: Arc<AdmissionPipeline>,
        broadcast: Arc<BroadcastService>,
        sessions: Arc<CallSessionManager>,
        provisioner: Arc<WebhookProvisioner>,
        stats: StatsSink,
        transport: Arc<dyn ChatTransport>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            rules,
            admission,
            broadcast,
            sessions,
            provisioner,
            stats,
            transport,
            config,
            notice_marks: DashMap::new(),
            notice_cursor: AtomicUsize::new(0),
        }
    }

    /// Task-top entry point: never propagates an error.
    pub async fn handle_event(&self, snapshot: MessageSnapshot) -> ProcessOutcome {
        match self.on_message(&snapshot).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    channel_id = %snapshot.channel_id,
                    message_id = %snapshot.message_id,
                    error = %e,
                    code = e.error_code(),
                    "Message processing failed"
                );
                ProcessOutcome::Unhandled
            }
        }
    }

    /// Classify and process one inbound message.
    pub async fn on_message(
        &self,
        snapshot: &MessageSnapshot,
    ) -> Result<ProcessOutcome, RelayError> {
        if snapshot.author.is_bot || snapshot.is_empty() {
            return Ok(ProcessOutcome::Unhandled);
        }
        crate::metrics::MESSAGES_PROCESSED.inc();

        if let Some(resolved) = self.store.resolve_channel(&snapshot.channel_id).await? {
            return self.on_hub_message(snapshot, resolved).await;
        }

        if self.sessions.on_call_message(snapshot).await? {
            return Ok(ProcessOutcome::HandledCall);
        }

        Ok(ProcessOutcome::Unhandled)
    }

    async fn on_hub_message(
        &self,
        snapshot: &MessageSnapshot,
        resolved: crate::cache::ResolvedChannel,
    ) -> Result<ProcessOutcome, RelayError> {
        let hub = &resolved.hub;

        // A connection without a webhook cannot receive mirrors; provision
        // before relaying so the channel is reachable both ways. A channel
        // that cannot be provisioned is disconnected.
        if resolved.connection.webhook_url.is_empty() {
            match self.provisioner.get_or_create(&snapshot.channel_id).await {
                Ok(url) => {
                    self.store
                        .set_connection_webhook_url(&snapshot.channel_id, &url)
                        .await?;
                }
                Err(e) => {
                    warn!(channel_id = %snapshot.channel_id, error = %e, "Webhook provisioning failed, disconnecting");
                    self.store
                        .set_connection_connected(&snapshot.channel_id, false)
                        .await?;
                    let _ = self
                        .transport
                        .send_notice(
                            &snapshot.channel_id,
                            "This channel was disconnected from its hub: no webhook could \
                             be created. Check the bot's permissions and reconnect.",
                        )
                        .await;
                    return Ok(ProcessOutcome::Unhandled);
                }
            }
        }

        // Lazy user upsert; self-service fields are preserved.
        self.store
            .db()
            .users()
            .upsert(
                &snapshot.author.id,
                &snapshot.author.display_name,
                snapshot.author.avatar_url.as_deref(),
            )
            .await?;

        match self
            .rules
            .gate(&snapshot.author.id, hub, &snapshot.channel_id)
            .await?
        {
            RulesGateOutcome::Admitted => {}
            RulesGateOutcome::DeniedShown | RulesGateOutcome::DeniedCooldown => {
                return Ok(ProcessOutcome::Unhandled);
            }
        }

        let content = match self.admission.check(snapshot, hub).await? {
            Admission::Admit { content } => content,
            Admission::Deny(reason) => {
                debug!(
                    channel_id = %snapshot.channel_id,
                    author = %snapshot.author.id,
                    reason = reason.reason_code(),
                    "Message denied"
                );
                self.maybe_notify_blocked(snapshot, &reason).await;
                return Ok(ProcessOutcome::Unhandled);
            }
        };

        self.broadcast
            .broadcast(snapshot, &content, &hub.id, &hub.name, &resolved.siblings)
            .await?;

        // Fire-and-forget sinks; failures never affect the outcome.
        self.stats.record_hub_message(
            &snapshot.author.id,
            &snapshot.server_id,
            &hub.id,
        );
        if let Err(e) = self
            .store
            .touch_connection_activity(&snapshot.channel_id)
            .await
        {
            debug!(channel_id = %snapshot.channel_id, error = %e, "Activity touch failed");
        }

        Ok(ProcessOutcome::HandledHub {
            hub_id: hub.id.clone(),
        })
    }

    /// Propagate an edit of a previously broadcast source message.
    ///
    /// The admission pipeline re-runs on the new text; a text that would no
    /// longer be admitted is not propagated. No-op when the record has aged
    /// out.
    pub async fn on_message_edit(
        &self,
        snapshot: &MessageSnapshot,
    ) -> Result<ProcessOutcome, RelayError> {
        let Some(record) = self
            .broadcast
            .ledger()
            .find_by_source(&snapshot.message_id)
            .await?
        else {
            return Ok(ProcessOutcome::Unhandled);
        };

        let Some(resolved) = self.store.resolve_channel(&record.source_channel_id).await? else {
            return Ok(ProcessOutcome::Unhandled);
        };

        let content = match self.admission.check(snapshot, &resolved.hub).await? {
            Admission::Admit { content } => content,
            Admission::Deny(reason) => {
                debug!(
                    message_id = %snapshot.message_id,
                    reason = reason.reason_code(),
                    "Edit denied"
                );
                self.maybe_notify_blocked(snapshot, &reason).await;
                return Ok(ProcessOutcome::Unhandled);
            }
        };

        self.broadcast
            .propagate_edit(&record, &snapshot.author, &content, &resolved.hub.name)
            .await?;
        Ok(ProcessOutcome::HandledHub {
            hub_id: record.hub_id.clone(),
        })
    }

    /// Cascade a delete: removing any mirrored message (or the source)
    /// removes the others. No-op when the record has aged out.
    pub async fn on_message_delete(&self, message_id: &str) -> Result<ProcessOutcome, RelayError> {
        let Some(record) = self.broadcast.ledger().find_by_any(message_id).await? else {
            return Ok(ProcessOutcome::Unhandled);
        };

        self.broadcast.propagate_delete(&record, message_id).await?;
        Ok(ProcessOutcome::HandledHub {
            hub_id: record.hub_id.clone(),
        })
    }

    /// Drop stale notice marks. Called by the background pruning task.
    pub fn cleanup(&self) {
        let horizon = Duration::from_secs(self.config.notice_cooldown_secs * 4);
        self.notice_marks.retain(|_, mark| mark.elapsed() < horizon);
    }

    /// Tell the author why the message was dropped, at most once per
    /// cooldown window, cycling through the configured responses.
    async fn maybe_notify_blocked(&self, snapshot: &MessageSnapshot, reason: &DenyReason) {
        if !reason.notify_author() {
            return;
        }
        let cooldown = Duration::from_secs(self.config.notice_cooldown_secs);
        let now = Instant::now();
        let allowed = match self.notice_marks.entry(snapshot.author.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if now.duration_since(*occupied.get()) < cooldown {
                    false
                } else {
                    occupied.insert(now);
                    true
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        };
        if !allowed || self.config.blocked_message_responses.is_empty() {
            return;
        }

        let index = self.notice_cursor.fetch_add(1, Ordering::Relaxed)
            % self.config.blocked_message_responses.len();
        let text = &self.config.blocked_message_responses[index];
        let _ = self
            .transport
            .send_notice(&snapshot.channel_id, text)
            .await;
    }
}
