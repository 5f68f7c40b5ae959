//! Broadcast service: parallel webhook fan-out.
//!
//! One admitted source message becomes N outbound webhook calls, one per
//! sibling connection. Guarantees, in the order they are enforced here:
//!
//! - *Backpressure*: in-flight fan-outs are bounded per hub; excess waits
//!   briefly, then drops with a logged metric.
//! - *Per-source FIFO*: fan-outs are serialized per source channel through
//!   a fair async mutex. No cross-source ordering.
//! - *Best-effort, at-most-once per sibling*: each sibling gets one
//!   successful call, bounded retries on transient errors, and a per-call
//!   timeout that never cancels the other siblings.
//! - *Sibling health*: a sibling that keeps failing is skipped entirely
//!   until the periodic [`BroadcastService::probe_unhealthy`] pass revives
//!   it; prolonged unhealth disconnects the connection.
//! - *Identity mapping*: the resulting record resolves from any
//!   participating message id.

pub mod payload;
pub mod records;

use crate::config::RelayConfig;
use crate::db::ConnectionRecord;
use crate::error::RelayError;
use crate::store::EntityStore;
use crate::transport::{AuthorSnapshot, ChatTransport, MessageSnapshot, TransportError};
use dashmap::DashMap;
use futures_util::future::join_all;
use rand::Rng;
use records::{BroadcastLedger, BroadcastRecord};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

/// How long an over-budget fan-out may wait for a permit before dropping.
const PERMIT_WAIT: Duration = Duration::from_millis(250);

/// Base delay for the retry backoff.
const RETRY_BASE: Duration = Duration::from_millis(250);

enum Delivery {
    Sent { channel_id: String, message_id: String },
    Failed { channel_id: String, error: TransportError },
}

/// Parallel webhook fan-out with identity records and sibling health.
pub struct BroadcastService {
    transport: Arc<dyn ChatTransport>,
    store: EntityStore,
    ledger: BroadcastLedger,
    config: RelayConfig,
    /// Per-source serialization; tokio's mutex queue is FIFO.
    source_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Per-hub in-flight bound.
    hub_permits: DashMap<String, Arc<Semaphore>>,
    /// Consecutive delivery failures per sibling channel.
    failures: DashMap<String, u32>,
}

impl BroadcastService {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: EntityStore,
        ledger: BroadcastLedger,
        config: RelayConfig,
    ) -> Self {
        Self {
            transport,
            store,
            ledger,
            config,
            source_locks: DashMap::new(),
            hub_permits: DashMap::new(),
            failures: DashMap::new(),
        }
    }

    pub fn ledger(&self) -> &BroadcastLedger {
        &self.ledger
    }

    /// Fan one admitted message out to its siblings.
    ///
    /// Returns the persisted record, or `None` when the fan-out was dropped
    /// under backpressure.
    pub async fn broadcast(
        &self,
        snapshot: &MessageSnapshot,
        content: &str,
        hub_id: &str,
        hub_name: &str,
        siblings: &[ConnectionRecord],
    ) -> Result<Option<BroadcastRecord>, RelayError> {
        let permits = self
            .hub_permits
            .entry(hub_id.to_string())
            .or_insert_with(|| {
                Arc::new(Semaphore::new(self.config.fanout_max_concurrency))
            })
            .clone();
        let Ok(Ok(_permit)) =
            tokio::time::timeout(PERMIT_WAIT, permits.acquire_owned()).await
        else {
            crate::metrics::FANOUT_DROPPED.inc();
            warn!(hub_id = %hub_id, channel_id = %snapshot.channel_id, "Fan-out dropped under backpressure");
            return Ok(None);
        };

        // Serialize per source so m1 finishes its sends before m2 starts.
        let lock = self
            .source_locks
            .entry(snapshot.channel_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _source_guard = lock.lock().await;

        // Resolve the attachment once; every sibling reuses it.
        let attachment = payload::resolve_attachment(snapshot.attachment_url.as_deref());

        let deliveries = join_all(siblings.iter().filter_map(|sibling| {
            if sibling.webhook_url.is_empty() {
                debug!(channel_id = %sibling.channel_id, "Sibling has no webhook, skipped");
                return None;
            }
            // Unhealthy siblings are not dialed at all; the periodic
            // probe is the only path back to delivery.
            if self.is_unhealthy(&sibling.channel_id) {
                debug!(channel_id = %sibling.channel_id, "Sibling unhealthy, skipped until probe");
                return None;
            }
            let body = payload::render(
                &snapshot.author,
                content,
                attachment.as_deref(),
                hub_name,
                sibling,
            );
            Some(self.deliver(
                sibling.channel_id.clone(),
                sibling.webhook_url.clone(),
                body,
                self.config.fanout_max_retries,
            ))
        }))
        .await;

        let mut broadcasts = BTreeMap::new();
        for delivery in deliveries {
            match delivery {
                Delivery::Sent {
                    channel_id,
                    message_id,
                } => {
                    self.failures.remove(&channel_id);
                    broadcasts.insert(channel_id, message_id);
                }
                Delivery::Failed { channel_id, error } => {
                    self.note_failure(&channel_id, &error).await?;
                }
            }
        }

        let record = BroadcastRecord {
            source_message_id: snapshot.message_id.clone(),
            source_channel_id: snapshot.channel_id.clone(),
            hub_id: hub_id.to_string(),
            author_user_id: snapshot.author.id.clone(),
            created_at: snapshot.sent_at.timestamp_millis(),
            broadcasts,
        };
        self.ledger.insert(&record).await?;
        crate::metrics::MESSAGES_BROADCAST.inc();

        Ok(Some(record))
    }

    /// Fan an edit out to every mirrored message.
    ///
    /// Admission has already re-run on the new text by the time this is
    /// called. Per-sibling failures are logged and do not affect the rest.
    pub async fn propagate_edit(
        &self,
        record: &BroadcastRecord,
        author: &AuthorSnapshot,
        new_content: &str,
        hub_name: &str,
    ) -> Result<(), RelayError> {
        let timeout = Duration::from_millis(self.config.fanout_timeout_ms);

        join_all(record.broadcasts.iter().map(|(channel_id, message_id)| {
            let transport = Arc::clone(&self.transport);
            async move {
                let Ok(Some(connection)) =
                    self.store.cache().get_connection(channel_id).await
                else {
                    return;
                };
                if connection.webhook_url.is_empty() {
                    return;
                }
                let body =
                    payload::render(author, new_content, None, hub_name, &connection);
                match tokio::time::timeout(
                    timeout,
                    transport.edit_webhook_message(&connection.webhook_url, message_id, &body),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(channel_id = %channel_id, error = %e, "Edit propagation failed")
                    }
                    Err(_) => debug!(channel_id = %channel_id, "Edit propagation timed out"),
                }
            }
        }))
        .await;

        Ok(())
    }

    /// Cascade a delete to every mirrored message except the one that
    /// triggered it.
    pub async fn propagate_delete(
        &self,
        record: &BroadcastRecord,
        triggering_message_id: &str,
    ) -> Result<(), RelayError> {
        let timeout = Duration::from_millis(self.config.fanout_timeout_ms);

        join_all(
            record
                .broadcasts
                .iter()
                .filter(|(_, message_id)| message_id.as_str() != triggering_message_id)
                .map(|(channel_id, message_id)| {
                    let transport = Arc::clone(&self.transport);
                    async move {
                        let Ok(Some(connection)) =
                            self.store.cache().get_connection(channel_id).await
                        else {
                            return;
                        };
                        if connection.webhook_url.is_empty() {
                            return;
                        }
                        match tokio::time::timeout(
                            timeout,
                            transport
                                .delete_webhook_message(&connection.webhook_url, message_id),
                        )
                        .await
                        {
                            Ok(Ok(())) | Ok(Err(TransportError::Gone)) => {}
                            Ok(Err(e)) => {
                                debug!(channel_id = %channel_id, error = %e, "Delete propagation failed")
                            }
                            Err(_) => {
                                debug!(channel_id = %channel_id, "Delete propagation timed out")
                            }
                        }
                    }
                }),
        )
        .await;

        Ok(())
    }

    /// Drop idle per-source locks and permit entries. Called by the
    /// background pruning task.
    pub fn cleanup(&self) {
        self.source_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    fn is_unhealthy(&self, channel_id: &str) -> bool {
        self.failures
            .get(channel_id)
            .is_some_and(|count| *count >= self.config.unhealthy_after_failures)
    }

    /// One sibling delivery: per-call timeout, bounded jittered retries on
    /// transient errors, immediate abort on permanent ones.
    async fn deliver(
        &self,
        channel_id: String,
        webhook_url: String,
        body: crate::transport::WebhookPayload,
        retries: u32,
    ) -> Delivery {
        let timeout = Duration::from_millis(self.config.fanout_timeout_ms);
        let mut last_error = TransportError::Timeout;

        for attempt in 0..=retries {
            if attempt > 0 {
                let jitter = rand::thread_rng().gen_range(0..100);
                tokio::time::sleep(RETRY_BASE * (1 << (attempt - 1)) + Duration::from_millis(jitter))
                    .await;
            }

            match tokio::time::timeout(timeout, self.transport.send_webhook(&webhook_url, &body))
                .await
            {
                Ok(Ok(message_id)) => {
                    return Delivery::Sent {
                        channel_id,
                        message_id,
                    };
                }
                Ok(Err(error)) => {
                    if !error.is_transient() {
                        return Delivery::Failed { channel_id, error };
                    }
                    last_error = error;
                }
                Err(_) => last_error = TransportError::Timeout,
            }
        }

        Delivery::Failed {
            channel_id,
            error: last_error,
        }
    }

    /// Probe siblings the fan-out path is currently skipping.
    ///
    /// Run periodically from a background task. A probe asks the platform
    /// for the channel's webhooks instead of posting a message: a stored
    /// URL that is still registered revives the sibling, a vanished one is
    /// cleared for re-provisioning, and probes that keep failing escalate
    /// into a disconnect the same way delivery failures do.
    pub async fn probe_unhealthy(&self) -> Result<(), RelayError> {
        let unhealthy: Vec<String> = self
            .failures
            .iter()
            .filter(|entry| *entry.value() >= self.config.unhealthy_after_failures)
            .map(|entry| entry.key().clone())
            .collect();

        for channel_id in unhealthy {
            let Some(connection) = self.store.find_connection(&channel_id).await? else {
                self.failures.remove(&channel_id);
                continue;
            };
            if !connection.connected || connection.webhook_url.is_empty() {
                // The reconnect and re-provision paths own these.
                self.failures.remove(&channel_id);
                continue;
            }

            match self.transport.list_channel_webhooks(&channel_id).await {
                Ok(webhooks) if webhooks.iter().any(|w| w.url == connection.webhook_url) => {
                    self.failures.remove(&channel_id);
                    debug!(channel_id = %channel_id, "Sibling probe succeeded, delivery resumes");
                }
                Ok(_) => {
                    // The webhook vanished while the sibling was skipped.
                    self.failures.remove(&channel_id);
                    self.store.set_connection_webhook_url(&channel_id, "").await?;
                    debug!(channel_id = %channel_id, "Sibling webhook vanished, cleared for re-provisioning");
                }
                Err(error) => {
                    let count = self.bump_failures(&channel_id);
                    debug!(channel_id = %channel_id, error = %error, consecutive = count, "Sibling probe failed");
                    self.escalate(&channel_id, count).await?;
                }
            }
        }
        Ok(())
    }

    fn bump_failures(&self, channel_id: &str) -> u32 {
        let mut entry = self.failures.entry(channel_id.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Record a sibling delivery failure and apply the escalation policy:
    /// a gone webhook loses its stored URL immediately; prolonged failure
    /// disconnects the connection and tells the channel why.
    async fn note_failure(
        &self,
        channel_id: &str,
        error: &TransportError,
    ) -> Result<(), RelayError> {
        crate::metrics::FANOUT_FAILURES.inc();
        let count = self.bump_failures(channel_id);
        warn!(channel_id = %channel_id, error = %error, consecutive = count, "Sibling delivery failed");

        if error.is_gone() {
            // Next message from that channel re-provisions.
            self.store.set_connection_webhook_url(channel_id, "").await?;
        }

        self.escalate(channel_id, count).await
    }

    /// Disconnect a sibling whose failures crossed the disconnect bound.
    async fn escalate(&self, channel_id: &str, count: u32) -> Result<(), RelayError> {
        if count < self.config.disconnect_after_failures {
            return Ok(());
        }
        self.failures.remove(channel_id);
        if self.store.set_connection_connected(channel_id, false).await? {
            warn!(channel_id = %channel_id, "Connection disconnected after repeated delivery failures");
            let _ = self
                .transport
                .send_notice(
                    channel_id,
                    "This channel was disconnected from its hub after repeated delivery \
                     failures. Reconnect once the webhook issue is resolved.",
                )
                .await;
        }
        Ok(())
    }
}
