//! Call matchmaker.
//!
//! A shared FIFO queue of waiting channels. Pairing scans for the oldest
//! eligible entry: a different channel, a different server, and a pair not
//! inside the recent-match cooldown. The dequeue is made atomic across
//! processes with a per-channel claim (SET NX) followed by an exact-value
//! list removal; losing either race releases and continues the scan.

use super::{CallParticipant, CallRecord, CallRequest, CallStatus};
use crate::config::CallsConfig;
use crate::error::RelayError;
use crate::kv::{KvStore, keys};
use crate::stats::StatsSink;
use crate::store::EntityStore;
use crate::transport::ChatTransport;
use crate::webhooks::WebhookProvisioner;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Index of live call ids, for the idle sweeper.
const CALL_INDEX: &str = "call:index";

/// How long a dequeue claim may linger if its holder dies mid-pair.
const CLAIM_TTL: Duration = Duration::from_secs(30);

/// Outcome of an initiate request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiateOutcome {
    /// This channel already has an active call.
    AlreadyInCall,
    /// Policy refused the request.
    Denied { reason: &'static str },
    /// No eligible partner yet; the request is waiting in the queue.
    Queued,
    /// Paired.
    Connected { call_id: String },
}

/// Outcome of a hangup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HangupOutcome {
    NotInCall,
    /// The channel was only waiting; its queue entry was withdrawn.
    CancelledQueue,
    Ended { peer_channel_id: String },
}

/// Distributed matchmaker over the shared KV.
pub struct CallMatchmaker {
    kv: Arc<dyn KvStore>,
    store: EntityStore,
    provisioner: Arc<WebhookProvisioner>,
    transport: Arc<dyn ChatTransport>,
    stats: StatsSink,
    config: CallsConfig,
}

impl CallMatchmaker {
    pub fn new(
        kv: Arc<dyn KvStore>,
        store: EntityStore,
        provisioner: Arc<WebhookProvisioner>,
        transport: Arc<dyn ChatTransport>,
        stats: StatsSink,
        config: CallsConfig,
    ) -> Self {
        Self {
            kv,
            store,
            provisioner,
            transport,
            stats,
            config,
        }
    }

    /// Start or join a call from a channel.
    pub async fn initiate(
        &self,
        channel_id: &str,
        server_id: &str,
        user_id: &str,
    ) -> Result<InitiateOutcome, RelayError> {
        if self.kv.get(&keys::call_active(channel_id)).await?.is_some() {
            return Ok(InitiateOutcome::AlreadyInCall);
        }

        if self.store.find_active_server_ban(server_id).await?.is_some() {
            return Ok(InitiateOutcome::Denied {
                reason: "server is banned",
            });
        }
        // Hub-connected channels route their traffic to the hub; a call
        // there would never see its own messages.
        if self.store.resolve_channel(channel_id).await?.is_some() {
            return Ok(InitiateOutcome::Denied {
                reason: "channel is connected to a hub",
            });
        }
        // Calls pair strangers and are always SFW; age-restricted channels
        // are refused up front rather than having every message blocked.
        match self.transport.fetch_channel(channel_id).await {
            Ok(Some(channel)) if channel.nsfw => {
                return Ok(InitiateOutcome::Denied {
                    reason: "channel is age-restricted",
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(channel_id = %channel_id, error = %e, "Channel lookup failed for call");
                return Ok(InitiateOutcome::Denied {
                    reason: "channel unavailable",
                });
            }
        }

        let webhook_url = match self.provisioner.get_or_create(channel_id).await {
            Ok(url) => url,
            Err(e) => {
                warn!(channel_id = %channel_id, error = %e, "Webhook unavailable for call");
                return Ok(InitiateOutcome::Denied {
                    reason: "webhook unavailable",
                });
            }
        };

        // Claim our own channel so two concurrent initiates cannot both
        // enqueue or pair it.
        let own_claim = keys::call_claim(channel_id);
        if !self.kv.set_nx(&own_claim, "1", Some(CLAIM_TTL)).await? {
            return Ok(InitiateOutcome::AlreadyInCall);
        }

        let outcome = self
            .try_pair_or_enqueue(channel_id, server_id, user_id, &webhook_url)
            .await;
        self.kv.del(&own_claim).await?;
        outcome
    }

    async fn try_pair_or_enqueue(
        &self,
        channel_id: &str,
        server_id: &str,
        user_id: &str,
        webhook_url: &str,
    ) -> Result<InitiateOutcome, RelayError> {
        let queue = self.kv.list_all(keys::CALL_QUEUE).await?;

        // A channel already waiting must not enqueue twice.
        if queue
            .iter()
            .filter_map(|raw| serde_json::from_str::<CallRequest>(raw).ok())
            .any(|entry| entry.channel_id == channel_id)
        {
            return Ok(InitiateOutcome::AlreadyInCall);
        }

        // Scan oldest-first for an eligible entry.
        for raw in queue {
            let Ok(entry) = serde_json::from_str::<CallRequest>(&raw) else {
                // Unreadable entry: drop it so the queue stays clean.
                let _ = self.kv.list_remove(keys::CALL_QUEUE, &raw).await;
                continue;
            };
            if entry.channel_id == channel_id || entry.server_id == server_id {
                continue;
            }
            let cooldown_key = keys::recent_match(channel_id, &entry.channel_id);
            if self.kv.get(&cooldown_key).await?.is_some() {
                debug!(a = %channel_id, b = %entry.channel_id, "Pair inside recent-match cooldown");
                continue;
            }

            // Atomic dequeue: claim the candidate's channel, then remove
            // the exact entry. Losing either race moves on.
            let claim_key = keys::call_claim(&entry.channel_id);
            if !self.kv.set_nx(&claim_key, channel_id, Some(CLAIM_TTL)).await? {
                continue;
            }
            if !self.kv.list_remove(keys::CALL_QUEUE, &raw).await? {
                self.kv.del(&claim_key).await?;
                continue;
            }

            let result = self
                .establish(channel_id, server_id, user_id, webhook_url, &entry)
                .await;
            self.kv.del(&claim_key).await?;
            crate::metrics::QUEUE_DEPTH.dec();
            return result;
        }

        // Nobody eligible: enqueue.
        let request = CallRequest {
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            server_id: server_id.to_string(),
            webhook_url: webhook_url.to_string(),
            enqueued_at: Utc::now().timestamp_millis(),
        };
        self.kv
            .list_push(
                keys::CALL_QUEUE,
                &serde_json::to_string(&request).map_err(crate::kv::KvError::from)?,
            )
            .await?;
        crate::metrics::QUEUE_DEPTH.inc();
        debug!(channel_id = %channel_id, "Call request queued");
        Ok(InitiateOutcome::Queued)
    }

    async fn establish(
        &self,
        channel_id: &str,
        server_id: &str,
        user_id: &str,
        webhook_url: &str,
        peer: &CallRequest,
    ) -> Result<InitiateOutcome, RelayError> {
        let now = Utc::now().timestamp_millis();
        let call_id = Uuid::new_v4().to_string();

        let mut caller_users = BTreeSet::new();
        caller_users.insert(user_id.to_string());
        let mut peer_users = BTreeSet::new();
        peer_users.insert(peer.user_id.clone());

        let record = CallRecord {
            call_id: call_id.clone(),
            status: CallStatus::Active,
            started_at: now,
            ended_at: None,
            last_activity: now,
            participants: [
                CallParticipant {
                    channel_id: channel_id.to_string(),
                    server_id: server_id.to_string(),
                    webhook_url: webhook_url.to_string(),
                    users: caller_users,
                    joined_at: now,
                },
                CallParticipant {
                    channel_id: peer.channel_id.clone(),
                    server_id: peer.server_id.clone(),
                    webhook_url: peer.webhook_url.clone(),
                    users: peer_users,
                    joined_at: now,
                },
            ],
        };

        self.write_session(&record, None).await?;
        self.kv
            .set(&keys::call_active(channel_id), &call_id, None)
            .await?;
        self.kv
            .set(&keys::call_active(&peer.channel_id), &call_id, None)
            .await?;
        self.kv.list_push(CALL_INDEX, &call_id).await?;

        crate::metrics::CALLS_PAIRED.inc();
        crate::metrics::ACTIVE_CALLS.inc();
        self.stats.record_call(server_id, &peer.server_id);
        info!(call_id = %call_id, a = %channel_id, b = %peer.channel_id, "Call connected");

        for channel in [channel_id, &peer.channel_id] {
            let _ = self
                .transport
                .send_notice(
                    channel,
                    "Call connected! Say hi. Use hangup to end, skip to find someone else.",
                )
                .await;
        }

        Ok(InitiateOutcome::Connected { call_id })
    }

    /// End a channel's active call.
    pub async fn hangup(
        &self,
        channel_id: &str,
        _user_id: &str,
    ) -> Result<HangupOutcome, RelayError> {
        let Some(call_id) = self.kv.get(&keys::call_active(channel_id)).await? else {
            // Not paired; withdraw a waiting queue entry if there is one.
            for raw in self.kv.list_all(keys::CALL_QUEUE).await? {
                let Ok(entry) = serde_json::from_str::<CallRequest>(&raw) else {
                    continue;
                };
                if entry.channel_id == channel_id
                    && self.kv.list_remove(keys::CALL_QUEUE, &raw).await?
                {
                    crate::metrics::QUEUE_DEPTH.dec();
                    return Ok(HangupOutcome::CancelledQueue);
                }
            }
            return Ok(HangupOutcome::NotInCall);
        };
        let Some(mut record) = self.load_session(&call_id).await? else {
            // Mapping without a session: clear the orphan.
            self.kv.del(&keys::call_active(channel_id)).await?;
            return Ok(HangupOutcome::NotInCall);
        };

        let Some(peer) = record.peer_of(channel_id).cloned() else {
            return Ok(HangupOutcome::NotInCall);
        };

        if record.status == CallStatus::Active {
            record.status = CallStatus::Ended;
            record.ended_at = Some(Utc::now().timestamp_millis());
            crate::metrics::ACTIVE_CALLS.dec();
        }

        // Retain the ended call (and its ring) for the report window.
        let retention = Duration::from_secs(self.config.message_retention_secs);
        self.write_session(&record, Some(retention)).await?;
        self.kv
            .expire(&keys::call_messages(&call_id), retention)
            .await?;

        self.kv.del(&keys::call_active(channel_id)).await?;
        self.kv.del(&keys::call_active(&peer.channel_id)).await?;
        let _ = self.kv.list_remove(CALL_INDEX, &call_id).await;

        self.kv
            .set(
                &keys::recent_match(channel_id, &peer.channel_id),
                "1",
                Some(Duration::from_secs(self.config.recent_match_cooldown_secs)),
            )
            .await?;

        info!(call_id = %call_id, "Call ended");
        let _ = self
            .transport
            .send_notice(&peer.channel_id, "The other side hung up. Call ended.")
            .await;

        Ok(HangupOutcome::Ended {
            peer_channel_id: peer.channel_id,
        })
    }

    /// Hang up and immediately look for a new partner.
    pub async fn skip(
        &self,
        channel_id: &str,
        server_id: &str,
        user_id: &str,
    ) -> Result<InitiateOutcome, RelayError> {
        self.hangup(channel_id, user_id).await?;
        self.initiate(channel_id, server_id, user_id).await
    }

    /// Prune queue entries older than the max wait and end idle calls.
    ///
    /// Idempotent: an entry already taken by a concurrent pruner or pairer
    /// fails its list removal and is skipped without a second notice.
    pub async fn sweep(&self) -> Result<(), RelayError> {
        let now = Utc::now().timestamp_millis();
        let max_wait_ms = (self.config.matchmaker_max_wait_secs * 1000) as i64;

        for raw in self.kv.list_all(keys::CALL_QUEUE).await? {
            let Ok(entry) = serde_json::from_str::<CallRequest>(&raw) else {
                let _ = self.kv.list_remove(keys::CALL_QUEUE, &raw).await;
                continue;
            };
            if now - entry.enqueued_at < max_wait_ms {
                continue;
            }
            if self.kv.list_remove(keys::CALL_QUEUE, &raw).await? {
                crate::metrics::QUEUE_DEPTH.dec();
                debug!(channel_id = %entry.channel_id, "Stale call request pruned");
                let _ = self
                    .transport
                    .send_notice(
                        &entry.channel_id,
                        "No partner found in time. Try calling again later.",
                    )
                    .await;
            }
        }

        // Idle calls: no relayed message within the idle timeout.
        let idle_ms = (self.config.idle_timeout_secs * 1000) as i64;
        for call_id in self.kv.list_all(CALL_INDEX).await? {
            let Some(record) = self.load_session(&call_id).await? else {
                let _ = self.kv.list_remove(CALL_INDEX, &call_id).await;
                continue;
            };
            if record.status == CallStatus::Active && now - record.last_activity >= idle_ms {
                debug!(call_id = %call_id, "Idle call ended by sweeper");
                let channel = record.participants[0].channel_id.clone();
                let _ = self.hangup(&channel, "sweeper").await?;
            }
        }

        Ok(())
    }

    async fn load_session(&self, call_id: &str) -> Result<Option<CallRecord>, RelayError> {
        let Some(raw) = self.kv.get(&keys::call_session(call_id)).await? else {
            return Ok(None);
        };
        Ok(Some(
            serde_json::from_str(&raw).map_err(crate::kv::KvError::from)?,
        ))
    }

    async fn write_session(
        &self,
        record: &CallRecord,
        ttl: Option<Duration>,
    ) -> Result<(), RelayError> {
        self.kv
            .set(
                &keys::call_session(&record.call_id),
                &serde_json::to_string(record).map_err(crate::kv::KvError::from)?,
                ttl,
            )
            .await?;
        Ok(())
    }
}
