//! Call session relay.
//!
//! Bridges an active pair: every admitted message on one side goes to the
//! peer's webhook, decorated with a quoted excerpt when it replies to a
//! recent call message. A bounded recent-messages ring is retained for the
//! report window, blocked entries included.

use super::{CallRecord, CallStatus, RingEntry};
use crate::admission::content::{ContentClassifier, NsfwScreen};
use crate::admission::spam::SpamGuard;
use crate::config::CallsConfig;
use crate::error::RelayError;
use crate::kv::{KvStore, keys};
use crate::transport::{ChatTransport, MessageSnapshot, WebhookPayload};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Why a call message was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallBlock {
    Spam,
    Link,
    Nsfw,
    Content,
}

impl CallBlock {
    fn notice(self) -> &'static str {
        match self {
            Self::Spam => "A message from the other side was blocked (too fast).",
            Self::Link => "A message from the other side was blocked (link not allowed).",
            Self::Nsfw => "A message from the other side was blocked (NSFW).",
            Self::Content => "A message from the other side was blocked.",
        }
    }
}

/// Relay for active call sessions.
pub struct CallSessionManager {
    kv: Arc<dyn KvStore>,
    transport: Arc<dyn ChatTransport>,
    spam: SpamGuard,
    content: Arc<dyn ContentClassifier>,
    nsfw: NsfwScreen,
    config: CallsConfig,
    /// Last typing emission per channel, for the refractory period.
    typing_marks: DashMap<String, Instant>,
}

impl CallSessionManager {
    pub fn new(
        kv: Arc<dyn KvStore>,
        transport: Arc<dyn ChatTransport>,
        spam: SpamGuard,
        content: Arc<dyn ContentClassifier>,
        config: CallsConfig,
    ) -> Self {
        Self {
            kv,
            transport,
            spam,
            content,
            nsfw: NsfwScreen::new(),
            config,
            typing_marks: DashMap::new(),
        }
    }

    /// Relay one message inside a call. Returns whether the channel had an
    /// active call (i.e. the event is consumed).
    pub async fn on_call_message(&self, snapshot: &MessageSnapshot) -> Result<bool, RelayError> {
        let Some(call_id) = self.kv.get(&keys::call_active(&snapshot.channel_id)).await? else {
            return Ok(false);
        };
        let Some(mut record) = self.load_session(&call_id).await? else {
            return Ok(false);
        };
        if record.status != CallStatus::Active {
            return Ok(false);
        }
        let Some(peer) = record.peer_of(&snapshot.channel_id).cloned() else {
            return Ok(false);
        };

        // Track the author on their side; idempotent by set semantics.
        if let Some(side) = record.side_mut(&snapshot.channel_id) {
            side.users.insert(snapshot.author.id.clone());
        }
        record.last_activity = Utc::now().timestamp_millis();
        self.write_session(&record).await?;

        if let Some(block) = self.check_call_message(snapshot).await {
            debug!(call_id = %call_id, reason = ?block, "Call message blocked");
            self.append_ring(&call_id, snapshot, true, None).await?;
            let _ = self
                .transport
                .send_notice(&peer.channel_id, block.notice())
                .await;
            return Ok(true);
        }

        // Replies to recent call messages carry a quoted excerpt.
        let mut content = snapshot.content.clone();
        if let Some(reply_to) = &snapshot.reply_to
            && let Some(quoted) = self.find_ring_entry(&call_id, reply_to).await?
        {
            let excerpt: String = quoted.content.chars().take(80).collect();
            content = format!("> {}: {}\n{}", quoted.author_name, excerpt, content);
        }

        let mut body = content;
        if let Some(url) = &snapshot.attachment_url {
            if !body.is_empty() {
                body.push(' ');
            }
            body.push_str(url);
        }
        let payload = WebhookPayload {
            username: snapshot.author.display_name.clone(),
            avatar_url: snapshot.author.avatar_url.clone(),
            content: body,
            embed: None,
        };
        let relayed_id = self
            .transport
            .send_webhook(&peer.webhook_url, &payload)
            .await?;
        crate::metrics::CALL_MESSAGES_RELAYED.inc();

        self.append_ring(&call_id, snapshot, false, Some(&relayed_id))
            .await?;
        Ok(true)
    }

    /// Relay a typing indicator to the peer, coalesced per channel with a
    /// refractory period.
    pub async fn on_typing(&self, channel_id: &str) -> Result<(), RelayError> {
        let refractory = Duration::from_millis(self.config.typing_refractory_ms);
        let now = Instant::now();
        let allowed = match self.typing_marks.entry(channel_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if now.duration_since(*occupied.get()) < refractory {
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
        if !allowed {
            return Ok(());
        }

        let Some(call_id) = self.kv.get(&keys::call_active(channel_id)).await? else {
            return Ok(());
        };
        let Some(record) = self.load_session(&call_id).await? else {
            return Ok(());
        };
        if record.status != CallStatus::Active {
            return Ok(());
        }
        if let Some(peer) = record.peer_of(channel_id) {
            let _ = self.transport.trigger_typing(&peer.channel_id).await;
        }
        Ok(())
    }

    /// Drop stale typing marks and limiter state. Called by the background
    /// pruning task.
    pub fn cleanup(&self) {
        let horizon = Duration::from_millis(self.config.typing_refractory_ms * 4);
        self.typing_marks
            .retain(|_, mark| mark.elapsed() < horizon);
        self.spam.cleanup(10_000);
    }

    /// Call-specific checks: spam, link allowlist, NSFW, content filter.
    ///
    /// NSFW is judged per message from the content and attachment;
    /// age-restricted channels never reach a call (denied at initiate).
    async fn check_call_message(&self, snapshot: &MessageSnapshot) -> Option<CallBlock> {
        if !self.spam.check(&snapshot.author.id) {
            return Some(CallBlock::Spam);
        }
        if self
            .nsfw
            .flags(&snapshot.content, snapshot.attachment_url.as_deref())
        {
            return Some(CallBlock::Nsfw);
        }
        if !self.links_allowed(&snapshot.content) {
            return Some(CallBlock::Link);
        }
        let verdict = self
            .content
            .classify(&snapshot.content, snapshot.attachment_url.as_deref())
            .await;
        if verdict.blocked {
            return Some(CallBlock::Content);
        }
        None
    }

    /// Links in calls are restricted to the configured GIF-host allowlist.
    fn links_allowed(&self, text: &str) -> bool {
        crate::admission::content::link_hosts(text).all(|host| {
            self.config
                .link_allowlist
                .iter()
                .any(|domain| host == domain || host.ends_with(&format!(".{domain}")))
        })
    }

    async fn append_ring(
        &self,
        call_id: &str,
        snapshot: &MessageSnapshot,
        blocked: bool,
        relayed_message_id: Option<&str>,
    ) -> Result<(), RelayError> {
        let entry = RingEntry {
            message_id: snapshot.message_id.clone(),
            relayed_message_id: relayed_message_id.map(str::to_string),
            at: snapshot.sent_at.timestamp_millis(),
            author_id: snapshot.author.id.clone(),
            author_name: snapshot.author.display_name.clone(),
            content: if blocked {
                format!("[BLOCKED] {}", snapshot.content)
            } else {
                snapshot.content.clone()
            },
            attachment_url: snapshot.attachment_url.clone(),
            blocked,
        };

        let key = keys::call_messages(call_id);
        self.kv
            .list_push(&key, &serde_json::to_string(&entry).map_err(crate::kv::KvError::from)?)
            .await?;
        self.kv
            .list_trim_to_newest(&key, self.config.ring_capacity as u64)
            .await?;
        self.kv
            .expire(&key, Duration::from_secs(self.config.message_retention_secs))
            .await?;
        Ok(())
    }

    async fn find_ring_entry(
        &self,
        call_id: &str,
        message_id: &str,
    ) -> Result<Option<RingEntry>, RelayError> {
        for raw in self.kv.list_all(&keys::call_messages(call_id)).await? {
            if let Ok(entry) = serde_json::from_str::<RingEntry>(&raw)
                && (entry.message_id == message_id
                    || entry.relayed_message_id.as_deref() == Some(message_id))
            {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn load_session(&self, call_id: &str) -> Result<Option<CallRecord>, RelayError> {
        let Some(raw) = self.kv.get(&keys::call_session(call_id)).await? else {
            return Ok(None);
        };
        Ok(Some(
            serde_json::from_str(&raw).map_err(crate::kv::KvError::from)?,
        ))
    }

    async fn write_session(&self, record: &CallRecord) -> Result<(), RelayError> {
        self.kv
            .set(
                &keys::call_session(&record.call_id),
                &serde_json::to_string(record).map_err(crate::kv::KvError::from)?,
                None,
            )
            .await?;
        Ok(())
    }
}
