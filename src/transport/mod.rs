//! Chat transport abstraction.
//!
//! The daemon never talks to a chat platform directly; everything outbound
//! goes through the [`ChatTransport`] trait. Any platform offering
//! per-channel webhook endpoints and gateway events satisfies it. The
//! production implementation is [`http::HttpTransport`]; tests substitute a
//! recording double.
//!
//! Inbound events are value snapshots taken at ingress: downstream
//! components never hold references into mutable platform objects.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport errors.
///
/// The split between transient and permanent drives the retry and
/// re-provisioning policy in the broadcast service.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint no longer exists (deleted webhook, pruned channel).
    #[error("endpoint gone")]
    Gone,

    /// Credentials rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// The platform asked us to slow down.
    #[error("rate limited")]
    RateLimited,

    /// Server-side failure, retryable.
    #[error("server error: status {0}")]
    Server(u16),

    /// The request itself was rejected.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// The call did not complete in time.
    #[error("timed out")]
    Timeout,

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    /// Whether a bounded retry at the call site is worthwhile.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Server(_) | Self::Timeout | Self::Network(_)
        )
    }

    /// Whether the endpoint is permanently unusable and its stored URL
    /// should be discarded.
    #[inline]
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone)
    }

    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Gone => "gone",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::Server(_) => "server_error",
            Self::Invalid(_) => "invalid_request",
            Self::Timeout => "timeout",
            Self::Network(_) => "network_error",
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e.to_string())
        }
    }
}

// ============================================================================
// Snapshots and payloads
// ============================================================================

// Snapshots are in-memory values only; everything persisted to the KV keeps
// integer timestamps.

/// Author identity captured at ingress.
#[derive(Debug, Clone)]
pub struct AuthorSnapshot {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_bot: bool,
}

/// Value snapshot of one inbound chat event.
///
/// Taken once when the gateway delivers the event; every downstream
/// component operates on this, never on the platform's message object.
#[derive(Debug, Clone)]
pub struct MessageSnapshot {
    pub message_id: String,
    pub channel_id: String,
    pub server_id: String,
    pub author: AuthorSnapshot,
    pub content: String,
    /// First attachment, if any. Re-hosting happens later, once.
    pub attachment_url: Option<String>,
    /// Whether the origin channel is age-restricted.
    pub channel_nsfw: bool,
    /// Id of the message this one replies to, if any.
    pub reply_to: Option<String>,
    pub sent_at: DateTime<Utc>,
}

impl MessageSnapshot {
    /// True when there is nothing to relay.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.attachment_url.is_none()
    }
}

/// Outbound webhook payload.
///
/// Rendered per sibling: either a rich embed or a compact line, carrying the
/// author's display name and avatar so the mirrored message reads as theirs.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct WebhookPayload {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<EmbedPayload>,
}

/// Rich-embed rendering of a relayed message.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedPayload {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
}

/// A webhook registered on a channel.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookInfo {
    pub id: String,
    pub name: String,
    pub url: String,
}

/// A channel's relay-relevant properties.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    /// Whether the channel is age-restricted.
    #[serde(default)]
    pub nsfw: bool,
}

/// Name under which the daemon provisions its webhooks.
pub const WEBHOOK_NAME: &str = "InterChat Relay";

// ============================================================================
// Transport trait
// ============================================================================

/// Outbound operations the core consumes from the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Dispatch a message through a webhook, returning the platform's
    /// message id.
    async fn send_webhook(
        &self,
        url: &str,
        payload: &WebhookPayload,
    ) -> Result<String, TransportError>;

    /// Edit a previously dispatched webhook message.
    async fn edit_webhook_message(
        &self,
        url: &str,
        message_id: &str,
        payload: &WebhookPayload,
    ) -> Result<(), TransportError>;

    /// Delete a previously dispatched webhook message.
    async fn delete_webhook_message(
        &self,
        url: &str,
        message_id: &str,
    ) -> Result<(), TransportError>;

    /// Create a webhook on a channel, returning its persistent URL.
    async fn create_webhook(&self, channel_id: &str) -> Result<String, TransportError>;

    /// List the webhooks registered on a channel.
    async fn list_channel_webhooks(
        &self,
        channel_id: &str,
    ) -> Result<Vec<WebhookInfo>, TransportError>;

    /// Post a plain notice into a channel (call notices, moderator alerts).
    async fn send_notice(&self, channel_id: &str, text: &str) -> Result<(), TransportError>;

    /// Post a notice carrying one interactive component referenced by a
    /// routing token (rules prompt, report actions).
    async fn send_prompt(
        &self,
        channel_id: &str,
        text: &str,
        button_label: &str,
        token: &str,
    ) -> Result<(), TransportError>;

    /// Emit a typing indicator into a channel.
    async fn trigger_typing(&self, channel_id: &str) -> Result<(), TransportError>;

    /// Fetch a user's current profile.
    async fn fetch_user(&self, user_id: &str) -> Result<Option<AuthorSnapshot>, TransportError>;

    /// Fetch a channel's properties.
    async fn fetch_channel(&self, channel_id: &str)
    -> Result<Option<ChannelInfo>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TransportError::Server(502).is_transient());
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::RateLimited.is_transient());
        assert!(!TransportError::Gone.is_transient());
        assert!(!TransportError::Unauthorized.is_transient());
        assert!(TransportError::Gone.is_gone());
    }

    #[test]
    fn empty_snapshot_detection() {
        let snapshot = MessageSnapshot {
            message_id: "m1".into(),
            channel_id: "c1".into(),
            server_id: "s1".into(),
            author: AuthorSnapshot {
                id: "u1".into(),
                display_name: "u".into(),
                avatar_url: None,
                is_bot: false,
            },
            content: "   ".into(),
            attachment_url: None,
            channel_nsfw: false,
            reply_to: None,
            sent_at: chrono::Utc::now(),
        };
        assert!(snapshot.is_empty());
    }
}
