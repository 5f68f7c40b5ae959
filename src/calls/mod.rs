//! Ephemeral 1:1 calls.
//!
//! Two channels, anywhere, paired through the matchmaker and bridged by a
//! pair of webhook pipes until either side hangs up. Call state lives in
//! the shared KV so any daemon process can relay for any call.

pub mod matchmaker;
pub mod session;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A waiting matchmaker queue entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallRequest {
    pub channel_id: String,
    pub user_id: String,
    pub server_id: String,
    pub webhook_url: String,
    /// Milliseconds since the epoch.
    pub enqueued_at: i64,
}

/// One side of an active call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallParticipant {
    pub channel_id: String,
    pub server_id: String,
    pub webhook_url: String,
    /// Users who have spoken on this side; grows as they send.
    pub users: BTreeSet<String>,
    pub joined_at: i64,
}

/// Call lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Active,
    Ended,
}

/// A call record: exactly two participants while ACTIVE, retained after
/// ENDED for the report window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub status: CallStatus,
    /// Milliseconds since the epoch.
    pub started_at: i64,
    pub ended_at: Option<i64>,
    /// Refreshed on every relayed message; drives the idle sweeper.
    pub last_activity: i64,
    pub participants: [CallParticipant; 2],
}

impl CallRecord {
    /// The participant owning `channel_id`.
    pub fn side(&self, channel_id: &str) -> Option<&CallParticipant> {
        self.participants.iter().find(|p| p.channel_id == channel_id)
    }

    /// The participant opposite `channel_id`.
    pub fn peer_of(&self, channel_id: &str) -> Option<&CallParticipant> {
        self.participants.iter().find(|p| p.channel_id != channel_id)
    }

    /// Mutable access to the participant owning `channel_id`.
    pub fn side_mut(&mut self, channel_id: &str) -> Option<&mut CallParticipant> {
        self.participants
            .iter_mut()
            .find(|p| p.channel_id == channel_id)
    }

    /// Call duration in seconds, up to now for active calls.
    pub fn duration_secs(&self, now_ms: i64) -> i64 {
        (self.ended_at.unwrap_or(now_ms) - self.started_at) / 1000
    }
}

/// One entry in a call's recent-messages ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingEntry {
    pub message_id: String,
    /// Id of the mirror dispatched to the peer; replies reference this.
    pub relayed_message_id: Option<String>,
    /// Milliseconds since the epoch.
    pub at: i64,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub attachment_url: Option<String>,
    /// True for messages the call checks refused to relay.
    pub blocked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CallRecord {
        let side = |channel: &str, server: &str| CallParticipant {
            channel_id: channel.to_string(),
            server_id: server.to_string(),
            webhook_url: format!("https://hooks.example/{channel}"),
            users: BTreeSet::new(),
            joined_at: 0,
        };
        CallRecord {
            call_id: "call-1".into(),
            status: CallStatus::Active,
            started_at: 10_000,
            ended_at: None,
            last_activity: 10_000,
            participants: [side("ch-1", "s-1"), side("ch-2", "s-2")],
        }
    }

    #[test]
    fn peer_resolution() {
        let record = record();
        assert_eq!(record.peer_of("ch-1").unwrap().channel_id, "ch-2");
        assert_eq!(record.peer_of("ch-2").unwrap().channel_id, "ch-1");
        assert!(record.side("ch-3").is_none());
    }

    #[test]
    fn duration_uses_end_when_present() {
        let mut record = record();
        assert_eq!(record.duration_secs(70_000), 60);
        record.ended_at = Some(40_000);
        assert_eq!(record.duration_secs(999_999), 30);
    }
}
