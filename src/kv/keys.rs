//! Key templates for the shared KV namespace.
//!
//! Every key the daemon writes is minted here, so the layout is auditable
//! in one place. Pair keys are order-independent.

/// Connection record cache: `hub:connection:{channelId}`.
pub fn connection(channel_id: &str) -> String {
    format!("hub:connection:{channel_id}")
}

/// Hub + connections cache: `hub:data:{hubId}`.
pub fn hub_data(hub_id: &str) -> String {
    format!("hub:data:{hub_id}")
}

/// Positive rules marker: `rules:accepted:{hubId}:{userId}`.
pub fn rules_accepted(hub_id: &str, user_id: &str) -> String {
    format!("rules:accepted:{hub_id}:{user_id}")
}

/// Rules prompt cooldown: `rules:shown:{hubId}:{userId}`.
pub fn rules_shown(hub_id: &str, user_id: &str) -> String {
    format!("rules:shown:{hub_id}:{user_id}")
}

/// Matchmaker FIFO queue.
pub const CALL_QUEUE: &str = "call:queue";

/// Channel → call id mapping: `call:active:{channelId}`.
pub fn call_active(channel_id: &str) -> String {
    format!("call:active:{channel_id}")
}

/// Retained call record: `call:session:{callId}`.
pub fn call_session(call_id: &str) -> String {
    format!("call:session:{call_id}")
}

/// Matchmaker dequeue claim: `call:claim:{channelId}`.
pub fn call_claim(channel_id: &str) -> String {
    format!("call:claim:{channel_id}")
}

/// Recent-pair exclusion: `call:recent_matches:{pairKey}`.
///
/// The pair key sorts its two channel ids so (A,B) and (B,A) collide.
pub fn recent_match(channel_a: &str, channel_b: &str) -> String {
    let (lo, hi) = if channel_a <= channel_b {
        (channel_a, channel_b)
    } else {
        (channel_b, channel_a)
    };
    format!("call:recent_matches:{lo}:{hi}")
}

/// Call recent-messages ring: `call:messages:{callId}`.
pub fn call_messages(call_id: &str) -> String {
    format!("call:messages:{call_id}")
}

/// Filed report: `call:report:{callId}`.
pub fn call_report(call_id: &str) -> String {
    format!("call:report:{call_id}")
}

/// Broadcast record: `broadcast:{sourceMsgId}`.
pub fn broadcast(source_message_id: &str) -> String {
    format!("broadcast:{source_message_id}")
}

/// Reverse index: `broadcast:rev:{siblingMsgId}`.
pub fn broadcast_rev(sibling_message_id: &str) -> String {
    format!("broadcast:rev:{sibling_message_id}")
}

/// Leaderboard counters: `leaderboard:{scope}:{id}`.
pub fn leaderboard(scope: &str, id: &str) -> String {
    format!("leaderboard:{scope}:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_match_is_order_independent() {
        assert_eq!(recent_match("ch2", "ch1"), recent_match("ch1", "ch2"));
        assert_eq!(recent_match("ch1", "ch2"), "call:recent_matches:ch1:ch2");
    }
}
