//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

/// Returns `true` (for serde defaults).
pub fn default_true() -> bool {
    true
}

// =============================================================================
// Cache Defaults
// =============================================================================

pub fn default_cache_ttl() -> u64 {
    300
}

// =============================================================================
// Relay / Fan-out Defaults
// =============================================================================

pub fn default_fanout_timeout_ms() -> u64 {
    5_000
}

pub fn default_fanout_max_concurrency() -> usize {
    16
}

pub fn default_fanout_max_retries() -> u32 {
    2
}

pub fn default_broadcast_retention() -> u64 {
    86_400
}

pub fn default_unhealthy_after_failures() -> u32 {
    3
}

pub fn default_disconnect_after_failures() -> u32 {
    12
}

pub fn default_notice_cooldown() -> u64 {
    60
}

pub fn default_blocked_message_responses() -> Vec<String> {
    vec![
        "Your message was not relayed.".to_string(),
        "That message could not be delivered to the hub.".to_string(),
    ]
}

// =============================================================================
// Rules Gate Defaults
// =============================================================================

pub fn default_rules_prompt_cooldown() -> u64 {
    300
}

pub fn default_rules_accepted_ttl() -> u64 {
    300
}

// =============================================================================
// Spam Defaults
// =============================================================================

pub fn default_spam_window_ms() -> u64 {
    5_000
}

pub fn default_spam_max_messages() -> u32 {
    5
}

// =============================================================================
// Call Defaults
// =============================================================================

pub fn default_matchmaker_max_wait() -> u64 {
    180
}

pub fn default_recent_match_cooldown() -> u64 {
    300
}

pub fn default_call_message_retention() -> u64 {
    1_800
}

pub fn default_call_idle_timeout() -> u64 {
    900
}

pub fn default_typing_refractory_ms() -> u64 {
    8_000
}

pub fn default_call_link_allowlist() -> Vec<String> {
    vec!["tenor.com".to_string(), "giphy.com".to_string()]
}

pub fn default_call_ring_capacity() -> usize {
    50
}

// =============================================================================
// Hub Management Defaults
// =============================================================================

pub fn default_max_hubs_per_owner() -> u32 {
    3
}

pub fn default_max_connections_per_hub() -> u32 {
    100
}

// =============================================================================
// KV Defaults
// =============================================================================

pub fn default_kv_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
