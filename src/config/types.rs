//! Configuration type definitions.
//!
//! All the sub-config structs used by the main Config.

use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;

use super::defaults::{
    default_blocked_message_responses, default_broadcast_retention, default_cache_ttl,
    default_call_idle_timeout, default_call_link_allowlist, default_call_message_retention,
    default_call_ring_capacity, default_disconnect_after_failures, default_fanout_max_concurrency,
    default_fanout_max_retries, default_fanout_timeout_ms, default_kv_url,
    default_matchmaker_max_wait, default_max_connections_per_hub, default_max_hubs_per_owner,
    default_notice_cooldown, default_recent_match_cooldown, default_rules_accepted_ttl,
    default_rules_prompt_cooldown, default_spam_max_messages, default_spam_window_ms, default_true,
    default_typing_refractory_ms, default_unhealthy_after_failures,
};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Machine-readable JSON lines.
    Json,
    /// Human-readable output for interactive use.
    #[default]
    Pretty,
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Daemon identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Instance name (e.g., "interchat-eu-1"). Used in startup logging.
    pub name: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prometheus metrics HTTP port (default 9090, 0 disables).
    pub metrics_port: Option<u16>,
    /// User ids with staff-level moderation access.
    #[serde(default)]
    pub admin_user_ids: HashSet<String>,
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    pub path: String,
}

// =============================================================================
// Shared KV Configuration
// =============================================================================

/// Backend selection for the shared key-value cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KvBackend {
    /// Process-local store. Single-instance deployments and tests.
    #[default]
    Memory,
    /// Redis, shared across daemon processes.
    Redis,
}

/// Shared key-value cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct KvConfig {
    /// Which backend to use.
    #[serde(default)]
    pub backend: KvBackend,
    /// Redis connection URL (ignored for the memory backend).
    #[serde(default = "default_kv_url")]
    pub url: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            backend: KvBackend::Memory,
            url: default_kv_url(),
        }
    }
}

// =============================================================================
// Chat Transport Configuration
// =============================================================================

/// Outbound chat transport configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TransportConfig {
    /// Base URL of the platform REST API (webhook management, notices).
    #[serde(default)]
    pub api_base: String,
    /// Bot token presented on API calls.
    #[serde(default)]
    pub token: String,
}

// =============================================================================
// Cache Configuration
// =============================================================================

/// Connection/hub cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// TTL for connection and hub cache entries, in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
        }
    }
}

// =============================================================================
// Relay / Broadcast Configuration
// =============================================================================

/// Fan-out and delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Per-sibling outbound webhook call timeout, in milliseconds.
    #[serde(default = "default_fanout_timeout_ms")]
    pub fanout_timeout_ms: u64,
    /// Maximum concurrent in-flight fan-outs per hub.
    #[serde(default = "default_fanout_max_concurrency")]
    pub fanout_max_concurrency: usize,
    /// Bounded retries per sibling on transient transport errors.
    #[serde(default = "default_fanout_max_retries")]
    pub fanout_max_retries: u32,
    /// Broadcast record retention, in seconds.
    #[serde(default = "default_broadcast_retention")]
    pub broadcast_retention_secs: u64,
    /// Consecutive sibling failures before the sibling is skipped.
    #[serde(default = "default_unhealthy_after_failures")]
    pub unhealthy_after_failures: u32,
    /// Consecutive sibling failures before the connection is disconnected.
    #[serde(default = "default_disconnect_after_failures")]
    pub disconnect_after_failures: u32,
    /// Cooldown for author-facing "message blocked" notices, in seconds.
    #[serde(default = "default_notice_cooldown")]
    pub notice_cooldown_secs: u64,
    /// Response lines cycled through when notifying a blocked author.
    #[serde(default = "default_blocked_message_responses")]
    pub blocked_message_responses: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            fanout_timeout_ms: default_fanout_timeout_ms(),
            fanout_max_concurrency: default_fanout_max_concurrency(),
            fanout_max_retries: default_fanout_max_retries(),
            broadcast_retention_secs: default_broadcast_retention(),
            unhealthy_after_failures: default_unhealthy_after_failures(),
            disconnect_after_failures: default_disconnect_after_failures(),
            notice_cooldown_secs: default_notice_cooldown(),
            blocked_message_responses: default_blocked_message_responses(),
        }
    }
}

// =============================================================================
// Rules Gate Configuration
// =============================================================================

/// Hub rules acceptance gate configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    /// Cooldown between rules prompts per (user, hub), in seconds.
    #[serde(default = "default_rules_prompt_cooldown")]
    pub prompt_cooldown_secs: u64,
    /// TTL of the positive "accepted" marker, in seconds.
    #[serde(default = "default_rules_accepted_ttl")]
    pub accepted_marker_ttl_secs: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            prompt_cooldown_secs: default_rules_prompt_cooldown(),
            accepted_marker_ttl_secs: default_rules_accepted_ttl(),
        }
    }
}

// =============================================================================
// Spam Configuration
// =============================================================================

/// Token-bucket spam check configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SpamConfig {
    /// Sliding window length, in milliseconds.
    #[serde(default = "default_spam_window_ms")]
    pub window_ms: u64,
    /// Messages allowed inside one window.
    #[serde(default = "default_spam_max_messages")]
    pub max_messages: u32,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            window_ms: default_spam_window_ms(),
            max_messages: default_spam_max_messages(),
        }
    }
}

// =============================================================================
// Call Configuration
// =============================================================================

/// Matchmaker and call session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CallsConfig {
    /// Maximum time a call request may wait in the queue, in seconds.
    #[serde(default = "default_matchmaker_max_wait")]
    pub matchmaker_max_wait_secs: u64,
    /// Cooldown before the same pair may be re-matched, in seconds.
    #[serde(default = "default_recent_match_cooldown")]
    pub recent_match_cooldown_secs: u64,
    /// Retention of call messages and reports, in seconds.
    #[serde(default = "default_call_message_retention")]
    pub message_retention_secs: u64,
    /// Idle timeout after which the sweeper ends a silent call, in seconds.
    #[serde(default = "default_call_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Minimum spacing between relayed typing indicators, in milliseconds.
    #[serde(default = "default_typing_refractory_ms")]
    pub typing_refractory_ms: u64,
    /// Domains allowed in call links (GIF hosts).
    #[serde(default = "default_call_link_allowlist")]
    pub link_allowlist: Vec<String>,
    /// Capacity of the per-call recent-messages ring.
    #[serde(default = "default_call_ring_capacity")]
    pub ring_capacity: usize,
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            matchmaker_max_wait_secs: default_matchmaker_max_wait(),
            recent_match_cooldown_secs: default_recent_match_cooldown(),
            message_retention_secs: default_call_message_retention(),
            idle_timeout_secs: default_call_idle_timeout(),
            typing_refractory_ms: default_typing_refractory_ms(),
            link_allowlist: default_call_link_allowlist(),
            ring_capacity: default_call_ring_capacity(),
        }
    }
}

// =============================================================================
// Hub Management Configuration
// =============================================================================

/// Hub creation and membership limits.
#[derive(Debug, Clone, Deserialize)]
pub struct HubsConfig {
    /// Maximum hubs a single owner may create.
    #[serde(default = "default_max_hubs_per_owner")]
    pub max_hubs_per_owner: u32,
    /// Maximum connections a hub may hold.
    #[serde(default = "default_max_connections_per_hub")]
    pub max_connections_per_hub: u32,
    /// Whether newly created hubs default to private visibility.
    #[serde(default = "default_true")]
    pub private_by_default: bool,
}

impl Default for HubsConfig {
    fn default() -> Self {
        Self {
            max_hubs_per_owner: default_max_hubs_per_owner(),
            max_connections_per_hub: default_max_connections_per_hub(),
            private_by_default: true,
        }
    }
}

// =============================================================================
// Root Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Instance identity.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: Option<DatabaseConfig>,
    /// Shared key-value cache configuration.
    #[serde(default)]
    pub kv: KvConfig,
    /// Outbound chat transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Connection/hub cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Fan-out and delivery configuration.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Rules gate configuration.
    #[serde(default)]
    pub rules: RulesConfig,
    /// Spam check configuration.
    #[serde(default)]
    pub spam: SpamConfig,
    /// Matchmaker and call session configuration.
    #[serde(default)]
    pub calls: CallsConfig,
    /// Hub creation and membership limits.
    #[serde(default)]
    pub hubs: HubsConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            name = "test"
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.relay.fanout_timeout_ms, 5_000);
        assert_eq!(config.spam.max_messages, 5);
        assert_eq!(config.kv.backend, KvBackend::Memory);
        assert_eq!(config.calls.recent_match_cooldown_secs, 300);
        assert!(config.hubs.private_by_default);
    }

    #[test]
    fn sections_override_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            name = "test"
            log_format = "json"
            admin_user_ids = ["u1", "u2"]

            [kv]
            backend = "redis"
            url = "redis://cache:6379"

            [relay]
            fanout_max_concurrency = 4
            blocked_message_responses = ["nope"]

            [calls]
            matchmaker_max_wait_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.server.log_format, LogFormat::Json);
        assert_eq!(config.server.admin_user_ids.len(), 2);
        assert_eq!(config.kv.backend, KvBackend::Redis);
        assert_eq!(config.relay.fanout_max_concurrency, 4);
        assert_eq!(config.relay.blocked_message_responses, vec!["nope"]);
        assert_eq!(config.calls.matchmaker_max_wait_secs, 60);
    }
}
