//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::types::{Config, KvBackend};
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("server.name is required")]
    MissingServerName,
    #[error("kv.url is required when kv.backend is \"redis\"")]
    MissingKvUrl,
    #[error("kv.url must be a redis:// or rediss:// URL, got '{0}'")]
    InvalidKvUrl(String),
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
    #[error("relay.fanout_max_concurrency must be at least 1")]
    ZeroFanoutConcurrency,
    #[error("relay.fanout_timeout_ms must be at least 100")]
    FanoutTimeoutTooShort,
    #[error("spam.max_messages must be at least 1")]
    ZeroSpamBudget,
    #[error("spam.window_ms must be at least 1")]
    ZeroSpamWindow,
    #[error("calls.ring_capacity must be at least 1")]
    ZeroRingCapacity,
    #[error("calls.matchmaker_max_wait_secs must be at least 1")]
    ZeroMatchmakerWait,
    #[error("hubs.max_hubs_per_owner must be at least 1")]
    ZeroHubQuota,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.name.is_empty() {
        errors.push(ValidationError::MissingServerName);
    }

    if config.kv.backend == KvBackend::Redis {
        if config.kv.url.is_empty() {
            errors.push(ValidationError::MissingKvUrl);
        } else if !config.kv.url.starts_with("redis://") && !config.kv.url.starts_with("rediss://")
        {
            errors.push(ValidationError::InvalidKvUrl(config.kv.url.clone()));
        }
    }

    if let Some(ref db) = config.database {
        let db_path = Path::new(&db.path);
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            errors.push(ValidationError::DatabasePathInvalid(
                parent.display().to_string(),
            ));
        }
    }

    if config.relay.fanout_max_concurrency == 0 {
        errors.push(ValidationError::ZeroFanoutConcurrency);
    }
    if config.relay.fanout_timeout_ms < 100 {
        errors.push(ValidationError::FanoutTimeoutTooShort);
    }
    if config.spam.max_messages == 0 {
        errors.push(ValidationError::ZeroSpamBudget);
    }
    if config.spam.window_ms == 0 {
        errors.push(ValidationError::ZeroSpamWindow);
    }
    if config.calls.ring_capacity == 0 {
        errors.push(ValidationError::ZeroRingCapacity);
    }
    if config.calls.matchmaker_max_wait_secs == 0 {
        errors.push(ValidationError::ZeroMatchmakerWait);
    }
    if config.hubs.max_hubs_per_owner == 0 {
        errors.push(ValidationError::ZeroHubQuota);
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        toml::from_str(
            r#"
            [server]
            name = "test"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn collects_all_violations() {
        let mut config = base_config();
        config.server.name.clear();
        config.relay.fanout_max_concurrency = 0;
        config.spam.max_messages = 0;

        let errors = validate(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn redis_backend_requires_redis_url() {
        let mut config = base_config();
        config.kv.backend = KvBackend::Redis;
        config.kv.url = "http://not-redis".to_string();

        let errors = validate(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidKvUrl(_)));
    }
}
