//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config and its sections)
//! - [`defaults`]: Serde default value functions
//! - [`validation`]: Startup validation collecting all violations

mod defaults;
mod types;
mod validation;

pub use types::{
    CacheConfig, CallsConfig, Config, ConfigError, DatabaseConfig, HubsConfig, KvBackend,
    KvConfig, LogFormat, RelayConfig, RulesConfig, ServerConfig, SpamConfig, TransportConfig,
};
pub use validation::{ValidationError, validate};
