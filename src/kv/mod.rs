//! Shared key-value cache.
//!
//! One logical namespace shared by every daemon process: connection/hub
//! cache entries, rules markers, the matchmaker queue, call state, and
//! broadcast records all live here under TTLs. The [`KvStore`] trait keeps
//! the core independent of the backend: [`memory::MemoryKv`] for
//! single-instance deployments and tests, [`redis_store::RedisKv`] for
//! multi-process deployments.

pub mod keys;
pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// KV errors.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("stored value is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Operations the core needs from the shared cache.
///
/// Strings in, strings out; structured values are JSON. Lists are FIFO:
/// pushes append at the tail, snapshots read head-first.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Set a value, with an optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Set only if the key is absent. Returns whether the write won.
    /// This is the cross-process claim primitive.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>)
    -> Result<bool, KvError>;

    async fn del(&self, key: &str) -> Result<(), KvError>;

    /// Atomic integer increment, creating the key at zero.
    async fn incr(&self, key: &str, by: i64) -> Result<i64, KvError>;

    /// Append to the tail of a FIFO list.
    async fn list_push(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Snapshot the whole list, oldest first.
    async fn list_all(&self, key: &str) -> Result<Vec<String>, KvError>;

    /// Remove the first occurrence of an exact value. Returns whether
    /// anything was removed; losing this race is how competing dequeuers
    /// are serialized.
    async fn list_remove(&self, key: &str, value: &str) -> Result<bool, KvError>;

    async fn list_len(&self, key: &str) -> Result<u64, KvError>;

    /// Drop the oldest entries so at most `keep` newest remain.
    async fn list_trim_to_newest(&self, key: &str, keep: u64) -> Result<(), KvError>;

    /// Reset a key's TTL.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError>;
}
