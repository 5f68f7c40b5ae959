//! Fire-and-forget stats sinks.
//!
//! Leaderboard increments and shard counters ride on the KV; failures are
//! logged and never affect the relay path. Each record spawns its own task
//! so the hot path does not await the sink.

use crate::kv::{KvStore, keys};
use std::sync::Arc;
use tracing::debug;

/// Asynchronous stats sink.
#[derive(Clone)]
pub struct StatsSink {
    kv: Arc<dyn KvStore>,
}

impl StatsSink {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Record one relayed hub message: author and server leaderboards plus
    /// the hub's message counter.
    pub fn record_hub_message(&self, user_id: &str, server_id: &str, hub_id: &str) {
        let kv = Arc::clone(&self.kv);
        let user = keys::leaderboard("user", user_id);
        let server = keys::leaderboard("server", server_id);
        let hub = keys::leaderboard("hub", hub_id);

        tokio::spawn(async move {
            for key in [user, server, hub] {
                if let Err(e) = kv.incr(&key, 1).await {
                    debug!(key = %key, error = %e, "Stats increment failed");
                }
            }
        });
    }

    /// Record a completed call for both participating servers.
    pub fn record_call(&self, server_a: &str, server_b: &str) {
        let kv = Arc::clone(&self.kv);
        let a = keys::leaderboard("calls", server_a);
        let b = keys::leaderboard("calls", server_b);

        tokio::spawn(async move {
            for key in [a, b] {
                if let Err(e) = kv.incr(&key, 1).await {
                    debug!(key = %key, error = %e, "Stats increment failed");
                }
            }
        });
    }
}
