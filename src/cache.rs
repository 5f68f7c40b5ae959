//! Two-tier connection/hub cache.
//!
//! Hot-path channel resolution reads a process-local DashMap tier in front
//! of the shared KV, falling back to the authoritative store on miss. Both
//! tiers carry the configured TTL. Population writes the shared tier before
//! the local tier so a process never holds an entry the shared tier has not
//! seen. Invalidation removes both keys in both tiers.
//!
//! Staleness up to the TTL is acceptable by contract: admission re-reads ban
//! and rules state from authoritative sources.

use crate::db::{ConnectionRecord, Database, HubRecord};
use crate::error::RelayError;
use crate::kv::{KvStore, keys};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A hub together with its connected connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubWithConnections {
    pub hub: HubRecord,
    pub connections: Vec<ConnectionRecord>,
}

/// The result of resolving a channel on the hot path.
#[derive(Debug, Clone)]
pub struct ResolvedChannel {
    pub hub: HubRecord,
    pub connection: ConnectionRecord,
    /// Every other connected connection in the hub.
    pub siblings: Vec<ConnectionRecord>,
}

struct LocalEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T: Clone> LocalEntry<T> {
    fn fresh(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn live(&self) -> Option<T> {
        (Instant::now() < self.expires_at).then(|| self.value.clone())
    }
}

/// Two-tier cache over connection and hub records.
pub struct CacheLayer {
    kv: Arc<dyn KvStore>,
    db: Database,
    ttl: Duration,
    local_connections: DashMap<String, LocalEntry<ConnectionRecord>>,
    local_hubs: DashMap<String, LocalEntry<HubWithConnections>>,
}

impl CacheLayer {
    pub fn new(kv: Arc<dyn KvStore>, db: Database, ttl: Duration) -> Self {
        Self {
            kv,
            db,
            ttl,
            local_connections: DashMap::new(),
            local_hubs: DashMap::new(),
        }
    }

    /// Resolve a channel into its hub, connection, and siblings.
    ///
    /// Returns `None` for channels with no connected connection, and for
    /// connections whose hub has vanished (the stale connection key is
    /// dropped so the next read goes authoritative).
    pub async fn resolve_channel(
        &self,
        channel_id: &str,
    ) -> Result<Option<ResolvedChannel>, RelayError> {
        let Some(connection) = self.get_connection(channel_id).await? else {
            return Ok(None);
        };
        if !connection.connected {
            return Ok(None);
        }

        let Some(entry) = self.get_hub(&connection.hub_id).await? else {
            debug!(channel_id = %channel_id, hub_id = %connection.hub_id, "Connection points at missing hub, dropping cache entry");
            self.remove_connection_keys(channel_id).await?;
            return Ok(None);
        };

        let siblings = entry
            .connections
            .iter()
            .filter(|c| c.connected && c.channel_id != channel_id)
            .cloned()
            .collect();

        Ok(Some(ResolvedChannel {
            hub: entry.hub,
            connection,
            siblings,
        }))
    }

    /// Connection lookup through both tiers, populating on miss.
    pub async fn get_connection(
        &self,
        channel_id: &str,
    ) -> Result<Option<ConnectionRecord>, RelayError> {
        if let Some(entry) = self.local_connections.get(channel_id)
            && let Some(value) = entry.live()
        {
            crate::metrics::CACHE_HITS.inc();
            return Ok(Some(value));
        }

        let key = keys::connection(channel_id);
        if let Some(raw) = self.kv.get(&key).await? {
            if let Ok(record) = serde_json::from_str::<ConnectionRecord>(&raw) {
                crate::metrics::CACHE_HITS.inc();
                self.local_connections.insert(
                    channel_id.to_string(),
                    LocalEntry::fresh(record.clone(), self.ttl),
                );
                return Ok(Some(record));
            }
            // Undecodable entry: drop and fall through to the store.
            self.kv.del(&key).await?;
        }

        crate::metrics::CACHE_MISSES.inc();
        let Some(record) = self.db.connections().find_by_channel(channel_id).await? else {
            return Ok(None);
        };

        // Shared tier first, then local.
        self.kv
            .set(&key, &serde_json::to_string(&record).map_err(crate::kv::KvError::from)?, Some(self.ttl))
            .await?;
        self.local_connections.insert(
            channel_id.to_string(),
            LocalEntry::fresh(record.clone(), self.ttl),
        );
        Ok(Some(record))
    }

    /// Hub lookup through both tiers, populating on miss.
    pub async fn get_hub(&self, hub_id: &str) -> Result<Option<HubWithConnections>, RelayError> {
        if let Some(entry) = self.local_hubs.get(hub_id)
            && let Some(value) = entry.live()
        {
            crate::metrics::CACHE_HITS.inc();
            return Ok(Some(value));
        }

        let key = keys::hub_data(hub_id);
        if let Some(raw) = self.kv.get(&key).await? {
            if let Ok(entry) = serde_json::from_str::<HubWithConnections>(&raw) {
                crate::metrics::CACHE_HITS.inc();
                self.local_hubs
                    .insert(hub_id.to_string(), LocalEntry::fresh(entry.clone(), self.ttl));
                return Ok(Some(entry));
            }
            self.kv.del(&key).await?;
        }

        crate::metrics::CACHE_MISSES.inc();
        let Some(hub) = self.db.hubs().find(hub_id).await? else {
            return Ok(None);
        };
        let connections = self.db.connections().find_connected_by_hub(hub_id).await?;
        let entry = HubWithConnections { hub, connections };

        self.kv
            .set(&key, &serde_json::to_string(&entry).map_err(crate::kv::KvError::from)?, Some(self.ttl))
            .await?;
        self.local_hubs
            .insert(hub_id.to_string(), LocalEntry::fresh(entry.clone(), self.ttl));
        Ok(Some(entry))
    }

    /// Invalidate after a connection or hub mutation.
    ///
    /// When the caller only knows the channel, the connection is read from
    /// the store to discover the hub before both keys are removed.
    pub async fn on_connection_modified(
        &self,
        channel_id: &str,
        hub_id: Option<&str>,
    ) -> Result<(), RelayError> {
        let hub_id = match hub_id {
            Some(id) => Some(id.to_string()),
            None => self
                .db
                .connections()
                .find_by_channel(channel_id)
                .await?
                .map(|c| c.hub_id),
        };

        self.remove_connection_keys(channel_id).await?;
        if let Some(hub_id) = hub_id {
            self.on_hub_modified(&hub_id).await?;
        }
        Ok(())
    }

    /// Invalidate a hub entry (rename, roster change, delete).
    pub async fn on_hub_modified(&self, hub_id: &str) -> Result<(), RelayError> {
        self.local_hubs.remove(hub_id);
        self.kv.del(&keys::hub_data(hub_id)).await?;
        Ok(())
    }

    async fn remove_connection_keys(&self, channel_id: &str) -> Result<(), RelayError> {
        self.local_connections.remove(channel_id);
        self.kv.del(&keys::connection(channel_id)).await?;
        Ok(())
    }

    /// Drop expired local entries. Called by the background pruning task.
    pub fn prune_local(&self) -> usize {
        let now = Instant::now();
        let before = self.local_connections.len() + self.local_hubs.len();
        self.local_connections.retain(|_, e| now < e.expires_at);
        self.local_hubs.retain(|_, e| now < e.expires_at);
        before - (self.local_connections.len() + self.local_hubs.len())
    }
}
