//! Entity store adapter.
//!
//! The single mutation boundary for hub and connection state. Every helper
//! here that writes a connection or hub funnels cache invalidation before
//! returning, so no mutation path can forget it. Reads that admission must
//! trust (bans, rules acceptance) go straight to the repositories and never
//! through the cache.

use crate::cache::{CacheLayer, ResolvedChannel};
use crate::db::{
    BanRecord, BanScope, ConnectionRecord, Database, DbError, HubRecord,
};
use crate::error::RelayError;
use std::sync::Arc;

/// Typed store facade used by the rest of the daemon.
#[derive(Clone)]
pub struct EntityStore {
    db: Database,
    cache: Arc<CacheLayer>,
}

impl EntityStore {
    pub fn new(db: Database, cache: Arc<CacheLayer>) -> Self {
        Self { db, cache }
    }

    /// Raw database handle, for subsystems with their own repositories.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// The cache layer, for hot-path resolution.
    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Hot-path channel resolution (cached).
    pub async fn resolve_channel(
        &self,
        channel_id: &str,
    ) -> Result<Option<ResolvedChannel>, RelayError> {
        self.cache.resolve_channel(channel_id).await
    }

    /// Authoritative connection read (uncached).
    pub async fn find_connection(
        &self,
        channel_id: &str,
    ) -> Result<Option<ConnectionRecord>, DbError> {
        self.db.connections().find_by_channel(channel_id).await
    }

    pub async fn find_hub(&self, hub_id: &str) -> Result<Option<HubRecord>, DbError> {
        self.db.hubs().find(hub_id).await
    }

    pub async fn find_hub_by_name(&self, name: &str) -> Result<Option<HubRecord>, DbError> {
        self.db.hubs().find_by_name(name).await
    }

    pub async fn find_rules_acceptance(
        &self,
        user_id: &str,
        hub_id: &str,
    ) -> Result<bool, DbError> {
        self.db.hubs().find_acceptance(user_id, hub_id).await
    }

    pub async fn create_rules_acceptance(
        &self,
        user_id: &str,
        hub_id: &str,
    ) -> Result<(), DbError> {
        self.db.hubs().create_acceptance(user_id, hub_id).await
    }

    pub async fn find_active_ban(&self, user_id: &str) -> Result<Option<BanRecord>, DbError> {
        self.db.bans().find_active(BanScope::User, user_id).await
    }

    pub async fn find_active_server_ban(
        &self,
        server_id: &str,
    ) -> Result<Option<BanRecord>, DbError> {
        self.db.bans().find_active(BanScope::Server, server_id).await
    }

    // ========================================================================
    // Connection mutations (each invalidates before returning)
    // ========================================================================

    /// Create or update a connection.
    pub async fn upsert_connection(&self, connection: &ConnectionRecord) -> Result<(), RelayError> {
        self.db.connections().upsert(connection).await?;
        self.cache
            .on_connection_modified(&connection.channel_id, Some(&connection.hub_id))
            .await
    }

    /// Delete a connection.
    pub async fn delete_connection(&self, channel_id: &str) -> Result<bool, RelayError> {
        // Read first so the hub key can be invalidated after the row is gone.
        let hub_id = self
            .db
            .connections()
            .find_by_channel(channel_id)
            .await?
            .map(|c| c.hub_id);

        let deleted = self.db.connections().delete(channel_id).await?;
        self.cache
            .on_connection_modified(channel_id, hub_id.as_deref())
            .await?;
        Ok(deleted)
    }

    /// Store (or clear, with an empty string) a connection's webhook URL.
    pub async fn set_connection_webhook_url(
        &self,
        channel_id: &str,
        webhook_url: &str,
    ) -> Result<bool, RelayError> {
        let updated = self
            .db
            .connections()
            .set_webhook_url(channel_id, webhook_url)
            .await?;
        self.cache.on_connection_modified(channel_id, None).await?;
        Ok(updated)
    }

    /// Flip a connection's connected flag.
    pub async fn set_connection_connected(
        &self,
        channel_id: &str,
        connected: bool,
    ) -> Result<bool, RelayError> {
        let updated = self
            .db
            .connections()
            .set_connected(channel_id, connected)
            .await?;
        self.cache.on_connection_modified(channel_id, None).await?;
        Ok(updated)
    }

    /// Refresh a connection's activity timestamp.
    ///
    /// Deliberately does not invalidate: activity tolerates cache staleness
    /// up to the TTL, and invalidating per message would defeat the cache.
    pub async fn touch_connection_activity(&self, channel_id: &str) -> Result<(), DbError> {
        self.db.connections().touch_last_active(channel_id).await
    }

    // ========================================================================
    // Hub mutations (each invalidates before returning)
    // ========================================================================

    /// Create a hub.
    pub async fn create_hub(&self, hub: &HubRecord) -> Result<(), DbError> {
        self.db.hubs().create(hub).await
    }

    /// Delete a hub and cascade to its connections, invalidating every
    /// affected channel key.
    pub async fn delete_hub(&self, hub_id: &str) -> Result<Vec<String>, RelayError> {
        let channels = self.db.hubs().delete_cascade(hub_id).await?;
        for channel_id in &channels {
            // Rows are already gone; remove the channel keys directly.
            self.cache.on_connection_modified(channel_id, Some(hub_id)).await?;
        }
        self.cache.on_hub_modified(hub_id).await?;
        Ok(channels)
    }

    /// Replace a hub's rules, invalidating its cache entry.
    pub async fn set_hub_rules(
        &self,
        hub_id: &str,
        rules: &[String],
    ) -> Result<bool, RelayError> {
        let updated = self.db.hubs().set_rules(hub_id, rules).await?;
        self.cache.on_hub_modified(hub_id).await?;
        Ok(updated)
    }
}
