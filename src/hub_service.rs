//! Hub and connection management.
//!
//! Pure orchestration over the entity store: create a hub, connect a
//! channel, disconnect, delete. Validation failures surface as specific
//! [`HubError`]s for the initiator; every mutation goes through the store
//! adapter so cache invalidation cannot be skipped.

use crate::config::HubsConfig;
use crate::db::{ConnectionRecord, HubRecord};
use crate::error::HubError;
use crate::store::EntityStore;
use crate::webhooks::WebhookProvisioner;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Maximum hub name length, stable once chosen.
const MAX_HUB_NAME_LEN: usize = 32;

/// Hub lifecycle orchestration.
pub struct HubService {
    store: EntityStore,
    provisioner: Arc<WebhookProvisioner>,
    config: HubsConfig,
}

impl HubService {
    pub fn new(store: EntityStore, provisioner: Arc<WebhookProvisioner>, config: HubsConfig) -> Self {
        Self {
            store,
            provisioner,
            config,
        }
    }

    /// Create a hub, enforcing the owner quota and name uniqueness.
    pub async fn create_hub(
        &self,
        owner_user_id: &str,
        name: &str,
        description: &str,
    ) -> Result<HubRecord, HubError> {
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_HUB_NAME_LEN {
            return Err(HubError::NameInvalid(name.to_string()));
        }

        let owned = self.store.db().hubs().count_by_owner(owner_user_id).await?;
        if owned >= self.config.max_hubs_per_owner {
            return Err(HubError::QuotaExceeded);
        }

        if self.store.find_hub_by_name(name).await?.is_some() {
            return Err(HubError::NameTaken(name.to_string()));
        }

        let hub = HubRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            owner_user_id: owner_user_id.to_string(),
            private: self.config.private_by_default,
            rules: Vec::new(),
            icon_url: None,
            allow_nsfw: false,
            created_at: Utc::now().timestamp(),
        };
        self.store.create_hub(&hub).await?;
        info!(hub_id = %hub.id, name = %hub.name, owner = %owner_user_id, "Hub created");
        Ok(hub)
    }

    /// Connect a channel to a hub: creates the connection, provisions its
    /// webhook, and invalidates the caches through the store.
    pub async fn join_hub(
        &self,
        hub_name: &str,
        channel_id: &str,
        server_id: &str,
    ) -> Result<ConnectionRecord, HubError> {
        let Some(hub) = self.store.find_hub_by_name(hub_name).await? else {
            return Err(HubError::HubNotFound);
        };

        if let Some(existing) = self.store.find_connection(channel_id).await?
            && existing.connected
        {
            return Err(HubError::ChannelAlreadyConnected);
        }

        let members = self.store.db().connections().count_by_hub(&hub.id).await?;
        if members >= self.config.max_connections_per_hub {
            return Err(HubError::HubFull);
        }

        let webhook_url = self
            .provisioner
            .get_or_create(channel_id)
            .await
            .map_err(|_| HubError::WebhookUnavailable)?;

        let connection = ConnectionRecord {
            id: Uuid::new_v4().to_string(),
            channel_id: channel_id.to_string(),
            server_id: server_id.to_string(),
            hub_id: hub.id.clone(),
            connected: true,
            webhook_url,
            compact: false,
            embed_color: None,
            invite: None,
            last_active: Utc::now().timestamp(),
        };
        self.store
            .upsert_connection(&connection)
            .await
            .map_err(relay_to_hub_error)?;
        info!(hub_id = %hub.id, channel_id = %channel_id, "Channel connected to hub");
        Ok(connection)
    }

    /// Disconnect a channel from its hub (the row stays for reconnection).
    pub async fn leave_hub(&self, channel_id: &str) -> Result<(), HubError> {
        let updated = self
            .store
            .set_connection_connected(channel_id, false)
            .await
            .map_err(relay_to_hub_error)?;
        if !updated {
            return Err(HubError::NotConnected);
        }
        info!(channel_id = %channel_id, "Channel disconnected from hub");
        Ok(())
    }

    /// Delete a hub. Owner or staff only; cascades to its connections.
    pub async fn delete_hub(
        &self,
        hub_id: &str,
        actor_user_id: &str,
        actor_is_staff: bool,
    ) -> Result<(), HubError> {
        let Some(hub) = self.store.find_hub(hub_id).await? else {
            return Err(HubError::HubNotFound);
        };
        if hub.owner_user_id != actor_user_id && !actor_is_staff {
            return Err(HubError::NotAuthorized);
        }

        let channels = self
            .store
            .delete_hub(hub_id)
            .await
            .map_err(relay_to_hub_error)?;
        info!(hub_id = %hub_id, connections = channels.len(), "Hub deleted");
        Ok(())
    }
}

/// Store-adapter failures carry cache errors too; fold them into the
/// management taxonomy.
fn relay_to_hub_error(e: crate::error::RelayError) -> HubError {
    match e {
        crate::error::RelayError::Db(db) => HubError::Db(db),
        other => HubError::StoreUnavailable(other.to_string()),
    }
}
