//! Webhook provisioner.
//!
//! `get_or_create` is idempotent: it reuses a webhook the daemon already
//! created on the channel and creates one otherwise. Concurrent callers on
//! the same channel converge on a single webhook through a per-channel
//! async mutex.

use crate::transport::{ChatTransport, TransportError, WEBHOOK_NAME};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Idempotent per-channel webhook provisioning.
pub struct WebhookProvisioner {
    transport: Arc<dyn ChatTransport>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl WebhookProvisioner {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            locks: DashMap::new(),
        }
    }

    /// Look up the daemon's webhook on a channel, creating it when absent.
    pub async fn get_or_create(&self, channel_id: &str) -> Result<String, TransportError> {
        let lock = self
            .locks
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let existing = self.transport.list_channel_webhooks(channel_id).await?;
        if let Some(webhook) = existing.into_iter().find(|w| w.name == WEBHOOK_NAME) {
            return Ok(webhook.url);
        }

        let url = self.transport.create_webhook(channel_id).await?;
        crate::metrics::WEBHOOKS_PROVISIONED.inc();
        info!(channel_id = %channel_id, "Webhook provisioned");
        Ok(url)
    }

    /// Drop idle per-channel locks. Called by the background pruning task.
    pub fn cleanup(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}
