//! Repository for hub connections.

use super::DbError;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// A connection row: the binding between one channel and one hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub channel_id: String,
    pub server_id: String,
    pub hub_id: String,
    pub connected: bool,
    /// Outbound webhook endpoint; empty means provision before first broadcast.
    pub webhook_url: String,
    /// Layout hint: compact line instead of a rich embed.
    pub compact: bool,
    pub embed_color: Option<i64>,
    pub invite: Option<String>,
    pub last_active: i64,
}

type ConnectionRow = (
    String,
    String,
    String,
    String,
    bool,
    String,
    bool,
    Option<i64>,
    Option<String>,
    i64,
);

fn connection_from_row(row: ConnectionRow) -> ConnectionRecord {
    let (
        id,
        channel_id,
        server_id,
        hub_id,
        connected,
        webhook_url,
        compact,
        embed_color,
        invite,
        last_active,
    ) = row;
    ConnectionRecord {
        id,
        channel_id,
        server_id,
        hub_id,
        connected,
        webhook_url,
        compact,
        embed_color,
        invite,
        last_active,
    }
}

const CONNECTION_COLUMNS: &str = "id, channel_id, server_id, hub_id, connected, webhook_url, \
                                  compact, embed_color, invite, last_active";

/// Repository for connection operations.
pub struct ConnectionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ConnectionRepository<'a> {
    /// Create a new connection repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a connection. The unique channel index keeps one
    /// connection per channel.
    pub async fn upsert(&self, connection: &ConnectionRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO connections (id, channel_id, server_id, hub_id, connected,
                                     webhook_url, compact, embed_color, invite, last_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(channel_id) DO UPDATE SET
                server_id = excluded.server_id,
                hub_id = excluded.hub_id,
                connected = excluded.connected,
                webhook_url = excluded.webhook_url,
                compact = excluded.compact,
                embed_color = excluded.embed_color,
                invite = excluded.invite,
                last_active = excluded.last_active
            "#,
        )
        .bind(&connection.id)
        .bind(&connection.channel_id)
        .bind(&connection.server_id)
        .bind(&connection.hub_id)
        .bind(connection.connected)
        .bind(&connection.webhook_url)
        .bind(connection.compact)
        .bind(connection.embed_color)
        .bind(&connection.invite)
        .bind(connection.last_active)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Fetch the connection bound to a channel.
    pub async fn find_by_channel(
        &self,
        channel_id: &str,
    ) -> Result<Option<ConnectionRecord>, DbError> {
        let row = sqlx::query_as::<_, ConnectionRow>(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM connections WHERE channel_id = ?"
        ))
        .bind(channel_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(connection_from_row))
    }

    /// Fetch every connected connection in a hub.
    pub async fn find_connected_by_hub(
        &self,
        hub_id: &str,
    ) -> Result<Vec<ConnectionRecord>, DbError> {
        let rows = sqlx::query_as::<_, ConnectionRow>(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM connections WHERE hub_id = ? AND connected = 1"
        ))
        .bind(hub_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(connection_from_row).collect())
    }

    /// Count connections in a hub, for the join limit.
    pub async fn count_by_hub(&self, hub_id: &str) -> Result<u32, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM connections WHERE hub_id = ?")
            .bind(hub_id)
            .fetch_one(self.pool)
            .await?;
        Ok(count as u32)
    }

    /// Store (or clear) a connection's webhook URL.
    pub async fn set_webhook_url(
        &self,
        channel_id: &str,
        webhook_url: &str,
    ) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE connections SET webhook_url = ? WHERE channel_id = ?")
            .bind(webhook_url)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flip a connection's connected flag.
    pub async fn set_connected(&self, channel_id: &str, connected: bool) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE connections SET connected = ? WHERE channel_id = ?")
            .bind(connected)
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Refresh a connection's activity timestamp.
    pub async fn touch_last_active(&self, channel_id: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE connections SET last_active = ? WHERE channel_id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Delete a connection.
    pub async fn delete(&self, channel_id: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM connections WHERE channel_id = ?")
            .bind(channel_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
