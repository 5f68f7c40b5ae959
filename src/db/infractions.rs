//! Repository for hub-scoped infractions (blacklist).

use super::DbError;
use super::bans::BanScope;
use sqlx::SqlitePool;

/// A hub-scoped exclusion of a user or server.
#[derive(Debug, Clone)]
pub struct InfractionRecord {
    pub id: String,
    pub hub_id: String,
    pub scope: BanScope,
    pub subject_id: String,
    pub moderator_user_id: String,
    pub reason: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

/// Repository for infraction operations.
pub struct InfractionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> InfractionRepository<'a> {
    /// Create a new infraction repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Whether the subject is currently blacklisted in the hub.
    pub async fn is_blacklisted(
        &self,
        hub_id: &str,
        scope: BanScope,
        subject_id: &str,
    ) -> Result<bool, DbError> {
        let now = chrono::Utc::now().timestamp();
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM hub_infractions
                WHERE hub_id = ? AND scope = ? AND subject_id = ?
                  AND revoked = 0 AND (expires_at IS NULL OR expires_at > ?)
            )
            "#,
        )
        .bind(hub_id)
        .bind(scope.as_db())
        .bind(subject_id)
        .bind(now)
        .fetch_one(self.pool)
        .await?;

        Ok(exists)
    }

    /// Record a blacklist entry.
    pub async fn create(&self, infraction: &InfractionRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO hub_infractions (id, hub_id, scope, subject_id, moderator_user_id,
                                         reason, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&infraction.id)
        .bind(&infraction.hub_id)
        .bind(infraction.scope.as_db())
        .bind(&infraction.subject_id)
        .bind(&infraction.moderator_user_id)
        .bind(&infraction.reason)
        .bind(infraction.created_at)
        .bind(infraction.expires_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Lift a subject's blacklist entries in a hub.
    pub async fn revoke(
        &self,
        hub_id: &str,
        scope: BanScope,
        subject_id: &str,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE hub_infractions SET revoked = 1
            WHERE hub_id = ? AND scope = ? AND subject_id = ? AND revoked = 0
            "#,
        )
        .bind(hub_id)
        .bind(scope.as_db())
        .bind(subject_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
