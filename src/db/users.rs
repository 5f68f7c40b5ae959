//! Repository for users observed by the relay.

use super::DbError;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// A user row. Created lazily on first observation, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub locale: String,
    pub accepted_global_rules: bool,
    pub badges: Vec<String>,
    pub donation_total: i64,
    pub created_at: i64,
    pub last_seen_at: i64,
}

/// Repository for user operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    /// Create a new user repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a user from an ingress snapshot. Cheap: identity fields and
    /// last-seen only; self-service fields are preserved on conflict.
    pub async fn upsert(
        &self,
        id: &str,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, avatar_url, created_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                avatar_url = excluded.avatar_url,
                last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(id)
        .bind(display_name)
        .bind(avatar_url)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Fetch a user by id.
    pub async fn find(&self, id: &str) -> Result<Option<UserRecord>, DbError> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                Option<String>,
                String,
                bool,
                String,
                i64,
                i64,
                i64,
            ),
        >(
            r#"
            SELECT id, display_name, avatar_url, locale, accepted_global_rules,
                   badges, donation_total, created_at, last_seen_at
            FROM users WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(
            |(
                id,
                display_name,
                avatar_url,
                locale,
                accepted_global_rules,
                badges,
                donation_total,
                created_at,
                last_seen_at,
            )| {
                Ok(UserRecord {
                    id,
                    display_name,
                    avatar_url,
                    locale,
                    accepted_global_rules,
                    badges: serde_json::from_str(&badges)?,
                    donation_total,
                    created_at,
                    last_seen_at,
                })
            },
        )
        .transpose()
    }

    /// Update a user's preferred locale (BCP-47 tag).
    pub async fn set_locale(&self, id: &str, locale: &str) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE users SET locale = ? WHERE id = ?")
            .bind(locale)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
