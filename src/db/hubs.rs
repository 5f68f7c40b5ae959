//! Repository for hubs, rules acceptance, and anti-swear rule sets.

use super::DbError;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// A hub row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner_user_id: String,
    pub private: bool,
    /// Ordered rules; non-empty requires per-user acceptance before admission.
    pub rules: Vec<String>,
    pub icon_url: Option<String>,
    pub allow_nsfw: bool,
    pub created_at: i64,
}

/// Action taken when an anti-swear pattern matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntiSwearAction {
    Block,
    BlockWarn,
    Replace,
}

impl AntiSwearAction {
    fn from_db(s: &str) -> Self {
        match s {
            "block_warn" => Self::BlockWarn,
            "replace" => Self::Replace,
            _ => Self::Block,
        }
    }

    fn as_db(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::BlockWarn => "block_warn",
            Self::Replace => "replace",
        }
    }
}

/// One anti-swear rule configured on a hub.
#[derive(Debug, Clone)]
pub struct AntiSwearRule {
    pub id: i64,
    pub hub_id: String,
    pub pattern: String,
    pub action: AntiSwearAction,
    pub replacement: Option<String>,
}

type HubRow = (
    String,
    String,
    String,
    String,
    bool,
    String,
    Option<String>,
    bool,
    i64,
);

fn hub_from_row(row: HubRow) -> Result<HubRecord, DbError> {
    let (id, name, description, owner_user_id, private, rules, icon_url, allow_nsfw, created_at) =
        row;
    Ok(HubRecord {
        id,
        name,
        description,
        owner_user_id,
        private,
        rules: serde_json::from_str(&rules)?,
        icon_url,
        allow_nsfw,
        created_at,
    })
}

const HUB_COLUMNS: &str =
    "id, name, description, owner_user_id, private, rules, icon_url, allow_nsfw, created_at";

/// Repository for hub operations.
pub struct HubRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> HubRepository<'a> {
    /// Create a new hub repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a hub. The unique name index rejects duplicates.
    pub async fn create(&self, hub: &HubRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO hubs (id, name, description, owner_user_id, private, rules,
                              icon_url, allow_nsfw, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&hub.id)
        .bind(&hub.name)
        .bind(&hub.description)
        .bind(&hub.owner_user_id)
        .bind(hub.private)
        .bind(serde_json::to_string(&hub.rules)?)
        .bind(&hub.icon_url)
        .bind(hub.allow_nsfw)
        .bind(hub.created_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Fetch a hub by id.
    pub async fn find(&self, hub_id: &str) -> Result<Option<HubRecord>, DbError> {
        let row = sqlx::query_as::<_, HubRow>(&format!(
            "SELECT {HUB_COLUMNS} FROM hubs WHERE id = ?"
        ))
        .bind(hub_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(hub_from_row).transpose()
    }

    /// Fetch a hub by its unique name (case-insensitive).
    pub async fn find_by_name(&self, name: &str) -> Result<Option<HubRecord>, DbError> {
        let row = sqlx::query_as::<_, HubRow>(&format!(
            "SELECT {HUB_COLUMNS} FROM hubs WHERE name = ? COLLATE NOCASE"
        ))
        .bind(name)
        .fetch_optional(self.pool)
        .await?;

        row.map(hub_from_row).transpose()
    }

    /// Count hubs owned by a user, for the creation quota.
    pub async fn count_by_owner(&self, owner_user_id: &str) -> Result<u32, DbError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM hubs WHERE owner_user_id = ?")
                .bind(owner_user_id)
                .fetch_one(self.pool)
                .await?;
        Ok(count as u32)
    }

    /// Replace a hub's ordered rules list.
    pub async fn set_rules(&self, hub_id: &str, rules: &[String]) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE hubs SET rules = ? WHERE id = ?")
            .bind(serde_json::to_string(rules)?)
            .bind(hub_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a hub and everything it owns, atomically.
    ///
    /// Returns the channel ids of the deleted connections so the caller can
    /// invalidate their cache keys.
    pub async fn delete_cascade(&self, hub_id: &str) -> Result<Vec<String>, DbError> {
        let mut tx = self.pool.begin().await?;

        let channels: Vec<(String,)> =
            sqlx::query_as("SELECT channel_id FROM connections WHERE hub_id = ?")
                .bind(hub_id)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM connections WHERE hub_id = ?")
            .bind(hub_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM hub_rules_acceptance WHERE hub_id = ?")
            .bind(hub_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM hub_antiswear_rules WHERE hub_id = ?")
            .bind(hub_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM hub_infractions WHERE hub_id = ?")
            .bind(hub_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM hubs WHERE id = ?")
            .bind(hub_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(channels.into_iter().map(|(c,)| c).collect())
    }

    // ========== Rules acceptance ==========

    /// Whether a user has accepted a hub's rules.
    pub async fn find_acceptance(&self, user_id: &str, hub_id: &str) -> Result<bool, DbError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM hub_rules_acceptance WHERE user_id = ? AND hub_id = ?)",
        )
        .bind(user_id)
        .bind(hub_id)
        .fetch_one(self.pool)
        .await?;
        Ok(exists)
    }

    /// Record a user's acceptance of a hub's rules. Idempotent.
    pub async fn create_acceptance(&self, user_id: &str, hub_id: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO hub_rules_acceptance (user_id, hub_id, accepted_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(hub_id)
        .bind(chrono::Utc::now().timestamp())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    // ========== Anti-swear rules ==========

    /// List a hub's anti-swear rules.
    pub async fn list_antiswear(&self, hub_id: &str) -> Result<Vec<AntiSwearRule>, DbError> {
        let rows = sqlx::query_as::<_, (i64, String, String, String, Option<String>)>(
            r#"
            SELECT id, hub_id, pattern, action, replacement
            FROM hub_antiswear_rules WHERE hub_id = ? ORDER BY id
            "#,
        )
        .bind(hub_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, hub_id, pattern, action, replacement)| AntiSwearRule {
                id,
                hub_id,
                pattern,
                action: AntiSwearAction::from_db(&action),
                replacement,
            })
            .collect())
    }

    /// Add an anti-swear rule to a hub.
    pub async fn add_antiswear(
        &self,
        hub_id: &str,
        pattern: &str,
        action: AntiSwearAction,
        replacement: Option<&str>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO hub_antiswear_rules (hub_id, pattern, action, replacement, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(hub_id)
        .bind(pattern)
        .bind(action.as_db())
        .bind(replacement)
        .bind(chrono::Utc::now().timestamp())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Remove an anti-swear rule.
    pub async fn remove_antiswear(&self, rule_id: i64) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM hub_antiswear_rules WHERE id = ?")
            .bind(rule_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
