//! Repository for user and server bans.
//!
//! The state machine lives in `moderation`; this repository enforces the
//! storage invariants: at most one ACTIVE ban per subject (partial unique
//! index) and TEMPORARY bans past expiry reading as EXPIRED regardless of
//! the stored status.

use super::DbError;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Whether a ban targets a user or a whole server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanScope {
    User,
    Server,
}

impl BanScope {
    pub(crate) fn as_db(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Server => "server",
        }
    }

    fn from_db(s: &str) -> Self {
        if s == "server" { Self::Server } else { Self::User }
    }
}

/// Ban duration class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanKind {
    Permanent,
    Temporary,
}

impl BanKind {
    fn as_db(self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::Temporary => "temporary",
        }
    }

    fn from_db(s: &str) -> Self {
        if s == "temporary" { Self::Temporary } else { Self::Permanent }
    }
}

/// Ban lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanStatus {
    Active,
    Revoked,
    Expired,
}

impl BanStatus {
    fn from_db(s: &str) -> Self {
        match s {
            "revoked" => Self::Revoked,
            "expired" => Self::Expired,
            _ => Self::Active,
        }
    }
}

/// A ban row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRecord {
    pub id: String,
    pub scope: BanScope,
    pub subject_id: String,
    pub moderator_user_id: String,
    pub reason: String,
    pub kind: BanKind,
    pub status: BanStatus,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub revoked_by: Option<String>,
    pub revoked_at: Option<i64>,
}

impl BanRecord {
    /// Status as observed now: a stored-ACTIVE temporary ban past its expiry
    /// reads as EXPIRED until the sweeper rewrites it.
    pub fn effective_status(&self, now: i64) -> BanStatus {
        if self.status == BanStatus::Active
            && self.kind == BanKind::Temporary
            && self.expires_at.is_some_and(|at| now >= at)
        {
            BanStatus::Expired
        } else {
            self.status
        }
    }
}

type BanRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    Option<i64>,
    Option<String>,
    Option<i64>,
);

fn ban_from_row(row: BanRow) -> BanRecord {
    let (
        id,
        scope,
        subject_id,
        moderator_user_id,
        reason,
        kind,
        status,
        created_at,
        expires_at,
        revoked_by,
        revoked_at,
    ) = row;
    BanRecord {
        id,
        scope: BanScope::from_db(&scope),
        subject_id,
        moderator_user_id,
        reason,
        kind: BanKind::from_db(&kind),
        status: BanStatus::from_db(&status),
        created_at,
        expires_at,
        revoked_by,
        revoked_at,
    }
}

const BAN_COLUMNS: &str = "id, scope, subject_id, moderator_user_id, reason, kind, status, \
                           created_at, expires_at, revoked_by, revoked_at";

/// Repository for ban operations.
pub struct BanRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BanRepository<'a> {
    /// Create a new ban repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch the subject's ACTIVE ban, treating expired temporaries as absent.
    pub async fn find_active(
        &self,
        scope: BanScope,
        subject_id: &str,
    ) -> Result<Option<BanRecord>, DbError> {
        let now = chrono::Utc::now().timestamp();

        let row = sqlx::query_as::<_, BanRow>(&format!(
            r#"
            SELECT {BAN_COLUMNS} FROM bans
            WHERE scope = ? AND subject_id = ? AND status = 'active'
              AND (expires_at IS NULL OR expires_at > ?)
            "#
        ))
        .bind(scope.as_db())
        .bind(subject_id)
        .bind(now)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(ban_from_row))
    }

    /// Insert a ban row. The partial unique index rejects a second ACTIVE
    /// ban for the same subject.
    pub async fn insert(&self, ban: &BanRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO bans (id, scope, subject_id, moderator_user_id, reason, kind,
                              status, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, 'active', ?, ?)
            "#,
        )
        .bind(&ban.id)
        .bind(ban.scope.as_db())
        .bind(&ban.subject_id)
        .bind(&ban.moderator_user_id)
        .bind(&ban.reason)
        .bind(ban.kind.as_db())
        .bind(ban.created_at)
        .bind(ban.expires_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Revoke the subject's ACTIVE ban. Returns whether a row transitioned.
    pub async fn revoke(
        &self,
        scope: BanScope,
        subject_id: &str,
        moderator_user_id: &str,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE bans SET status = 'revoked', revoked_by = ?, revoked_at = ?
            WHERE scope = ? AND subject_id = ? AND status = 'active'
            "#,
        )
        .bind(moderator_user_id)
        .bind(chrono::Utc::now().timestamp())
        .bind(scope.as_db())
        .bind(subject_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Rewrite stored-ACTIVE temporary bans past expiry to EXPIRED.
    /// Run by the scheduled sweeper; readers already treat them as expired.
    pub async fn expire_due(&self) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE bans SET status = 'expired'
            WHERE status = 'active' AND kind = 'temporary' AND expires_at <= ?
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Full ban history for a subject, newest first.
    pub async fn history(
        &self,
        scope: BanScope,
        subject_id: &str,
    ) -> Result<Vec<BanRecord>, DbError> {
        let rows = sqlx::query_as::<_, BanRow>(&format!(
            r#"
            SELECT {BAN_COLUMNS} FROM bans
            WHERE scope = ? AND subject_id = ? ORDER BY created_at DESC
            "#
        ))
        .bind(scope.as_db())
        .bind(subject_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(ban_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ban(kind: BanKind, status: BanStatus, expires_at: Option<i64>) -> BanRecord {
        BanRecord {
            id: "b-1".into(),
            scope: BanScope::User,
            subject_id: "u-1".into(),
            moderator_user_id: "m-1".into(),
            reason: String::new(),
            kind,
            status,
            created_at: 0,
            expires_at,
            revoked_by: None,
            revoked_at: None,
        }
    }

    #[test]
    fn temporary_past_expiry_reads_as_expired() {
        let b = ban(BanKind::Temporary, BanStatus::Active, Some(100));
        assert_eq!(b.effective_status(99), BanStatus::Active);
        assert_eq!(b.effective_status(100), BanStatus::Expired);
    }

    #[test]
    fn permanent_and_revoked_are_unaffected_by_time() {
        let b = ban(BanKind::Permanent, BanStatus::Active, None);
        assert_eq!(b.effective_status(i64::MAX), BanStatus::Active);
        let b = ban(BanKind::Temporary, BanStatus::Revoked, Some(100));
        assert_eq!(b.effective_status(200), BanStatus::Revoked);
    }
}
