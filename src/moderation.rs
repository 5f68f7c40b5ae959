//! Moderation workflow: call reports and the ban state machine.
//!
//! Bans follow a strict lifecycle: `none → ACTIVE` via create (refused
//! while an ACTIVE ban exists), `ACTIVE → REVOKED` via revoke (terminal),
//! and TEMPORARY bans past expiry read as EXPIRED, with a scheduled sweeper
//! rewriting the stored rows. Reports ride the retained call record in the
//! shared KV and age out with the report window.

use crate::config::Config;
use crate::db::{BanKind, BanRecord, BanScope, BanStatus, Database};
use crate::error::{BanError, ReportError};
use crate::kv::{KvStore, keys};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Report lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Open,
    Dismissed,
    ResolvedBanned,
}

/// A filed call report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallReport {
    pub call_id: String,
    pub reporter_user_id: String,
    pub reason: String,
    /// Milliseconds since the epoch.
    pub reported_at: i64,
    pub status: ReportStatus,
    pub resolved_by: Option<String>,
    /// Subjects banned when the report was resolved.
    pub banned_subjects: Vec<String>,
}

/// A subject of a staff ban action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanTarget {
    User(String),
    Server(String),
}

impl BanTarget {
    fn scope(&self) -> BanScope {
        match self {
            Self::User(_) => BanScope::User,
            Self::Server(_) => BanScope::Server,
        }
    }

    fn subject_id(&self) -> &str {
        match self {
            Self::User(id) | Self::Server(id) => id,
        }
    }
}

/// Per-target outcome of a staff ban sweep.
#[derive(Debug)]
pub struct BanSweepResult {
    pub banned: Vec<String>,
    pub failed: Vec<(String, BanError)>,
}

/// Moderation service over the database and the shared KV.
pub struct ModerationService {
    db: Database,
    kv: Arc<dyn KvStore>,
    report_retention: Duration,
    admin_user_ids: std::collections::HashSet<String>,
}

impl ModerationService {
    pub fn new(db: Database, kv: Arc<dyn KvStore>, config: &Config) -> Self {
        Self {
            db,
            kv,
            report_retention: Duration::from_secs(config.calls.message_retention_secs),
            admin_user_ids: config.server.admin_user_ids.clone(),
        }
    }

    /// Whether a user has staff-level access.
    pub fn is_staff(&self, user_id: &str) -> bool {
        self.admin_user_ids.contains(user_id)
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// File a report against a retained call.
    pub async fn file_report(
        &self,
        call_id: &str,
        reporter_user_id: &str,
        reason: &str,
    ) -> Result<CallReport, ReportError> {
        if self
            .kv
            .get(&keys::call_session(call_id))
            .await?
            .is_none()
        {
            return Err(ReportError::CallNotFound);
        }

        let report = CallReport {
            call_id: call_id.to_string(),
            reporter_user_id: reporter_user_id.to_string(),
            reason: reason.to_string(),
            reported_at: Utc::now().timestamp_millis(),
            status: ReportStatus::Open,
            resolved_by: None,
            banned_subjects: Vec::new(),
        };
        self.write_report(&report).await?;
        crate::metrics::REPORTS_FILED.inc();
        info!(call_id = %call_id, reporter = %reporter_user_id, "Call report filed");
        Ok(report)
    }

    /// Load a report by call id.
    pub async fn find_report(&self, call_id: &str) -> Result<Option<CallReport>, ReportError> {
        let Some(raw) = self.kv.get(&keys::call_report(call_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw).map_err(crate::kv::KvError::from)?))
    }

    /// Dismiss an open report.
    pub async fn dismiss_report(
        &self,
        call_id: &str,
        moderator_user_id: &str,
    ) -> Result<CallReport, ReportError> {
        if !self.is_staff(moderator_user_id) {
            return Err(ReportError::NotAuthorized);
        }
        let Some(mut report) = self.find_report(call_id).await? else {
            return Err(ReportError::CallNotFound);
        };
        if report.status != ReportStatus::Open {
            return Err(ReportError::AlreadyResolved);
        }
        report.status = ReportStatus::Dismissed;
        report.resolved_by = Some(moderator_user_id.to_string());
        self.write_report(&report).await?;
        Ok(report)
    }

    // ========================================================================
    // Ban state machine
    // ========================================================================

    /// Create a ban. Refused while the subject has an ACTIVE ban; this is
    /// idempotence with respect to the existing ban, not an upsert.
    pub async fn create_ban(
        &self,
        scope: BanScope,
        subject_id: &str,
        moderator_user_id: &str,
        reason: &str,
        kind: BanKind,
        duration: Option<Duration>,
    ) -> Result<BanRecord, BanError> {
        let expires_at = match (kind, duration) {
            (BanKind::Temporary, Some(d)) => {
                Some(Utc::now().timestamp() + d.as_secs() as i64)
            }
            (BanKind::Temporary, None) => return Err(BanError::MissingDuration),
            (BanKind::Permanent, _) => None,
        };

        // Rewrite any due temporaries first so an expired-but-stored-active
        // row cannot shadow the new ban at the unique index.
        self.db.bans().expire_due().await?;

        if self
            .db
            .bans()
            .find_active(scope, subject_id)
            .await?
            .is_some()
        {
            return Err(BanError::AlreadyBanned);
        }

        let ban = BanRecord {
            id: Uuid::new_v4().to_string(),
            scope,
            subject_id: subject_id.to_string(),
            moderator_user_id: moderator_user_id.to_string(),
            reason: reason.to_string(),
            kind,
            status: BanStatus::Active,
            created_at: Utc::now().timestamp(),
            expires_at,
            revoked_by: None,
            revoked_at: None,
        };
        self.db.bans().insert(&ban).await?;
        crate::metrics::BANS_CREATED.inc();
        info!(
            scope = ?scope,
            subject = %subject_id,
            kind = ?kind,
            moderator = %moderator_user_id,
            "Ban created"
        );
        Ok(ban)
    }

    /// Revoke the subject's ACTIVE ban. REVOKED is terminal.
    pub async fn revoke_ban(
        &self,
        scope: BanScope,
        subject_id: &str,
        moderator_user_id: &str,
    ) -> Result<(), BanError> {
        self.db.bans().expire_due().await?;

        if !self
            .db
            .bans()
            .revoke(scope, subject_id, moderator_user_id)
            .await?
        {
            return Err(BanError::NotRevokable);
        }
        info!(scope = ?scope, subject = %subject_id, moderator = %moderator_user_id, "Ban revoked");
        Ok(())
    }

    /// Rewrite due temporary bans to EXPIRED. Run by the scheduled sweeper.
    pub async fn expire_due_bans(&self) -> Result<u64, BanError> {
        Ok(self.db.bans().expire_due().await?)
    }

    // ========================================================================
    // Staff ban flow from a report
    // ========================================================================

    /// Ban targets surfaced by a call report and resolve the report.
    ///
    /// Iterates every target; a failure on one (typically `AlreadyBanned`)
    /// does not roll back the others. The report transitions to
    /// RESOLVED_BANNED with the subjects that were actually banned.
    pub async fn ban_from_call(
        &self,
        call_id: &str,
        moderator_user_id: &str,
        targets: &[BanTarget],
        kind: BanKind,
        duration: Option<Duration>,
        reason: &str,
    ) -> Result<BanSweepResult, ReportError> {
        if !self.is_staff(moderator_user_id) {
            return Err(ReportError::NotAuthorized);
        }
        if self.kv.get(&keys::call_session(call_id)).await?.is_none() {
            return Err(ReportError::CallNotFound);
        }

        let mut result = BanSweepResult {
            banned: Vec::new(),
            failed: Vec::new(),
        };
        for target in targets {
            match self
                .create_ban(
                    target.scope(),
                    target.subject_id(),
                    moderator_user_id,
                    reason,
                    kind,
                    duration,
                )
                .await
            {
                Ok(_) => result.banned.push(target.subject_id().to_string()),
                Err(e) => result.failed.push((target.subject_id().to_string(), e)),
            }
        }

        if let Some(mut report) = self.find_report(call_id).await? {
            report.status = ReportStatus::ResolvedBanned;
            report.resolved_by = Some(moderator_user_id.to_string());
            report.banned_subjects = result.banned.clone();
            self.write_report(&report).await?;
        }

        Ok(result)
    }

    async fn write_report(&self, report: &CallReport) -> Result<(), ReportError> {
        self.kv
            .set(
                &keys::call_report(&report.call_id),
                &serde_json::to_string(report).map_err(crate::kv::KvError::from)?,
                Some(self.report_retention),
            )
            .await?;
        Ok(())
    }
}
