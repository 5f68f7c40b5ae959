//! Unified error handling for interchatd.
//!
//! Infrastructure errors stay next to their subsystems (`DbError` in `db`,
//! `KvError` in `kv`, `TransportError` in `transport`) because they wrap
//! those crates' error types. This module holds the cross-cutting taxonomy:
//! the composite error crossing subsystem seams and the domain outcomes for
//! moderation and hub management, with metric label codes.

use thiserror::Error;

// ============================================================================
// Composite infrastructure error
// ============================================================================

/// An infrastructure failure crossing a subsystem seam.
///
/// Admission denials and rules prompts are NOT errors; they are modeled as
/// outcome enums in their own modules.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("database error: {0}")]
    Db(#[from] crate::db::DbError),

    #[error("kv error: {0}")]
    Kv(#[from] crate::kv::KvError),

    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("token error: {0}")]
    Codec(#[from] interchat_codec::CodecError),
}

impl RelayError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Db(_) => "db_error",
            Self::Kv(_) => "kv_error",
            Self::Transport(_) => "transport_error",
            Self::Codec(_) => "codec_error",
        }
    }
}

// ============================================================================
// Ban state machine errors
// ============================================================================

/// Ban state machine violations.
#[derive(Debug, Error)]
pub enum BanError {
    /// An ACTIVE ban already exists for the subject.
    #[error("subject already has an active ban")]
    AlreadyBanned,

    /// `revoke` requires an ACTIVE ban.
    #[error("no active ban to revoke")]
    NotRevokable,

    /// A TEMPORARY ban was requested without a duration.
    #[error("temporary ban requires a duration")]
    MissingDuration,

    #[error("database error: {0}")]
    Db(#[from] crate::db::DbError),
}

impl BanError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyBanned => "already_banned",
            Self::NotRevokable => "not_revokable",
            Self::MissingDuration => "missing_duration",
            Self::Db(_) => "db_error",
        }
    }
}

// ============================================================================
// Report workflow errors
// ============================================================================

/// Report workflow failures.
#[derive(Debug, Error)]
pub enum ReportError {
    /// No retained call exists for the id (never existed, or aged out).
    #[error("call not found")]
    CallNotFound,

    /// The report was already resolved or dismissed.
    #[error("report already resolved")]
    AlreadyResolved,

    /// The initiator lacks staff access.
    #[error("not authorized")]
    NotAuthorized,

    #[error("kv error: {0}")]
    Kv(#[from] crate::kv::KvError),
}

impl ReportError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CallNotFound => "call_not_found",
            Self::AlreadyResolved => "already_resolved",
            Self::NotAuthorized => "not_authorized",
            Self::Kv(_) => "kv_error",
        }
    }
}

// ============================================================================
// Hub management errors
// ============================================================================

/// Hub/connection management failures surfaced to the initiator.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub name already taken: {0}")]
    NameTaken(String),

    #[error("hub name invalid: {0}")]
    NameInvalid(String),

    #[error("owner reached the hub quota")]
    QuotaExceeded,

    #[error("hub is at its connection limit")]
    HubFull,

    #[error("channel already connected to a hub")]
    ChannelAlreadyConnected,

    #[error("hub not found")]
    HubNotFound,

    #[error("channel is not connected to a hub")]
    NotConnected,

    #[error("not authorized")]
    NotAuthorized,

    #[error("webhook unavailable for channel")]
    WebhookUnavailable,

    /// A mutation could not complete; nothing was partially applied.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("database error: {0}")]
    Db(#[from] crate::db::DbError),
}

impl HubError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NameTaken(_) => "name_taken",
            Self::NameInvalid(_) => "name_invalid",
            Self::QuotaExceeded => "quota_exceeded",
            Self::HubFull => "hub_full",
            Self::ChannelAlreadyConnected => "channel_already_connected",
            Self::HubNotFound => "hub_not_found",
            Self::NotConnected => "not_connected",
            Self::NotAuthorized => "not_authorized",
            Self::WebhookUnavailable => "webhook_unavailable",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Db(_) => "db_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ban_error_codes() {
        assert_eq!(BanError::AlreadyBanned.error_code(), "already_banned");
        assert_eq!(BanError::NotRevokable.error_code(), "not_revokable");
    }

    #[test]
    fn hub_error_codes() {
        assert_eq!(HubError::QuotaExceeded.error_code(), "quota_exceeded");
        assert_eq!(
            HubError::NameTaken("gaming".into()).error_code(),
            "name_taken"
        );
    }

    #[test]
    fn report_error_codes() {
        assert_eq!(ReportError::CallNotFound.error_code(), "call_not_found");
    }
}
