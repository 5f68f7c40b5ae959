//! Admission pipeline.
//!
//! Ordered chain of checks deciding whether a message may be relayed:
//!
//! 1. user ban
//! 2. server ban
//! 3. hub blacklist
//! 4. spam (token bucket)
//! 5. NSFW policy
//! 6. anti-swear (hub rule sets; may rewrite the outbound text)
//! 7. global content filter
//!
//! The pipeline short-circuits on the first failure. Checks are pure
//! functions of their inputs aside from observability counters; denials are
//! outcomes, not errors.

pub mod antiswear;
pub mod content;
pub mod spam;

use crate::db::{BanScope, Database, HubRecord};
use crate::error::RelayError;
use crate::transport::MessageSnapshot;
use antiswear::{AntiSwearEngine, AntiSwearOutcome};
use content::ContentClassifier;
use spam::SpamGuard;
use std::sync::Arc;

/// Why a message was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    UserBanned,
    ServerBanned,
    Blacklisted,
    Spam,
    /// The hub permits NSFW but the source channel is not age-restricted.
    NsfwChannelRequired,
    /// The hub forbids NSFW but the source channel is age-restricted.
    NsfwForbidden,
    AntiSwear {
        /// Whether the matched rule asks for an author-facing warning.
        warn: bool,
    },
    ContentFilter {
        category: String,
    },
}

impl DenyReason {
    /// Get a static reason code string for metrics labeling.
    #[inline]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::UserBanned => "user_banned",
            Self::ServerBanned => "server_banned",
            Self::Blacklisted => "blacklisted",
            Self::Spam => "spam",
            Self::NsfwChannelRequired => "nsfw_channel_required",
            Self::NsfwForbidden => "nsfw_forbidden",
            Self::AntiSwear { .. } => "antiswear",
            Self::ContentFilter { .. } => "content_filter",
        }
    }

    /// Whether the author should be told (once per cooldown) why the
    /// message was not relayed. Silent denials just drop.
    pub fn notify_author(&self) -> bool {
        !matches!(self, Self::Spam)
    }
}

/// Pipeline decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Relay with this content (anti-swear replacement may have rewritten it).
    Admit { content: String },
    Deny(DenyReason),
}

/// The ordered admission pipeline.
pub struct AdmissionPipeline {
    db: Database,
    spam: SpamGuard,
    antiswear: AntiSwearEngine,
    content: Arc<dyn ContentClassifier>,
}

impl AdmissionPipeline {
    pub fn new(
        db: Database,
        spam: SpamGuard,
        antiswear: AntiSwearEngine,
        content: Arc<dyn ContentClassifier>,
    ) -> Self {
        Self {
            db,
            spam,
            antiswear,
            content,
        }
    }

    pub fn spam(&self) -> &SpamGuard {
        &self.spam
    }

    pub fn antiswear(&self) -> &AntiSwearEngine {
        &self.antiswear
    }

    /// Run the full chain for a hub message. The returned `Admit` carries
    /// the (possibly rewritten) outbound text.
    pub async fn check(
        &self,
        snapshot: &MessageSnapshot,
        hub: &HubRecord,
    ) -> Result<Admission, RelayError> {
        let author = &snapshot.author.id;

        // 1-2. Bans are read authoritatively; the cache is never consulted.
        if self
            .db
            .bans()
            .find_active(BanScope::User, author)
            .await?
            .is_some()
        {
            return Ok(deny(DenyReason::UserBanned));
        }
        if self
            .db
            .bans()
            .find_active(BanScope::Server, &snapshot.server_id)
            .await?
            .is_some()
        {
            return Ok(deny(DenyReason::ServerBanned));
        }

        // 3. Hub-scoped blacklist, user then server.
        let infractions = self.db.infractions();
        if infractions
            .is_blacklisted(&hub.id, BanScope::User, author)
            .await?
            || infractions
                .is_blacklisted(&hub.id, BanScope::Server, &snapshot.server_id)
                .await?
        {
            return Ok(deny(DenyReason::Blacklisted));
        }

        // 4. Spam token bucket keyed per author.
        if !self.spam.check(author) {
            return Ok(deny(DenyReason::Spam));
        }

        // 5. NSFW policy.
        if hub.allow_nsfw && !snapshot.channel_nsfw {
            return Ok(deny(DenyReason::NsfwChannelRequired));
        }
        if !hub.allow_nsfw && snapshot.channel_nsfw {
            return Ok(deny(DenyReason::NsfwForbidden));
        }

        // 6. Anti-swear against the hub's configured rule set.
        let content = match self.antiswear.check(&hub.id, &snapshot.content).await? {
            AntiSwearOutcome::Clean => snapshot.content.clone(),
            AntiSwearOutcome::Replaced(text) => text,
            AntiSwearOutcome::Blocked { warn } => {
                return Ok(deny(DenyReason::AntiSwear { warn }));
            }
        };

        // 7. Global content filter.
        let verdict = self
            .content
            .classify(&content, snapshot.attachment_url.as_deref())
            .await;
        if verdict.blocked {
            return Ok(deny(DenyReason::ContentFilter {
                category: verdict.category.unwrap_or_else(|| "unspecified".to_string()),
            }));
        }

        Ok(Admission::Admit { content })
    }
}

fn deny(reason: DenyReason) -> Admission {
    crate::metrics::ADMISSION_BLOCKED.inc();
    Admission::Deny(reason)
}
