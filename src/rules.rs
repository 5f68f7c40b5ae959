//! Hub rules acceptance gate.
//!
//! A hub with a non-empty rules list requires per-user acceptance before a
//! message is admitted. The gate keeps two markers in the shared KV: a
//! positive "accepted" marker so the authoritative row is not re-read on
//! every message, and a "shown" marker that caps the prompt at one per
//! cooldown window regardless of how fast the user keeps posting.

use crate::config::RulesConfig;
use crate::error::RelayError;
use crate::kv::{KvStore, keys};
use crate::store::EntityStore;
use crate::transport::ChatTransport;
use chrono::{Duration as ChronoDuration, Utc};
use interchat_codec::RouteToken;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Outcome of gating one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulesGateOutcome {
    /// No rules, or the user has accepted them.
    Admitted,
    /// The prompt was just emitted; the message is not relayed.
    DeniedShown,
    /// A prompt is still in its cooldown window; nothing was emitted.
    DeniedCooldown,
}

/// Rules gate over the shared KV and the authoritative acceptance rows.
pub struct RulesGate {
    kv: Arc<dyn KvStore>,
    store: EntityStore,
    transport: Arc<dyn ChatTransport>,
    config: RulesConfig,
}

impl RulesGate {
    pub fn new(
        kv: Arc<dyn KvStore>,
        store: EntityStore,
        transport: Arc<dyn ChatTransport>,
        config: RulesConfig,
    ) -> Self {
        Self {
            kv,
            store,
            transport,
            config,
        }
    }

    /// Gate a message from `user_id` into the hub owning `channel_id`.
    pub async fn gate(
        &self,
        user_id: &str,
        hub: &crate::db::HubRecord,
        channel_id: &str,
    ) -> Result<RulesGateOutcome, RelayError> {
        if hub.rules.is_empty() {
            return Ok(RulesGateOutcome::Admitted);
        }
        let hub_id = hub.id.as_str();

        let accepted_key = keys::rules_accepted(hub_id, user_id);
        if self.kv.get(&accepted_key).await?.is_some() {
            return Ok(RulesGateOutcome::Admitted);
        }

        if self.store.find_rules_acceptance(user_id, hub_id).await? {
            self.kv
                .set(
                    &accepted_key,
                    "1",
                    Some(Duration::from_secs(self.config.accepted_marker_ttl_secs)),
                )
                .await?;
            return Ok(RulesGateOutcome::Admitted);
        }

        let shown_key = keys::rules_shown(hub_id, user_id);
        if self.kv.get(&shown_key).await?.is_some() {
            return Ok(RulesGateOutcome::DeniedCooldown);
        }

        self.kv
            .set(
                &shown_key,
                "1",
                Some(Duration::from_secs(self.config.prompt_cooldown_secs)),
            )
            .await?;

        let token = RouteToken::new("rules", Some("accept"))
            .arg(hub_id)
            .arg(user_id)
            .expires(Utc::now() + ChronoDuration::minutes(10))
            .encode()?;

        let text = render_prompt(&hub.name, &hub.rules);
        self.transport
            .send_prompt(channel_id, &text, "Accept rules", &token)
            .await?;
        crate::metrics::RULES_PROMPTED.inc();
        debug!(user_id = %user_id, hub_id = %hub_id, "Rules prompt emitted");

        Ok(RulesGateOutcome::DeniedShown)
    }

    /// Record a user's acceptance: authoritative row, positive marker, and
    /// the shown cooldown cleared so the next message goes straight through.
    pub async fn accept(&self, user_id: &str, hub_id: &str) -> Result<(), RelayError> {
        self.store.create_rules_acceptance(user_id, hub_id).await?;
        self.kv
            .set(
                &keys::rules_accepted(hub_id, user_id),
                "1",
                Some(Duration::from_secs(self.config.accepted_marker_ttl_secs)),
            )
            .await?;
        self.kv.del(&keys::rules_shown(hub_id, user_id)).await?;
        Ok(())
    }
}

fn render_prompt(hub_name: &str, rules: &[String]) -> String {
    let mut text = format!("Before chatting in **{hub_name}**, please accept its rules:\n");
    for (i, rule) in rules.iter().enumerate() {
        text.push_str(&format!("{}. {}\n", i + 1, rule));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_rules_in_order() {
        let text = render_prompt("Art", &["Be kind".into(), "No spam".into()]);
        assert!(text.contains("**Art**"));
        let kind = text.find("1. Be kind").unwrap();
        let spam = text.find("2. No spam").unwrap();
        assert!(kind < spam);
    }
}
