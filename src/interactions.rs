//! Interaction handler registry.
//!
//! Interactive components carry a routing token minted by the codec; when
//! the platform delivers a component event, the token decodes into a
//! (prefix, suffix) head that selects a handler from a registry built once
//! at startup with explicit `register` calls. No runtime discovery.

use crate::error::RelayError;
use crate::rules::RulesGate;
use async_trait::async_trait;
use interchat_codec::RouteToken;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// The interaction being handled, snapshotted at ingress.
#[derive(Debug, Clone)]
pub struct InteractionContext {
    pub user_id: String,
    pub channel_id: String,
}

/// One registered component handler.
#[async_trait]
pub trait InteractionHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &InteractionContext,
        token: &RouteToken,
    ) -> Result<(), RelayError>;
}

/// Static dispatch table keyed by the token's routing head.
#[derive(Default)]
pub struct InteractionRegistry {
    handlers: HashMap<(String, Option<String>), Arc<dyn InteractionHandler>>,
}

impl InteractionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a routing head. Later registrations replace
    /// earlier ones; registration happens once at startup.
    pub fn register(
        &mut self,
        prefix: &str,
        suffix: Option<&str>,
        handler: Arc<dyn InteractionHandler>,
    ) {
        self.handlers
            .insert((prefix.to_string(), suffix.map(str::to_string)), handler);
    }

    /// Decode a component token and dispatch it. Returns whether a handler
    /// consumed it; expired or malformed tokens are dropped with a log.
    pub async fn dispatch(
        &self,
        raw_token: &str,
        ctx: &InteractionContext,
    ) -> Result<bool, RelayError> {
        let token = match RouteToken::decode(raw_token) {
            Ok(token) => token,
            Err(e) => {
                debug!(error = %e, "Component token rejected");
                return Ok(false);
            }
        };

        let key = (token.prefix.clone(), token.suffix.clone());
        let Some(handler) = self.handlers.get(&key) else {
            warn!(prefix = %token.prefix, suffix = ?token.suffix, "No handler for component token");
            return Ok(false);
        };

        handler.handle(ctx, &token).await?;
        Ok(true)
    }
}

// ============================================================================
// Rules acceptance handler
// ============================================================================

/// Handles the "accept rules" button minted by the rules gate.
pub struct RulesAcceptHandler {
    rules: Arc<RulesGate>,
}

impl RulesAcceptHandler {
    pub fn new(rules: Arc<RulesGate>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl InteractionHandler for RulesAcceptHandler {
    async fn handle(
        &self,
        ctx: &InteractionContext,
        token: &RouteToken,
    ) -> Result<(), RelayError> {
        let (Some(hub_id), Some(target_user)) = (token.args.first(), token.args.get(1)) else {
            debug!("Rules token missing arguments");
            return Ok(());
        };
        // The prompt is personal: only the prompted user can accept with it.
        if target_user != &ctx.user_id {
            debug!(clicked_by = %ctx.user_id, prompted = %target_user, "Rules button clicked by another user");
            return Ok(());
        }

        self.rules.accept(&ctx.user_id, hub_id).await?;
        debug!(user_id = %ctx.user_id, hub_id = %hub_id, "Hub rules accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl InteractionHandler for Counter {
        async fn handle(
            &self,
            _ctx: &InteractionContext,
            _token: &RouteToken,
        ) -> Result<(), RelayError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ctx() -> InteractionContext {
        InteractionContext {
            user_id: "u1".into(),
            channel_id: "ch1".into(),
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_head() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let mut registry = InteractionRegistry::new();
        registry.register("report", Some("resolve"), counter.clone());

        let token = RouteToken::new("report", Some("resolve"))
            .arg("call-1")
            .encode()
            .unwrap();
        assert!(registry.dispatch(&token, &ctx()).await.unwrap());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_head_and_garbage_are_dropped() {
        let registry = InteractionRegistry::new();
        let token = RouteToken::new("nope", None).encode().unwrap();
        assert!(!registry.dispatch(&token, &ctx()).await.unwrap());
        assert!(!registry.dispatch("!!garbage!!", &ctx()).await.unwrap());
    }
}
