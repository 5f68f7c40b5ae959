//! Hub anti-swear matching.
//!
//! Each hub configures its own pattern set with one of three actions:
//! block, block + warn the author, or replace the matched span. Patterns
//! compile into one Aho-Corasick automaton per hub, cached with a TTL and
//! invalidated explicitly when the rule set changes.

use crate::db::{AntiSwearAction, AntiSwearRule, Database};
use crate::error::RelayError;
use aho_corasick::AhoCorasick;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Result of checking one message against a hub's rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AntiSwearOutcome {
    Clean,
    /// Every match carried the replace action; here is the rewritten text.
    Replaced(String),
    Blocked {
        warn: bool,
    },
}

struct CompiledRules {
    matcher: AhoCorasick,
    rules: Vec<AntiSwearRule>,
}

struct CacheEntry {
    compiled: Option<Arc<CompiledRules>>,
    built_at: Instant,
}

/// Anti-swear engine with a per-hub compiled-rules cache.
pub struct AntiSwearEngine {
    db: Database,
    cache: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl AntiSwearEngine {
    pub fn new(db: Database, ttl: Duration) -> Self {
        Self {
            db,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Check text against the hub's rule set.
    pub async fn check(&self, hub_id: &str, text: &str) -> Result<AntiSwearOutcome, RelayError> {
        let Some(compiled) = self.compiled_for(hub_id).await? else {
            return Ok(AntiSwearOutcome::Clean);
        };

        let mut matched_replace = false;
        let mut warn_author = false;
        for hit in compiled.matcher.find_iter(text) {
            let rule = &compiled.rules[hit.pattern().as_usize()];
            match rule.action {
                AntiSwearAction::Block => return Ok(AntiSwearOutcome::Blocked { warn: false }),
                AntiSwearAction::BlockWarn => warn_author = true,
                AntiSwearAction::Replace => matched_replace = true,
            }
        }
        if warn_author {
            return Ok(AntiSwearOutcome::Blocked { warn: true });
        }
        if !matched_replace {
            return Ok(AntiSwearOutcome::Clean);
        }

        // Only replace-action rules matched: rewrite each span.
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for hit in compiled.matcher.find_iter(text) {
            let rule = &compiled.rules[hit.pattern().as_usize()];
            out.push_str(&text[last..hit.start()]);
            out.push_str(rule.replacement.as_deref().unwrap_or("****"));
            last = hit.end();
        }
        out.push_str(&text[last..]);
        Ok(AntiSwearOutcome::Replaced(out))
    }

    /// Drop a hub's compiled rules after its rule set changed.
    pub fn invalidate(&self, hub_id: &str) {
        self.cache.remove(hub_id);
    }

    async fn compiled_for(&self, hub_id: &str) -> Result<Option<Arc<CompiledRules>>, RelayError> {
        if let Some(entry) = self.cache.get(hub_id)
            && entry.built_at.elapsed() < self.ttl
        {
            return Ok(entry.compiled.clone());
        }

        let rules = self.db.hubs().list_antiswear(hub_id).await?;
        let compiled = if rules.is_empty() {
            None
        } else {
            let patterns: Vec<&str> = rules.iter().map(|r| r.pattern.as_str()).collect();
            match AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(&patterns)
            {
                Ok(matcher) => Some(Arc::new(CompiledRules { matcher, rules })),
                Err(err) => {
                    warn!(hub_id = %hub_id, error = ?err, "Failed to compile anti-swear rules; hub set disabled");
                    None
                }
            }
        };

        self.cache.insert(
            hub_id.to_string(),
            CacheEntry {
                compiled: compiled.clone(),
                built_at: Instant::now(),
            },
        );
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AntiSwearAction, HubRecord};

    async fn engine_with_rules(
        rules: &[(&str, AntiSwearAction, Option<&str>)],
    ) -> (AntiSwearEngine, String) {
        let db = Database::new(":memory:").await.unwrap();
        // The shared-cache in-memory database is one store per process;
        // a unique hub id keeps parallel tests out of each other's rules.
        let hub_id = uuid::Uuid::new_v4().to_string();
        db.hubs()
            .create(&HubRecord {
                id: hub_id.clone(),
                name: hub_id.clone(),
                description: String::new(),
                owner_user_id: "owner".to_string(),
                private: false,
                rules: Vec::new(),
                icon_url: None,
                allow_nsfw: false,
                created_at: 0,
            })
            .await
            .unwrap();
        for (pattern, action, replacement) in rules {
            db.hubs()
                .add_antiswear(&hub_id, pattern, *action, *replacement)
                .await
                .unwrap();
        }
        (AntiSwearEngine::new(db, Duration::from_secs(60)), hub_id)
    }

    #[tokio::test]
    async fn clean_without_rules() {
        let (engine, hub) = engine_with_rules(&[]).await;
        assert_eq!(
            engine.check(&hub, "anything goes").await.unwrap(),
            AntiSwearOutcome::Clean
        );
    }

    #[tokio::test]
    async fn block_rule_blocks_case_insensitively() {
        let (engine, hub) = engine_with_rules(&[("badword", AntiSwearAction::Block, None)]).await;
        assert_eq!(
            engine.check(&hub, "so BadWord indeed").await.unwrap(),
            AntiSwearOutcome::Blocked { warn: false }
        );
    }

    #[tokio::test]
    async fn block_warn_outranks_replace() {
        let (engine, hub) = engine_with_rules(&[
            ("heck", AntiSwearAction::Replace, Some("h*ck")),
            ("darn", AntiSwearAction::BlockWarn, None),
        ])
        .await;
        assert_eq!(
            engine.check(&hub, "heck and darn").await.unwrap(),
            AntiSwearOutcome::Blocked { warn: true }
        );
    }

    #[tokio::test]
    async fn replace_rewrites_spans() {
        let (engine, hub) =
            engine_with_rules(&[("heck", AntiSwearAction::Replace, Some("h*ck"))]).await;
        assert_eq!(
            engine.check(&hub, "what the heck").await.unwrap(),
            AntiSwearOutcome::Replaced("what the h*ck".to_string())
        );
    }

    #[tokio::test]
    async fn invalidate_picks_up_new_rules() {
        let (engine, hub) = engine_with_rules(&[]).await;
        assert_eq!(
            engine.check(&hub, "badword").await.unwrap(),
            AntiSwearOutcome::Clean
        );

        engine
            .db
            .hubs()
            .add_antiswear(&hub, "badword", AntiSwearAction::Block, None)
            .await
            .unwrap();
        engine.invalidate(&hub);

        assert_eq!(
            engine.check(&hub, "badword").await.unwrap(),
            AntiSwearOutcome::Blocked { warn: false }
        );
    }
}
