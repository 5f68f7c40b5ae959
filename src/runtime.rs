//! Process-wide runtime handle.
//!
//! Explicit construction, no ambient singletons: every component receives
//! its collaborators here and the gateway adapter receives one [`Runtime`].

use crate::admission::content::{ContentClassifier, KeywordClassifier};
use crate::admission::{AdmissionPipeline, antiswear::AntiSwearEngine, spam::SpamGuard};
use crate::broadcast::{BroadcastService, records::BroadcastLedger};
use crate::cache::CacheLayer;
use crate::calls::matchmaker::CallMatchmaker;
use crate::calls::session::CallSessionManager;
use crate::config::Config;
use crate::db::Database;
use crate::hub_service::HubService;
use crate::interactions::{InteractionRegistry, RulesAcceptHandler};
use crate::kv::KvStore;
use crate::moderation::ModerationService;
use crate::processor::MessageProcessor;
use crate::rules::RulesGate;
use crate::stats::StatsSink;
use crate::store::EntityStore;
use crate::transport::ChatTransport;
use crate::webhooks::WebhookProvisioner;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Parameters for building a [`Runtime`].
pub struct RuntimeParams {
    pub config: Config,
    pub db: Database,
    pub kv: Arc<dyn KvStore>,
    pub transport: Arc<dyn ChatTransport>,
    /// Override the default content classifier (tests).
    pub content: Option<Arc<dyn ContentClassifier>>,
}

/// The daemon's shared state and services.
pub struct Runtime {
    pub config: Config,
    pub db: Database,
    pub kv: Arc<dyn KvStore>,
    pub store: EntityStore,
    pub rules: Arc<RulesGate>,
    pub admission: Arc<AdmissionPipeline>,
    pub broadcast: Arc<BroadcastService>,
    pub processor: Arc<MessageProcessor>,
    pub sessions: Arc<CallSessionManager>,
    pub matchmaker: Arc<CallMatchmaker>,
    pub moderation: Arc<ModerationService>,
    pub hubs: Arc<HubService>,
    pub provisioner: Arc<WebhookProvisioner>,
    pub interactions: Arc<InteractionRegistry>,
    /// Broadcast to every background task on shutdown.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl Runtime {
    /// Wire every component together.
    pub fn build(params: RuntimeParams) -> Self {
        let RuntimeParams {
            config,
            db,
            kv,
            transport,
            content,
        } = params;

        let cache_ttl = Duration::from_secs(config.cache.ttl_secs);
        let cache = Arc::new(CacheLayer::new(Arc::clone(&kv), db.clone(), cache_ttl));
        let store = EntityStore::new(db.clone(), Arc::clone(&cache));

        let content: Arc<dyn ContentClassifier> =
            content.unwrap_or_else(|| Arc::new(KeywordClassifier::new()));

        let provisioner = Arc::new(WebhookProvisioner::new(Arc::clone(&transport)));
        let stats = StatsSink::new(Arc::clone(&kv));

        let rules = Arc::new(RulesGate::new(
            Arc::clone(&kv),
            store.clone(),
            Arc::clone(&transport),
            config.rules.clone(),
        ));

        let admission = Arc::new(AdmissionPipeline::new(
            db.clone(),
            SpamGuard::new(&config.spam),
            AntiSwearEngine::new(db.clone(), cache_ttl),
            Arc::clone(&content),
        ));

        let ledger = BroadcastLedger::new(
            Arc::clone(&kv),
            Duration::from_secs(config.relay.broadcast_retention_secs),
        );
        let broadcast_service = Arc::new(BroadcastService::new(
            Arc::clone(&transport),
            store.clone(),
            ledger,
            config.relay.clone(),
        ));

        let sessions = Arc::new(CallSessionManager::new(
            Arc::clone(&kv),
            Arc::clone(&transport),
            SpamGuard::new(&config.spam),
            Arc::clone(&content),
            config.calls.clone(),
        ));

        let matchmaker = Arc::new(CallMatchmaker::new(
            Arc::clone(&kv),
            store.clone(),
            Arc::clone(&provisioner),
            Arc::clone(&transport),
            stats.clone(),
            config.calls.clone(),
        ));

        let moderation = Arc::new(ModerationService::new(
            db.clone(),
            Arc::clone(&kv),
            &config,
        ));

        let hubs = Arc::new(HubService::new(
            store.clone(),
            Arc::clone(&provisioner),
            config.hubs.clone(),
        ));

        let processor = Arc::new(MessageProcessor::new(
            store.clone(),
            Arc::clone(&rules),
            Arc::clone(&admission),
            Arc::clone(&broadcast_service),
            Arc::clone(&sessions),
            Arc::clone(&provisioner),
            stats,
            Arc::clone(&transport),
            config.relay.clone(),
        ));

        let mut interactions = InteractionRegistry::new();
        interactions.register(
            "rules",
            Some("accept"),
            Arc::new(RulesAcceptHandler::new(Arc::clone(&rules))),
        );

        let (shutdown_tx, _) = broadcast::channel(8);

        Self {
            config,
            db,
            kv,
            store,
            rules,
            admission,
            broadcast: broadcast_service,
            processor,
            sessions,
            matchmaker,
            moderation,
            hubs,
            provisioner,
            interactions: Arc::new(interactions),
            shutdown_tx,
        }
    }

    /// One pruning pass over the in-process accumulators: local cache tiers,
    /// rate-limiter maps, idle locks, notice marks.
    pub fn prune(&self) {
        const LIMITER_BOUND: usize = 10_000;
        let removed = self.store.cache().prune_local();
        if removed > 0 {
            tracing::debug!(removed = removed, "Expired local cache entries pruned");
        }
        self.admission.spam().cleanup(LIMITER_BOUND);
        self.broadcast.cleanup();
        self.provisioner.cleanup();
        self.sessions.cleanup();
        self.processor.cleanup();
    }
}
