//! Prometheus metrics collection for interchatd.
//!
//! Provides production-ready observability via Prometheus metrics exposed on
//! an HTTP endpoint. Tracks relay throughput, admission outcomes, fan-out
//! health, call activity, and cache behavior.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    // ========================================================================
    // Counters (monotonic increasing)
    // ========================================================================

    /// Total inbound chat events inspected by the processor.
    pub static ref MESSAGES_PROCESSED: IntCounter = IntCounter::new(
        "interchat_messages_processed_total",
        "Inbound chat events inspected"
    ).unwrap();

    /// Total source messages fanned out to a hub.
    pub static ref MESSAGES_BROADCAST: IntCounter = IntCounter::new(
        "interchat_messages_broadcast_total",
        "Source messages fanned out"
    ).unwrap();

    /// Total messages denied by the admission pipeline.
    pub static ref ADMISSION_BLOCKED: IntCounter = IntCounter::new(
        "interchat_admission_blocked_total",
        "Messages denied by admission"
    ).unwrap();

    /// Total rules prompts emitted.
    pub static ref RULES_PROMPTED: IntCounter = IntCounter::new(
        "interchat_rules_prompted_total",
        "Rules prompts emitted"
    ).unwrap();

    /// Total per-sibling webhook delivery failures (after retries).
    pub static ref FANOUT_FAILURES: IntCounter = IntCounter::new(
        "interchat_fanout_failures_total",
        "Sibling deliveries failed after retries"
    ).unwrap();

    /// Total fan-outs dropped by the per-hub concurrency bound.
    pub static ref FANOUT_DROPPED: IntCounter = IntCounter::new(
        "interchat_fanout_dropped_total",
        "Fan-outs dropped under backpressure"
    ).unwrap();

    /// Total webhooks provisioned.
    pub static ref WEBHOOKS_PROVISIONED: IntCounter = IntCounter::new(
        "interchat_webhooks_provisioned_total",
        "Webhooks created"
    ).unwrap();

    /// Total call pairs formed by the matchmaker.
    pub static ref CALLS_PAIRED: IntCounter = IntCounter::new(
        "interchat_calls_paired_total",
        "Call pairs formed"
    ).unwrap();

    /// Total messages relayed inside calls.
    pub static ref CALL_MESSAGES_RELAYED: IntCounter = IntCounter::new(
        "interchat_call_messages_relayed_total",
        "Call messages relayed"
    ).unwrap();

    /// Total call reports filed.
    pub static ref REPORTS_FILED: IntCounter = IntCounter::new(
        "interchat_reports_filed_total",
        "Call reports filed"
    ).unwrap();

    /// Total bans created (user and server).
    pub static ref BANS_CREATED: IntCounter = IntCounter::new(
        "interchat_bans_created_total",
        "Bans created"
    ).unwrap();

    /// Connection/hub cache hits.
    pub static ref CACHE_HITS: IntCounter = IntCounter::new(
        "interchat_cache_hits_total",
        "Channel resolution cache hits"
    ).unwrap();

    /// Connection/hub cache misses (authoritative store reads).
    pub static ref CACHE_MISSES: IntCounter = IntCounter::new(
        "interchat_cache_misses_total",
        "Channel resolution cache misses"
    ).unwrap();

    // ========================================================================
    // Gauges (can increase/decrease)
    // ========================================================================

    /// Currently active calls.
    pub static ref ACTIVE_CALLS: IntGauge = IntGauge::new(
        "interchat_active_calls",
        "Currently active calls"
    ).unwrap();

    /// Current matchmaker queue depth.
    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "interchat_matchmaker_queue_depth",
        "Waiting call requests"
    ).unwrap();
}

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at daemon startup before any metrics are recorded.
pub fn init() {
    REGISTRY.register(Box::new(MESSAGES_PROCESSED.clone())).unwrap();
    REGISTRY.register(Box::new(MESSAGES_BROADCAST.clone())).unwrap();
    REGISTRY.register(Box::new(ADMISSION_BLOCKED.clone())).unwrap();
    REGISTRY.register(Box::new(RULES_PROMPTED.clone())).unwrap();
    REGISTRY.register(Box::new(FANOUT_FAILURES.clone())).unwrap();
    REGISTRY.register(Box::new(FANOUT_DROPPED.clone())).unwrap();
    REGISTRY.register(Box::new(WEBHOOKS_PROVISIONED.clone())).unwrap();
    REGISTRY.register(Box::new(CALLS_PAIRED.clone())).unwrap();
    REGISTRY.register(Box::new(CALL_MESSAGES_RELAYED.clone())).unwrap();
    REGISTRY.register(Box::new(REPORTS_FILED.clone())).unwrap();
    REGISTRY.register(Box::new(BANS_CREATED.clone())).unwrap();
    REGISTRY.register(Box::new(CACHE_HITS.clone())).unwrap();
    REGISTRY.register(Box::new(CACHE_MISSES.clone())).unwrap();
    REGISTRY.register(Box::new(ACTIVE_CALLS.clone())).unwrap();
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone())).unwrap();
}

/// Gather all metrics in Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
