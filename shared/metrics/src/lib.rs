//! Sniper Metrics - Metrics and monitoring for the pair sniper
//!
//! Provides Prometheus-compatible metrics for the watcher, executor and
//! ledger agents. All families live in one process-wide registry.

use prometheus::{
    GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::OnceLock;

/// Global metrics registry
static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Global metric families
static METRICS: OnceLock<SniperMetrics> = OnceLock::new();

/// Get or initialize the global registry
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Get or initialize the global metric families
pub fn global() -> &'static SniperMetrics {
    METRICS.get_or_init(SniperMetrics::new)
}

/// Latency buckets for histograms (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.5, 1.0, 2.0, 3.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0,
];

/// Gas multiplier buckets (x network gas price)
pub const MULTIPLIER_BUCKETS: &[f64] = &[1.0, 1.1, 1.2, 1.4, 1.6, 1.8, 2.0, 2.5, 3.0, 5.0];

/// Pair watcher metrics
pub struct WatcherMetrics {
    pub polls: IntCounterVec,
    pub poll_errors: IntCounterVec,
    pub triggers: IntCounterVec,
    pub last_price: GaugeVec,
    pub active_watchers: IntGauge,
}

impl WatcherMetrics {
    pub fn new(registry: &Registry) -> Self {
        let polls = IntCounterVec::new(
            Opts::new("sniper_watcher_polls_total", "Reserve polls performed"),
            &["pair"],
        ).expect("Failed to create watcher_polls metric");

        let poll_errors = IntCounterVec::new(
            Opts::new("sniper_watcher_poll_errors_total", "Reserve polls that failed"),
            &["pair"],
        ).expect("Failed to create watcher_poll_errors metric");

        let triggers = IntCounterVec::new(
            Opts::new("sniper_watcher_triggers_total", "Trigger predicates satisfied"),
            &["pair", "kind"],
        ).expect("Failed to create watcher_triggers metric");

        let last_price = GaugeVec::new(
            Opts::new("sniper_watcher_last_price", "Last observed spot price (quote per base)"),
            &["pair"],
        ).expect("Failed to create watcher_last_price metric");

        let active_watchers = IntGauge::new(
            "sniper_active_watchers",
            "Targets currently being polled",
        ).expect("Failed to create active_watchers metric");

        registry.register(Box::new(polls.clone())).ok();
        registry.register(Box::new(poll_errors.clone())).ok();
        registry.register(Box::new(triggers.clone())).ok();
        registry.register(Box::new(last_price.clone())).ok();
        registry.register(Box::new(active_watchers.clone())).ok();

        Self {
            polls,
            poll_errors,
            triggers,
            last_price,
            active_watchers,
        }
    }
}

/// Trade executor metrics
pub struct ExecutorMetrics {
    pub attempts: IntCounterVec,
    pub outcomes: IntCounterVec,
    pub gas_multiplier: HistogramVec,
    pub confirmation_latency: HistogramVec,
}

impl ExecutorMetrics {
    pub fn new(registry: &Registry) -> Self {
        let attempts = IntCounterVec::new(
            Opts::new("sniper_swap_attempts_total", "Swap submission attempts"),
            &["pair", "result"],
        ).expect("Failed to create swap_attempts metric");

        let outcomes = IntCounterVec::new(
            Opts::new("sniper_swap_outcomes_total", "Terminal swap outcomes"),
            &["pair", "outcome"],
        ).expect("Failed to create swap_outcomes metric");

        let gas_multiplier = HistogramVec::new(
            HistogramOpts::new("sniper_swap_gas_multiplier", "Gas multiplier used per attempt")
                .buckets(MULTIPLIER_BUCKETS.to_vec()),
            &["pair"],
        ).expect("Failed to create swap_gas_multiplier metric");

        let confirmation_latency = HistogramVec::new(
            HistogramOpts::new("sniper_swap_confirmation_seconds", "Trigger to confirmation latency")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["pair"],
        ).expect("Failed to create swap_confirmation metric");

        registry.register(Box::new(attempts.clone())).ok();
        registry.register(Box::new(outcomes.clone())).ok();
        registry.register(Box::new(gas_multiplier.clone())).ok();
        registry.register(Box::new(confirmation_latency.clone())).ok();

        Self {
            attempts,
            outcomes,
            gas_multiplier,
            confirmation_latency,
        }
    }
}

/// Position ledger metrics
pub struct LedgerMetrics {
    pub transitions: IntCounterVec,
    pub store_errors: IntCounterVec,
    pub denied: IntCounterVec,
}

impl LedgerMetrics {
    pub fn new(registry: &Registry) -> Self {
        let transitions = IntCounterVec::new(
            Opts::new("sniper_ledger_transitions_total", "Position state transitions"),
            &["from", "to"],
        ).expect("Failed to create ledger_transitions metric");

        let store_errors = IntCounterVec::new(
            Opts::new("sniper_ledger_store_errors_total", "Durable store failures"),
            &["operation"],
        ).expect("Failed to create ledger_store_errors metric");

        let denied = IntCounterVec::new(
            Opts::new("sniper_ledger_denied_total", "Authorizations denied"),
            &["state"],
        ).expect("Failed to create ledger_denied metric");

        registry.register(Box::new(transitions.clone())).ok();
        registry.register(Box::new(store_errors.clone())).ok();
        registry.register(Box::new(denied.clone())).ok();

        Self {
            transitions,
            store_errors,
            denied,
        }
    }
}

/// All sniper metrics
pub struct SniperMetrics {
    pub watcher: WatcherMetrics,
    pub executor: ExecutorMetrics,
    pub ledger: LedgerMetrics,
}

impl SniperMetrics {
    pub fn new() -> Self {
        let registry = registry();
        Self {
            watcher: WatcherMetrics::new(registry),
            executor: ExecutorMetrics::new(registry),
            ledger: LedgerMetrics::new(registry),
        }
    }
}

impl Default for SniperMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Get metrics as Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
