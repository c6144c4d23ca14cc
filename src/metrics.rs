//! Prometheus metrics for monitoring newswire.
//!
//! Covers cache behavior, remote fetches, the push channel, and
//! persistence. The registry is rendered on demand via `render()`;
//! serving it over HTTP is left to the embedder.

use prometheus::{Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;
use tracing::error;

/// All metrics for the newswire subsystem
pub struct Metrics {
    pub registry: Registry,

    // Cache metrics
    pub cache_hits_total: Counter,
    pub cache_misses_total: Counter,
    pub cache_entries: Gauge,
    pub cache_stale_served_total: Counter,
    pub cache_sweep_removed_total: Counter,

    // Remote fetch metrics
    pub fetch_total: CounterVec,
    pub fetch_duration_seconds: HistogramVec,

    // Push channel metrics
    pub push_messages_total: CounterVec,
    pub push_reconnects_total: Counter,
    pub push_connection_state: Gauge,

    // Persistence metrics
    pub persistence_total: CounterVec,
}

impl Metrics {
    /// Create a new metrics registry with all metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cache metrics
        let cache_hits_total = Counter::with_opts(Opts::new(
            "newswire_cache_hits_total",
            "Cache reads answered by a fresh entry",
        ))?;
        registry.register(Box::new(cache_hits_total.clone()))?;

        let cache_misses_total = Counter::with_opts(Opts::new(
            "newswire_cache_misses_total",
            "Cache reads that found nothing fresh",
        ))?;
        registry.register(Box::new(cache_misses_total.clone()))?;

        let cache_entries = Gauge::with_opts(Opts::new(
            "newswire_cache_entries",
            "Entries currently in the store, stale included",
        ))?;
        registry.register(Box::new(cache_entries.clone()))?;

        let cache_stale_served_total = Counter::with_opts(Opts::new(
            "newswire_cache_stale_served_total",
            "Degraded reads served from a stale entry",
        ))?;
        registry.register(Box::new(cache_stale_served_total.clone()))?;

        let cache_sweep_removed_total = Counter::with_opts(Opts::new(
            "newswire_cache_sweep_removed_total",
            "Entries removed by the periodic sweep",
        ))?;
        registry.register(Box::new(cache_sweep_removed_total.clone()))?;

        // Remote fetch metrics
        let fetch_total = CounterVec::new(
            Opts::new("newswire_fetch_total", "Remote fetches by kind and status"),
            &["kind", "status"],
        )?;
        registry.register(Box::new(fetch_total.clone()))?;

        let fetch_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "newswire_fetch_duration_seconds",
                "Remote fetch duration in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["kind"],
        )?;
        registry.register(Box::new(fetch_duration_seconds.clone()))?;

        // Push channel metrics
        let push_messages_total = CounterVec::new(
            Opts::new(
                "newswire_push_messages_total",
                "Push messages received by type",
            ),
            &["type"],
        )?;
        registry.register(Box::new(push_messages_total.clone()))?;

        let push_reconnects_total = Counter::with_opts(Opts::new(
            "newswire_push_reconnects_total",
            "Reconnect attempts scheduled after a dropped connection",
        ))?;
        registry.register(Box::new(push_reconnects_total.clone()))?;

        let push_connection_state = Gauge::with_opts(Opts::new(
            "newswire_push_connection_state",
            "Connection state (0=disconnected 1=connecting 2=connected 3=reconnecting)",
        ))?;
        registry.register(Box::new(push_connection_state.clone()))?;

        // Persistence metrics
        let persistence_total = CounterVec::new(
            Opts::new(
                "newswire_persistence_total",
                "Persistence operations by op and status",
            ),
            &["op", "status"],
        )?;
        registry.register(Box::new(persistence_total.clone()))?;

        Ok(Self {
            registry,
            cache_hits_total,
            cache_misses_total,
            cache_entries,
            cache_stale_served_total,
            cache_sweep_removed_total,
            fetch_total,
            fetch_duration_seconds,
            push_messages_total,
            push_reconnects_total,
            push_connection_state,
            persistence_total,
        })
    }

    /// Record a cache read outcome
    pub fn record_cache_read(&self, hit: bool) {
        if hit {
            self.cache_hits_total.inc();
        } else {
            self.cache_misses_total.inc();
        }
    }

    /// Record a degraded read served from a stale entry
    pub fn record_stale_served(&self) {
        self.cache_stale_served_total.inc();
    }

    /// Record a completed sweep
    pub fn record_sweep(&self, removed: usize) {
        self.cache_sweep_removed_total.inc_by(removed as f64);
    }

    /// Record a remote fetch
    pub fn record_fetch(&self, kind: &str, status: &str, duration_secs: f64) {
        self.fetch_total.with_label_values(&[kind, status]).inc();
        self.fetch_duration_seconds
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    /// Record a push message by wire type
    pub fn record_push_message(&self, message_type: &str) {
        self.push_messages_total
            .with_label_values(&[message_type])
            .inc();
    }

    /// Record a scheduled reconnect attempt
    pub fn record_reconnect(&self) {
        self.push_reconnects_total.inc();
    }

    /// Update the connection state gauge
    pub fn set_connection_state(&self, state: u8) {
        self.push_connection_state.set(state as f64);
    }

    /// Record a persistence save or load
    pub fn record_persistence(&self, op: &str, status: &str) {
        self.persistence_total.with_label_values(&[op, status]).inc();
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                String::new()
            }
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Shared metrics instance
pub type SharedMetrics = Arc<Metrics>;

/// Create a shared metrics instance
pub fn create_metrics() -> SharedMetrics {
    Arc::new(Metrics::new().expect("Failed to create metrics"))
}
