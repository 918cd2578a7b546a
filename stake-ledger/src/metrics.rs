//! Metrics collection for observability
//!
//! Prometheus metrics on a private registry, so independent keepers (and
//! tests) never collide on the process-global one.
//!
//! # Metrics
//!
//! - `stake_arguments_created_total` - Arguments created
//! - `stake_stakes_created_total` - Stakes created
//! - `stake_stakes_expired_total` - Stakes drained at maturity
//! - `stake_transactions_total` - Ledger transactions committed
//! - `stake_drain_batch_size` - Stakes processed per drain call
//! - `stake_active_stakes` - Stakes waiting in the expiry queue

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Arguments created
    pub arguments_created: IntCounter,

    /// Stakes created
    pub stakes_created: IntCounter,

    /// Stakes expired
    pub stakes_expired: IntCounter,

    /// Ledger transactions committed
    pub transactions_total: IntCounter,

    /// Drain batch size histogram
    pub drain_batch_size: Histogram,

    /// Active stakes gauge
    pub active_stakes: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("arguments_created", &self.arguments_created.get())
            .field("stakes_created", &self.stakes_created.get())
            .field("stakes_expired", &self.stakes_expired.get())
            .field("transactions_total", &self.transactions_total.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let arguments_created =
            IntCounter::new("stake_arguments_created_total", "Arguments created")?;
        registry.register(Box::new(arguments_created.clone()))?;

        let stakes_created = IntCounter::new("stake_stakes_created_total", "Stakes created")?;
        registry.register(Box::new(stakes_created.clone()))?;

        let stakes_expired =
            IntCounter::new("stake_stakes_expired_total", "Stakes drained at maturity")?;
        registry.register(Box::new(stakes_expired.clone()))?;

        let transactions_total =
            IntCounter::new("stake_transactions_total", "Ledger transactions committed")?;
        registry.register(Box::new(transactions_total.clone()))?;

        let drain_batch_size = Histogram::with_opts(
            HistogramOpts::new("stake_drain_batch_size", "Stakes processed per drain call")
                .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]),
        )?;
        registry.register(Box::new(drain_batch_size.clone()))?;

        let active_stakes =
            IntGauge::new("stake_active_stakes", "Stakes waiting in the expiry queue")?;
        registry.register(Box::new(active_stakes.clone()))?;

        Ok(Self {
            arguments_created,
            stakes_created,
            stakes_expired,
            transactions_total,
            drain_batch_size,
            active_stakes,
            registry,
        })
    }

    /// Record an argument creation
    pub fn record_argument_created(&self) {
        self.arguments_created.inc();
    }

    /// Record a stake creation
    pub fn record_stake_created(&self) {
        self.stakes_created.inc();
        self.active_stakes.inc();
    }

    /// Record one drain call that expired `count` stakes
    pub fn record_drain(&self, count: usize) {
        self.drain_batch_size.observe(count as f64);
        self.stakes_expired.inc_by(count as u64);
        self.active_stakes.sub(count as i64);
    }

    /// Record committed ledger transactions
    pub fn record_transactions(&self, count: usize) {
        self.transactions_total.inc_by(count as u64);
    }

    /// Reset the active stakes gauge (after genesis import)
    pub fn set_active_stakes(&self, count: usize) {
        self.active_stakes.set(count as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
