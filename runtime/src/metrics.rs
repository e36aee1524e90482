//! Metric descriptions and Prometheus export.
//!
//! The runtime records through the `metrics` facade; nothing is exported
//! unless the host installs a recorder. Hosts that want Prometheus output call
//! [`install_prometheus_recorder`] once at startup, or build a recorder with
//! [`build_prometheus_recorder`] and install it themselves.
//!
//! # Example
//!
//! ```rust,no_run
//! use entitlements_runtime::metrics;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = metrics::install_prometheus_recorder()?;
//! // ... later, from an admin endpoint:
//! let body = handle.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

const DURATION_BUCKETS: &[f64] = &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

fn builder() -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), DURATION_BUCKETS)
        .map_err(|e| MetricsError::Build(e.to_string()))
}

/// Build a Prometheus recorder without installing it globally.
///
/// # Errors
///
/// Returns [`MetricsError::Build`] if the bucket configuration is rejected.
pub fn build_prometheus_recorder() -> Result<PrometheusRecorder, MetricsError> {
    Ok(builder()?.build_recorder())
}

/// Install a global Prometheus recorder and describe every metric.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if a global recorder is already installed.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, MetricsError> {
    let handle = builder()?
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    describe_metrics();
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Register descriptions for every metric the runtime records.
pub fn describe_metrics() {
    // Store
    describe_counter!("store.commands.total", "Actions sent to a store");
    describe_histogram!("store.reducer.duration_seconds", "Time spent inside reduce");
    describe_counter!("store.effects.executed", "Effects started, by type");
    describe_counter!("store.shutdown.initiated", "Graceful shutdowns started");
    describe_counter!("store.shutdown.timeout", "Shutdowns that timed out with effects pending");
    describe_counter!("store.shutdown.rejected_actions", "Actions rejected during shutdown");

    // Transactions
    describe_counter!("entitlements.transactions.received", "Transactions received, by origin");
    describe_counter!("entitlements.transactions.folded", "Transactions folded into the snapshot");
    describe_counter!(
        "entitlements.transactions.unknown_product",
        "Transactions acknowledged and dropped for an unconfigured product"
    );
    describe_counter!(
        "entitlements.transactions.unverified",
        "Transactions acknowledged and dropped after failed verification"
    );
    describe_counter!("entitlements.transactions.acknowledged", "Transactions finished upstream");
    describe_counter!("entitlements.listener.started", "Transaction listeners started");
    describe_counter!("entitlements.listener.stopped", "Transaction listeners stopped");

    // Restore
    describe_counter!("entitlements.restore.completed", "Full re-syncs folded");
    describe_counter!("entitlements.restore.failed", "Full re-syncs that failed upstream");
    describe_histogram!("entitlements.restore.duration_seconds", "Upstream full re-sync latency");

    // Purchases
    describe_counter!("entitlements.purchases.succeeded", "Purchases folded into the snapshot");
    describe_counter!("entitlements.purchases.failed", "Purchase attempts that failed, by kind");

    // Snapshot store
    describe_counter!("entitlements.snapshot_store.saves", "Snapshots persisted");
    describe_counter!("entitlements.snapshot_store.loads", "Snapshot loads");
    describe_counter!("entitlements.snapshot_store.corrupt_index", "Loads that found a corrupt index");
    describe_counter!(
        "entitlements.snapshot_store.index_recovered",
        "Loads that fell back to the backup index"
    );
    describe_counter!("entitlements.snapshot_store.skipped_entries", "Persisted entries skipped on load");

    // Product cache
    describe_counter!("entitlements.product_cache.hits", "Requested products served from cache");
    describe_counter!("entitlements.product_cache.misses", "Requested products fetched upstream");
    describe_counter!("entitlements.product_cache.fetch_failures", "Failed catalog fetches");
}
