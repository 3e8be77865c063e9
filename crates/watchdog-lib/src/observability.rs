//! Observability infrastructure for the watchdog
//!
//! Provides:
//! - Prometheus metrics (pass latency, accounts and offers evaluated, downscales, reclaimed RU/s)
//! - Structured JSON logging with tracing

use crate::engine::{CollectionConsumption, Decision};
use crate::models::{Account, Offer};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

/// Histogram buckets for pass duration (in seconds)
const PASS_DURATION_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 240.0, 600.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<WatchdogMetricsInner> = OnceLock::new();

struct WatchdogMetricsInner {
    pass_duration_seconds: Histogram,
    passes: IntCounterVec,
    accounts_evaluated: IntCounter,
    accounts_skipped: IntCounter,
    offers_evaluated: IntCounter,
    offers_downscaled: IntCounter,
    downscale_failures: IntCounter,
    throughput_reclaimed: IntCounter,
}

impl WatchdogMetricsInner {
    fn new() -> Self {
        Self {
            pass_duration_seconds: register_histogram!(
                "cosmos_watchdog_pass_duration_seconds",
                "Time spent on one pass over all accounts",
                PASS_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register pass_duration_seconds"),

            passes: register_int_counter_vec!(
                "cosmos_watchdog_passes_total",
                "Passes run, by outcome",
                &["outcome"]
            )
            .expect("Failed to register passes_total"),

            accounts_evaluated: register_int_counter!(
                "cosmos_watchdog_accounts_evaluated_total",
                "Non-production accounts evaluated"
            )
            .expect("Failed to register accounts_evaluated"),

            accounts_skipped: register_int_counter!(
                "cosmos_watchdog_accounts_skipped_total",
                "Accounts skipped because keys or sessions were unavailable"
            )
            .expect("Failed to register accounts_skipped"),

            offers_evaluated: register_int_counter!(
                "cosmos_watchdog_offers_evaluated_total",
                "Throughput offers evaluated"
            )
            .expect("Failed to register offers_evaluated"),

            offers_downscaled: register_int_counter!(
                "cosmos_watchdog_offers_downscaled_total",
                "Throughput offers scaled down"
            )
            .expect("Failed to register offers_downscaled"),

            downscale_failures: register_int_counter!(
                "cosmos_watchdog_downscale_failures_total",
                "Throughput updates refused or failed"
            )
            .expect("Failed to register downscale_failures"),

            throughput_reclaimed: register_int_counter!(
                "cosmos_watchdog_throughput_reclaimed_ru_total",
                "RU/s removed from idle offers"
            )
            .expect("Failed to register throughput_reclaimed"),
        }
    }
}

/// Watchdog metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct WatchdogMetrics {
    _private: (),
}

impl Default for WatchdogMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchdogMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(WatchdogMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &WatchdogMetricsInner {
        GLOBAL_METRICS.get_or_init(WatchdogMetricsInner::new)
    }

    pub fn observe_pass(&self, duration_secs: f64, succeeded: bool) {
        self.inner().pass_duration_seconds.observe(duration_secs);
        let outcome = if succeeded { "success" } else { "failure" };
        self.inner().passes.with_label_values(&[outcome]).inc();
    }

    pub fn inc_accounts_evaluated(&self) {
        self.inner().accounts_evaluated.inc();
    }

    pub fn inc_accounts_skipped(&self) {
        self.inner().accounts_skipped.inc();
    }

    pub fn inc_offers_evaluated(&self) {
        self.inner().offers_evaluated.inc();
    }

    pub fn record_downscale(&self, from: u32, to: u32) {
        self.inner().offers_downscaled.inc();
        self.inner()
            .throughput_reclaimed
            .inc_by(u64::from(from.saturating_sub(to)));
    }

    pub fn inc_downscale_failures(&self) {
        self.inner().downscale_failures.inc();
    }
}

/// Structured logger for watchdog events
///
/// Every event carries a fixed `event` field and the subscription it
/// belongs to.
#[derive(Clone)]
pub struct StructuredLogger {
    subscription: String,
}

impl StructuredLogger {
    pub fn new(subscription: impl Into<String>) -> Self {
        Self {
            subscription: subscription.into(),
        }
    }

    pub fn log_pass_started(&self, resource_group: Option<&str>, dry_run: bool) {
        info!(
            event = "pass_started",
            subscription = %self.subscription,
            resource_group = ?resource_group,
            dry_run = dry_run,
            "Watchdog pass started"
        );
    }

    pub fn log_pass_completed(&self, accounts: usize, offers: usize, downscaled: usize, elapsed_ms: u128) {
        info!(
            event = "pass_completed",
            subscription = %self.subscription,
            accounts = accounts,
            offers = offers,
            downscaled = downscaled,
            elapsed_ms = elapsed_ms,
            "Watchdog pass completed"
        );
    }

    pub fn log_pass_failed(&self, error: &dyn std::error::Error) {
        error!(
            event = "pass_failed",
            subscription = %self.subscription,
            error = %error,
            "Watchdog pass failed"
        );
    }

    pub fn log_account_skipped(&self, account: &Account, reason: &str) {
        warn!(
            event = "account_skipped",
            subscription = %self.subscription,
            account = %account.name,
            reason = %reason,
            "Skipping account"
        );
    }

    pub fn log_allocation_evaluated(&self, account: &Account, offer: &Offer, max_consumed: f64, decision: &Decision) {
        debug!(
            event = "allocation_evaluated",
            subscription = %self.subscription,
            account = %account.name,
            resource_link = %offer.resource_link,
            scope = %offer.scope(),
            provisioned = offer.throughput,
            max_consumed = max_consumed,
            decision = ?decision,
            "Evaluated throughput offer"
        );
    }

    pub fn log_allocation_skipped(&self, account: &Account, offer: &Offer, reason: &str) {
        warn!(
            event = "allocation_skipped",
            subscription = %self.subscription,
            account = %account.name,
            resource_link = %offer.resource_link,
            reason = %reason,
            "Leaving throughput offer unchanged"
        );
    }

    pub fn log_downscaled(&self, account: &Account, offer: &Offer, new_throughput: u32, applied: bool) {
        info!(
            event = "allocation_downscaled",
            subscription = %self.subscription,
            account = %account.name,
            resource_link = %offer.resource_link,
            scope = %offer.scope(),
            previous = offer.throughput,
            new_throughput = new_throughput,
            applied = applied,
            "Scaled down idle throughput offer"
        );
    }

    pub fn log_downscale_failed(&self, account: &Account, offer: &Offer, target: u32, error: &dyn std::error::Error) {
        warn!(
            event = "downscale_failed",
            subscription = %self.subscription,
            account = %account.name,
            resource_link = %offer.resource_link,
            target = target,
            error = %error,
            "Throughput update failed, offer left unchanged"
        );
    }

    pub fn log_collection_usage(&self, consumption: &CollectionConsumption, provisioned: u32) {
        let (database, collection, documents, document_bytes, total_bytes) = match &consumption.usage {
            Some(u) => (
                u.database.as_str(),
                u.collection.as_str(),
                u.document_count,
                u.document_bytes,
                u.total_bytes,
            ),
            None => ("unknown", consumption.collection_link.as_str(), 0, 0, 0),
        };

        debug!(
            event = "collection_usage",
            subscription = %self.subscription,
            database = %database,
            collection = %collection,
            documents = documents,
            document_bytes = document_bytes,
            total_bytes = total_bytes,
            partitions = ?consumption.partition_count,
            max_consumed_per_partition = consumption.max_sample,
            provisioned_per_partition = ?consumption.provisioned_per_partition(provisioned),
            "Collection usage"
        );
    }

    pub fn log_service_started(&self, version: &str, schedule_secs: u64) {
        info!(
            event = "service_started",
            subscription = %self.subscription,
            version = %version,
            schedule_secs = schedule_secs,
            "Cosmos watchdog started"
        );
    }

    pub fn log_service_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            subscription = %self.subscription,
            reason = %reason,
            "Cosmos watchdog shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watchdog_metrics_creation() {
        let metrics = WatchdogMetrics::new();

        metrics.observe_pass(1.5, true);
        metrics.inc_accounts_evaluated();
        metrics.inc_offers_evaluated();
        metrics.record_downscale(1000, 400);
        metrics.record_downscale(400, 1000);
        metrics.inc_downscale_failures();
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("sub-1");
        assert_eq!(logger.subscription, "sub-1");
    }
}
