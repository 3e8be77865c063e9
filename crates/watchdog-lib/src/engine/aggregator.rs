//! Consumption aggregation across the collections of one offer
//!
//! A shared offer is busy when the *sum* of its collections' consumption is
//! non-zero at some minute, so samples are summed per timestamp first and
//! the peak is taken over the summed series afterwards.

use super::window::{evaluation_windows, MetricFilter};
use crate::error::{Result, WatchdogError};
use crate::models::{Account, CollectionUsage, MetricValue, ResourcePath};
use crate::observability::StructuredLogger;
use crate::paging::PagedResourceIterator;
use crate::providers::{DatabaseSession, MetricsProvider};
use crate::usage::CollectionUsageReader;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::warn;

/// Per-timestamp sum of maximum RU/s across collections
///
/// Safe for concurrent recording, so collection fetches may fan out.
#[derive(Debug, Default)]
pub struct AggregatedConsumption {
    samples: DashMap<DateTime<Utc>, f64>,
}

impl AggregatedConsumption {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collection's maximum at `timestamp` to whatever is already there
    pub fn record(&self, timestamp: DateTime<Utc>, maximum: f64) {
        self.samples
            .entry(timestamp)
            .and_modify(|total| *total += maximum)
            .or_insert(maximum);
    }

    /// Summed value at one timestamp, if any collection reported there
    pub fn get(&self, timestamp: &DateTime<Utc>) -> Option<f64> {
        self.samples.get(timestamp).map(|v| *v)
    }

    /// Highest summed value; zero when nothing was recorded
    pub fn peak(&self) -> f64 {
        self.samples
            .iter()
            .map(|entry| *entry.value())
            .fold(0.0, f64::max)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A metric point usable for aggregation, or `None` if it must be discarded
pub fn qualifying_sample(value: &MetricValue) -> Option<(DateTime<Utc>, f64)> {
    let timestamp = value.timestamp?;
    let maximum = value.maximum?;
    if maximum.is_finite() && maximum > 0.0 {
        Some((timestamp, maximum))
    } else {
        None
    }
}

/// Diagnostics for one collection; not used by the decision
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionConsumption {
    pub collection_link: String,
    pub usage: Option<CollectionUsage>,
    pub partition_count: Option<usize>,
    /// Highest single sample of this collection alone
    pub max_sample: f64,
}

impl CollectionConsumption {
    pub fn provisioned_per_partition(&self, provisioned: u32) -> Option<u32> {
        match self.partition_count {
            Some(count) if count > 0 => Some(provisioned / count as u32),
            _ => None,
        }
    }
}

/// Outcome of aggregating one offer's collections
#[derive(Debug)]
pub struct ConsumptionSummary {
    pub aggregated: AggregatedConsumption,
    pub collections: Vec<CollectionConsumption>,
}

impl ConsumptionSummary {
    /// Peak of the summed series; zero means idle
    pub fn max_consumed(&self) -> f64 {
        self.aggregated.peak()
    }
}

/// Computes the maximum consumed throughput of an offer
pub struct ConsumptionAggregator<'a> {
    account: &'a Account,
    session: &'a dyn DatabaseSession,
    metrics: &'a dyn MetricsProvider,
    logger: &'a StructuredLogger,
}

impl<'a> ConsumptionAggregator<'a> {
    pub fn new(
        account: &'a Account,
        session: &'a dyn DatabaseSession,
        metrics: &'a dyn MetricsProvider,
        logger: &'a StructuredLogger,
    ) -> Self {
        Self {
            account,
            session,
            metrics,
            logger,
        }
    }

    /// Peak aggregated RU/s over the trailing windows ending now
    pub async fn max_consumed(
        &self,
        provisioned: u32,
        collection_links: &[String],
    ) -> Result<ConsumptionSummary> {
        self.max_consumed_at(Utc::now(), provisioned, collection_links)
            .await
    }

    /// Same as [`Self::max_consumed`] with an explicit "now"
    pub async fn max_consumed_at(
        &self,
        now: DateTime<Utc>,
        provisioned: u32,
        collection_links: &[String],
    ) -> Result<ConsumptionSummary> {
        let aggregated = AggregatedConsumption::new();
        let mut collections = Vec::with_capacity(collection_links.len());

        for link in collection_links {
            let consumption = self
                .accumulate_collection(now, provisioned, link, &aggregated)
                .await?;
            collections.push(consumption);
        }

        Ok(ConsumptionSummary {
            aggregated,
            collections,
        })
    }

    /// Record one collection's samples into `aggregated`
    pub async fn accumulate_collection(
        &self,
        now: DateTime<Utc>,
        provisioned: u32,
        collection_link: &str,
        aggregated: &AggregatedConsumption,
    ) -> Result<CollectionConsumption> {
        let path = ResourcePath::parse(collection_link)?;
        let partition_count = self.partition_count(collection_link).await;
        let usage = match CollectionUsageReader::new(self.session)
            .read_usage(collection_link)
            .await
        {
            Ok(usage) => Some(usage),
            Err(err) => {
                warn!(collection = %collection_link, error = %err, "Could not read collection usage");
                None
            }
        };

        let mut max_sample: f64 = 0.0;
        for window in evaluation_windows(now) {
            let filter = MetricFilter::max_ru_per_second(&window)?;
            let series = self
                .metrics
                .list_metrics(self.account, &path.database, &path.collection, &filter)
                .await
                .map_err(|source| WatchdogError::provider("list metrics", source))?;

            // Providers may return the shared boundary minute in both adjacent windows
            for value in series.iter().flat_map(|s| s.values.iter()) {
                if let Some((timestamp, maximum)) =
                    qualifying_sample(value).filter(|(timestamp, _)| filter.covers(*timestamp))
                {
                    aggregated.record(timestamp, maximum);
                    max_sample = max_sample.max(maximum);
                }
            }
        }

        let consumption = CollectionConsumption {
            collection_link: collection_link.to_string(),
            usage,
            partition_count,
            max_sample,
        };
        self.logger.log_collection_usage(&consumption, provisioned);

        Ok(consumption)
    }

    async fn partition_count(&self, collection_link: &str) -> Option<usize> {
        let session = self.session;
        let mut ranges = PagedResourceIterator::new(move |token, size| {
            session.list_partition_key_ranges(collection_link, token, size)
        });

        match ranges.count().await {
            Ok(count) => Some(count),
            Err(err) => {
                warn!(collection = %collection_link, error = %err, "Could not count partition key ranges");
                None
            }
        }
    }
}
