//! Decision engine
//!
//! - Trailing metric windows and query filters
//! - Consumption aggregation across the collections of an offer
//! - Downscale policy

mod aggregator;
mod policy;
mod window;


pub use aggregator::{
    qualifying_sample, AggregatedConsumption, CollectionConsumption, ConsumptionAggregator,
    ConsumptionSummary,
};
pub use policy::{Decision, DownscalePolicy, SkipReason, PLATFORM_MIN_THROUGHPUT};
pub use window::{
    evaluation_windows, MetricFilter, TimeWindow, INGESTION_LAG_MINUTES, MAX_RU_PER_SECOND_METRIC,
    MINUTE_GRAIN, WINDOW_COUNT, WINDOW_MINUTES,
};
