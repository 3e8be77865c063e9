//! Throughput watchdog for non-production Cosmos DB accounts
//!
//! This crate provides:
//! - Account classification (production vs non-production)
//! - Paged access to offers, collections and partition key ranges
//! - Consumption aggregation over recent metric windows
//! - The downscale policy and the pass orchestrator
//! - Health checks and observability

pub mod classifier;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod paging;
pub mod providers;
pub mod report;
pub mod usage;

pub use classifier::AccountClassifier;
pub use error::{ProviderError, Result, WatchdogError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, WatchdogMetrics};
pub use orchestrator::{PassOptions, Watchdog};
pub use report::{DownscaleRecord, PassReport};
