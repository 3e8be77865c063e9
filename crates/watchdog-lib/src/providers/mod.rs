//! External collaborators of the decision engine
//!
//! The engine only talks to these traits. [`arm`] and [`documentdb`]
//! implement them over the management and data plane REST APIs. The
//! in-memory `fake` module implements them for tests and is only built
//! under `cfg(test)` or the `test-util` feature.

pub mod arm;
pub mod auth;
pub mod documentdb;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;

use crate::error::ProviderError;
use crate::models::{
    Account, CollectionResponse, MetricSeries, Offer, OfferDetail, PartitionKeyRange,
};
use crate::engine::MetricFilter;
use crate::paging::Page;
use async_trait::async_trait;

pub use arm::ArmClient;
pub use auth::TokenSource;
pub use documentdb::{DocumentDbConnector, DocumentDbSession};

/// Header carrying the platform computed minimum throughput of an offer
pub const MIN_THROUGHPUT_HEADER: &str = "x-ms-cosmos-min-throughput";

/// Header carrying the quota usage of a collection
pub const RESOURCE_USAGE_HEADER: &str = "x-ms-resource-usage";

/// Account discovery and key retrieval
#[async_trait]
pub trait AccountProvider: Send + Sync {
    /// List accounts of a subscription, optionally narrowed to one resource group
    async fn list_accounts(
        &self,
        subscription_id: &str,
        resource_group: Option<&str>,
    ) -> Result<Vec<Account>, ProviderError>;

    /// Primary master key of an account
    async fn primary_key(&self, account: &Account) -> Result<String, ProviderError>;
}

/// Per-collection metric queries
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn list_metrics(
        &self,
        account: &Account,
        database_id: &str,
        collection_id: &str,
        filter: &MetricFilter,
    ) -> Result<Vec<MetricSeries>, ProviderError>;
}

/// Opens data plane sessions against one account
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect(
        &self,
        account: &Account,
        key: &str,
    ) -> Result<Box<dyn DatabaseSession>, ProviderError>;
}

/// Data plane operations on one account
#[async_trait]
pub trait DatabaseSession: Send + Sync {
    /// One page of the account's offers
    async fn list_offers(
        &self,
        continuation: Option<String>,
        max_items: usize,
    ) -> Result<Page<Offer>, ProviderError>;

    /// One page of collection links under a database
    async fn list_collections(
        &self,
        database_link: &str,
        continuation: Option<String>,
        max_items: usize,
    ) -> Result<Page<String>, ProviderError>;

    /// One page of partition key ranges of a collection
    async fn list_partition_key_ranges(
        &self,
        collection_link: &str,
        continuation: Option<String>,
        max_items: usize,
    ) -> Result<Page<PartitionKeyRange>, ProviderError>;

    /// Read a collection with quota information
    async fn read_collection(&self, collection_link: &str)
        -> Result<CollectionResponse, ProviderError>;

    /// Read an offer together with its platform floor
    async fn read_offer(&self, offer: &Offer) -> Result<OfferDetail, ProviderError>;

    /// Replace an offer's throughput in one call
    async fn replace_offer(&self, offer: &Offer, throughput: u32) -> Result<(), ProviderError>;
}
