//! Core data models for the watchdog

use crate::error::{Result, WatchdogError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A database account discovered through the management plane
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Full management resource id
    pub id: String,
    pub name: String,
    pub resource_group: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Data plane endpoint, e.g. `https://name.documents.azure.com:443/`
    pub document_endpoint: String,
}

/// Whether an offer provisions one collection or a whole database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferScope {
    /// Throughput shared by every collection of a database
    SharedDatabase,
    /// Throughput dedicated to a single collection
    Collection,
}

impl OfferScope {
    /// Shared offers point at a database, dedicated ones at a collection
    pub fn from_resource_link(resource_link: &str) -> Self {
        if resource_link.contains("/colls/") {
            OfferScope::Collection
        } else {
            OfferScope::SharedDatabase
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OfferScope::SharedDatabase => "SharedDatabaseOffer",
            OfferScope::Collection => "CollectionOffer",
        }
    }
}

impl fmt::Display for OfferScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A provisioned-throughput allocation ("offer")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    /// Link of the database or collection this offer governs
    pub resource_link: String,
    /// Link used to read and replace the offer itself
    pub self_link: String,
    /// Current provisioned throughput in RU/s
    pub throughput: u32,
    /// Raw provider document, carried so a replace can echo it back
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Offer {
    pub fn scope(&self) -> OfferScope {
        OfferScope::from_resource_link(&self.resource_link)
    }
}

/// Offer as read back from the provider, with its platform floor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferDetail {
    pub throughput: u32,
    /// Minimum throughput the platform accepts for this offer right now
    pub min_throughput: u32,
}

/// Database and collection ids addressed by a collection link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    pub database: String,
    pub collection: String,
}

impl ResourcePath {
    /// Parse `dbs/<database>/colls/<collection>[/...]`
    pub fn parse(link: &str) -> Result<Self> {
        let segments: Vec<&str> = link.trim_start_matches('/').split('/').collect();
        if segments.len() < 4 {
            return Err(WatchdogError::Parse(format!(
                "collection link `{}` has {} segments, expected at least 4",
                link,
                segments.len()
            )));
        }

        Ok(Self {
            database: segments[1].to_string(),
            collection: segments[3].to_string(),
        })
    }
}

/// Collection read back with quota information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionResponse {
    /// Name based link, `dbs/<db>/colls/<coll>`
    pub alt_link: String,
    /// Raw `x-ms-resource-usage` header, when present
    pub resource_usage: Option<String>,
}

/// Storage metadata for one collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionUsage {
    pub database: String,
    pub collection: String,
    pub document_count: u64,
    pub document_bytes: u64,
    pub total_bytes: u64,
}

/// One partition key range of a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionKeyRange {
    pub id: String,
}

/// A single metric point as returned by the metrics API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub timestamp: Option<DateTime<Utc>>,
    pub maximum: Option<f64>,
}

impl MetricValue {
    pub fn new(timestamp: DateTime<Utc>, maximum: f64) -> Self {
        Self {
            timestamp: Some(timestamp),
            maximum: Some(maximum),
        }
    }
}

/// A named series of metric points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub name: String,
    pub values: Vec<MetricValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_scope_from_link() {
        assert_eq!(
            OfferScope::from_resource_link("dbs/abc=/colls/def=/"),
            OfferScope::Collection
        );
        assert_eq!(
            OfferScope::from_resource_link("dbs/abc=/"),
            OfferScope::SharedDatabase
        );
        assert_eq!(OfferScope::SharedDatabase.to_string(), "SharedDatabaseOffer");
    }

    #[test]
    fn test_resource_path_parse() {
        let path = ResourcePath::parse("dbs/orders/colls/lines").unwrap();
        assert_eq!(path.database, "orders");
        assert_eq!(path.collection, "lines");

        let path = ResourcePath::parse("dbs/abc=/colls/def=/").unwrap();
        assert_eq!(path.collection, "def=");
    }

    #[test]
    fn test_resource_path_too_short() {
        assert!(matches!(
            ResourcePath::parse("dbs/orders"),
            Err(WatchdogError::Parse(_))
        ));
    }
}
