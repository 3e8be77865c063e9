//! In-memory providers for test suites
//!
//! Compiled for this crate's own tests and, through the `test-util`
//! feature, for dependents that drive passes against a scripted estate.

use super::{AccountProvider, DatabaseConnector, DatabaseSession, MetricsProvider};
use crate::engine::MetricFilter;
use crate::error::ProviderError;
use crate::models::{
    Account, CollectionResponse, MetricSeries, MetricValue, Offer, OfferDetail, PartitionKeyRange,
};
use crate::paging::Page;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Build an offer document the way the offers feed returns it
pub fn offer(id: &str, resource_link: &str, throughput: u32) -> Offer {
    Offer {
        id: id.to_string(),
        resource_link: resource_link.to_string(),
        self_link: format!("offers/{}/", id),
        throughput,
        body: serde_json::json!({
            "id": id,
            "offerVersion": "V2",
            "resource": resource_link,
            "content": { "offerThroughput": throughput },
        }),
    }
}

/// One scripted account with its data plane contents
#[derive(Debug, Clone, Default)]
pub struct FakeAccount {
    pub account: Account,
    /// `None` makes key retrieval fail with an auth error
    pub key: Option<String>,
    pub offers: Vec<Offer>,
    /// Offer id -> platform floor
    pub floors: HashMap<String, u32>,
    /// Database link -> collection links
    pub collections: HashMap<String, Vec<String>>,
    /// Collection link -> number of partition key ranges
    pub partitions: HashMap<String, usize>,
    /// Collection link -> read response
    pub usage: HashMap<String, CollectionResponse>,
    /// Offer ids whose replacement is refused
    pub rejected_replacements: HashSet<String>,
}

impl FakeAccount {
    pub fn new(name: &str) -> Self {
        Self {
            account: Account {
                id: format!(
                    "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.DocumentDB/databaseAccounts/{}",
                    name
                ),
                name: name.to_string(),
                resource_group: "rg".to_string(),
                tags: HashMap::new(),
                document_endpoint: format!("https://{}.documents.azure.com:443/", name),
            },
            key: Some(format!("{}-key", name)),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.account.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn without_key(mut self) -> Self {
        self.key = None;
        self
    }

    pub fn with_offer(mut self, offer: Offer, floor: u32) -> Self {
        self.floors.insert(offer.id.clone(), floor);
        self.offers.push(offer);
        self
    }

    pub fn with_collections(mut self, database_link: &str, links: &[&str]) -> Self {
        self.collections.insert(
            database_link.trim_end_matches('/').to_string(),
            links.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    pub fn with_partitions(mut self, collection_link: &str, count: usize) -> Self {
        self.partitions.insert(collection_link.to_string(), count);
        self
    }

    pub fn with_usage(mut self, collection_link: &str, alt_link: &str, header: &str) -> Self {
        self.usage.insert(
            collection_link.to_string(),
            CollectionResponse {
                alt_link: alt_link.to_string(),
                resource_usage: Some(header.to_string()),
            },
        );
        self
    }

    pub fn rejecting_replace(mut self, offer_id: &str) -> Self {
        self.rejected_replacements.insert(offer_id.to_string());
        self
    }
}

/// A replace call that reached the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub account: String,
    pub offer_id: String,
    pub throughput: u32,
}

type MetricKey = (String, String, String);

#[derive(Default)]
struct FakeState {
    accounts: Vec<FakeAccount>,
    metrics: HashMap<MetricKey, Vec<MetricValue>>,
    failing_metrics: HashSet<MetricKey>,
    fail_account_listing: bool,
    fail_offer_listing: bool,
    replacements: Mutex<Vec<Replacement>>,
    metric_calls: AtomicUsize,
    offer_page_calls: AtomicUsize,
}

/// Scripted estate implementing every provider trait
#[derive(Clone, Default)]
pub struct FakeCloud {
    state: Arc<FakeState>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn state_mut(&mut self) -> &mut FakeState {
        Arc::get_mut(&mut self.state).expect("FakeCloud is configured before it is shared")
    }

    pub fn with_account(mut self, account: FakeAccount) -> Self {
        self.state_mut().accounts.push(account);
        self
    }

    /// Script a metric point for `dbs/<database>/colls/<collection>`
    pub fn with_metric(
        mut self,
        account: &str,
        database: &str,
        collection: &str,
        value: MetricValue,
    ) -> Self {
        self.state_mut()
            .metrics
            .entry(metric_key(account, database, collection))
            .or_default()
            .push(value);
        self
    }

    pub fn with_failing_metrics(mut self, account: &str, database: &str, collection: &str) -> Self {
        self.state_mut()
            .failing_metrics
            .insert(metric_key(account, database, collection));
        self
    }

    pub fn with_failing_account_listing(mut self) -> Self {
        self.state_mut().fail_account_listing = true;
        self
    }

    pub fn with_failing_offer_listing(mut self) -> Self {
        self.state_mut().fail_offer_listing = true;
        self
    }

    pub fn replacements(&self) -> Vec<Replacement> {
        self.state
            .replacements
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn metric_calls(&self) -> usize {
        self.state.metric_calls.load(Ordering::SeqCst)
    }

    pub fn offer_page_calls(&self) -> usize {
        self.state.offer_page_calls.load(Ordering::SeqCst)
    }

    fn account(&self, name: &str) -> Result<&FakeAccount, ProviderError> {
        self.state
            .accounts
            .iter()
            .find(|a| a.account.name == name)
            .ok_or_else(|| ProviderError::NotFound(format!("account {}", name)))
    }
}

fn metric_key(account: &str, database: &str, collection: &str) -> MetricKey {
    (
        account.to_string(),
        database.to_string(),
        collection.to_string(),
    )
}

fn page_of<T: Clone>(
    items: &[T],
    continuation: Option<String>,
    max_items: usize,
) -> Result<Page<T>, ProviderError> {
    let start = match continuation {
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| ProviderError::Malformed(format!("bad continuation {}", token)))?,
        None => 0,
    };
    let end = (start + max_items.max(1)).min(items.len());
    let next = (end < items.len()).then(|| end.to_string());
    Ok(Page::new(items[start.min(end)..end].to_vec(), next))
}

#[async_trait]
impl AccountProvider for FakeCloud {
    async fn list_accounts(
        &self,
        _subscription_id: &str,
        resource_group: Option<&str>,
    ) -> Result<Vec<Account>, ProviderError> {
        if self.state.fail_account_listing {
            return Err(ProviderError::Transient("account listing unavailable".into()));
        }
        Ok(self
            .state
            .accounts
            .iter()
            .map(|a| a.account.clone())
            .filter(|a| resource_group.map_or(true, |rg| a.resource_group == rg))
            .collect())
    }

    async fn primary_key(&self, account: &Account) -> Result<String, ProviderError> {
        self.account(&account.name)?
            .key
            .clone()
            .ok_or_else(|| ProviderError::Auth(format!("no keys for {}", account.name)))
    }
}

#[async_trait]
impl MetricsProvider for FakeCloud {
    async fn list_metrics(
        &self,
        account: &Account,
        database_id: &str,
        collection_id: &str,
        filter: &MetricFilter,
    ) -> Result<Vec<MetricSeries>, ProviderError> {
        self.state.metric_calls.fetch_add(1, Ordering::SeqCst);
        let key = metric_key(&account.name, database_id, collection_id);
        if self.state.failing_metrics.contains(&key) {
            return Err(ProviderError::Transient("metrics unavailable".into()));
        }

        let Some(values) = self.state.metrics.get(&key) else {
            return Ok(Vec::new());
        };
        let values: Vec<MetricValue> = values
            .iter()
            .filter(|v| v.timestamp.map_or(true, |ts| filter.covers(ts)))
            .cloned()
            .collect();

        Ok(vec![MetricSeries {
            name: filter.metric_name.clone(),
            values,
        }])
    }
}

#[async_trait]
impl DatabaseConnector for FakeCloud {
    async fn connect(
        &self,
        account: &Account,
        key: &str,
    ) -> Result<Box<dyn DatabaseSession>, ProviderError> {
        let scripted = self.account(&account.name)?;
        if scripted.key.as_deref() != Some(key) {
            return Err(ProviderError::Auth("key mismatch".into()));
        }
        Ok(Box::new(FakeSession {
            cloud: self.clone(),
            account: account.name.clone(),
        }))
    }
}

/// Data plane session over a [`FakeCloud`] account
pub struct FakeSession {
    cloud: FakeCloud,
    account: String,
}

impl FakeSession {
    fn scripted(&self) -> Result<&FakeAccount, ProviderError> {
        self.cloud.account(&self.account)
    }
}

#[async_trait]
impl DatabaseSession for FakeSession {
    async fn list_offers(
        &self,
        continuation: Option<String>,
        max_items: usize,
    ) -> Result<Page<Offer>, ProviderError> {
        self.cloud
            .state
            .offer_page_calls
            .fetch_add(1, Ordering::SeqCst);
        if self.cloud.state.fail_offer_listing {
            return Err(ProviderError::Transient("offer feed unavailable".into()));
        }
        page_of(&self.scripted()?.offers, continuation, max_items)
    }

    async fn list_collections(
        &self,
        database_link: &str,
        continuation: Option<String>,
        max_items: usize,
    ) -> Result<Page<String>, ProviderError> {
        let collections = self
            .scripted()?
            .collections
            .get(database_link.trim_end_matches('/'))
            .ok_or_else(|| ProviderError::NotFound(database_link.to_string()))?;
        page_of(collections, continuation, max_items)
    }

    async fn list_partition_key_ranges(
        &self,
        collection_link: &str,
        continuation: Option<String>,
        max_items: usize,
    ) -> Result<Page<PartitionKeyRange>, ProviderError> {
        let count = self
            .scripted()?
            .partitions
            .get(collection_link)
            .copied()
            .unwrap_or(1);
        let ranges: Vec<PartitionKeyRange> = (0..count)
            .map(|i| PartitionKeyRange { id: i.to_string() })
            .collect();
        page_of(&ranges, continuation, max_items)
    }

    async fn read_collection(
        &self,
        collection_link: &str,
    ) -> Result<CollectionResponse, ProviderError> {
        Ok(self
            .scripted()?
            .usage
            .get(collection_link)
            .cloned()
            .unwrap_or_else(|| CollectionResponse {
                alt_link: collection_link.to_string(),
                resource_usage: None,
            }))
    }

    async fn read_offer(&self, offer: &Offer) -> Result<OfferDetail, ProviderError> {
        let floor = self
            .scripted()?
            .floors
            .get(&offer.id)
            .copied()
            .ok_or_else(|| ProviderError::NotFound(format!("offer {}", offer.id)))?;
        Ok(OfferDetail {
            throughput: offer.throughput,
            min_throughput: floor,
        })
    }

    async fn replace_offer(&self, offer: &Offer, throughput: u32) -> Result<(), ProviderError> {
        if self.scripted()?.rejected_replacements.contains(&offer.id) {
            return Err(ProviderError::Rejected {
                status: 400,
                message: "throughput change refused".into(),
            });
        }
        let replacement = Replacement {
            account: self.account.clone(),
            offer_id: offer.id.clone(),
            throughput,
        };
        match self.cloud.state.replacements.lock() {
            Ok(mut r) => r.push(replacement),
            Err(poisoned) => poisoned.into_inner().push(replacement),
        }
        Ok(())
    }
}
