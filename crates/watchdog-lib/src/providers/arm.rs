//! Management plane client
//!
//! Account discovery, key retrieval and per-collection metrics.

use super::auth::TokenSource;
use super::{AccountProvider, MetricsProvider};
use crate::engine::MetricFilter;
use crate::error::ProviderError;
use crate::models::{Account, MetricSeries, MetricValue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Public cloud management endpoint
pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";

const API_VERSION: &str = "2021-04-15";

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResource {
    id: String,
    name: String,
    #[serde(default)]
    tags: Option<HashMap<String, String>>,
    properties: AccountProperties,
}

#[derive(Debug, Deserialize)]
struct AccountProperties {
    #[serde(rename = "documentEndpoint")]
    document_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct KeysResponse {
    #[serde(rename = "primaryMasterKey")]
    primary_master_key: String,
}

#[derive(Debug, Deserialize)]
struct MetricResource {
    name: MetricName,
    #[serde(rename = "metricValues", default)]
    metric_values: Vec<MetricValueResource>,
}

#[derive(Debug, Deserialize)]
struct MetricName {
    value: String,
}

#[derive(Debug, Deserialize)]
struct MetricValueResource {
    timestamp: Option<DateTime<Utc>>,
    maximum: Option<f64>,
}

impl From<AccountResource> for Account {
    fn from(resource: AccountResource) -> Self {
        Account {
            resource_group: resource_group_from_id(&resource.id).unwrap_or_default(),
            id: resource.id,
            name: resource.name,
            tags: resource.tags.unwrap_or_default(),
            document_endpoint: resource.properties.document_endpoint,
        }
    }
}

/// Resource group segment of a management resource id
pub fn resource_group_from_id(id: &str) -> Option<String> {
    let mut segments = id.split('/');
    while let Some(segment) = segments.next() {
        if segment.eq_ignore_ascii_case("resourceGroups") {
            return segments.next().map(str::to_string);
        }
    }
    None
}

/// REST client for the management plane
pub struct ArmClient {
    http: Client,
    base_url: Url,
    tokens: TokenSource,
}

impl ArmClient {
    pub fn new(base_url: &str, tokens: TokenSource) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ProviderError::Transient(format!("failed to create HTTP client: {}", e)))?;
        let base_url = Url::parse(base_url)
            .map_err(|e| ProviderError::Malformed(format!("invalid management endpoint: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            tokens,
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, ProviderError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| ProviderError::Malformed(format!("invalid path {}: {}", path, e)))?;
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        for (key, value) in query {
            url.query_pairs_mut().append_pair(key, value);
        }
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, method: Method, url: Url) -> Result<T, ProviderError> {
        let token = self.tokens.token().await?;
        debug!(method = %method, url = %url, "Management plane request");

        let response = self
            .http
            .request(method, url)
            .bearer_auth(token)
            .header("Content-Length", "0")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        response.json().await.map_err(ProviderError::from)
    }

    /// Follow `nextLink` until the listing is exhausted
    async fn list_all<T: DeserializeOwned>(&self, first: Url) -> Result<Vec<T>, ProviderError> {
        let mut items = Vec::new();
        let mut next = Some(first);

        while let Some(url) = next.take() {
            let page: ListResponse<T> = self.send(Method::GET, url).await?;
            items.extend(page.value);
            next = match page.next_link.filter(|link| !link.is_empty()) {
                Some(link) => Some(Url::parse(&link).map_err(|e| {
                    ProviderError::Malformed(format!("invalid nextLink {}: {}", link, e))
                })?),
                None => None,
            };
        }

        Ok(items)
    }
}

#[async_trait]
impl AccountProvider for ArmClient {
    async fn list_accounts(
        &self,
        subscription_id: &str,
        resource_group: Option<&str>,
    ) -> Result<Vec<Account>, ProviderError> {
        let path = match resource_group {
            Some(rg) => format!(
                "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.DocumentDB/databaseAccounts",
                subscription_id, rg
            ),
            None => format!(
                "/subscriptions/{}/providers/Microsoft.DocumentDB/databaseAccounts",
                subscription_id
            ),
        };

        let resources: Vec<AccountResource> = self.list_all(self.url(&path, &[])?).await?;
        Ok(resources.into_iter().map(Account::from).collect())
    }

    async fn primary_key(&self, account: &Account) -> Result<String, ProviderError> {
        let url = self.url(&format!("{}/listKeys", account.id), &[])?;
        let keys: KeysResponse = self.send(Method::POST, url).await?;
        Ok(keys.primary_master_key)
    }
}

#[async_trait]
impl MetricsProvider for ArmClient {
    async fn list_metrics(
        &self,
        account: &Account,
        database_id: &str,
        collection_id: &str,
        filter: &MetricFilter,
    ) -> Result<Vec<MetricSeries>, ProviderError> {
        let path = format!(
            "{}/databases/{}/collections/{}/partitions/metrics",
            account.id, database_id, collection_id
        );
        let expression = filter.to_expression();
        let url = self.url(&path, &[("$filter", expression.as_str())])?;

        let response: ListResponse<MetricResource> = self.send(Method::GET, url).await?;
        Ok(response
            .value
            .into_iter()
            .map(|metric| MetricSeries {
                name: metric.name.value,
                values: metric
                    .metric_values
                    .into_iter()
                    .map(|v| MetricValue {
                        timestamp: v.timestamp,
                        maximum: v.maximum,
                    })
                    .collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const ACCOUNT_ID: &str =
        "/subscriptions/sub/resourceGroups/rg-dev/providers/Microsoft.DocumentDB/databaseAccounts/orders-dev";

    fn account() -> Account {
        Account {
            id: ACCOUNT_ID.to_string(),
            name: "orders-dev".to_string(),
            resource_group: "rg-dev".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_resource_group_from_id() {
        assert_eq!(resource_group_from_id(ACCOUNT_ID).as_deref(), Some("rg-dev"));
        assert_eq!(resource_group_from_id("/subscriptions/sub"), None);
    }

    #[tokio::test]
    async fn test_list_accounts_follows_next_link() {
        let mut server = mockito::Server::new_async().await;
        let next = format!(
            "{}/subscriptions/sub/providers/Microsoft.DocumentDB/databaseAccounts?page=2",
            server.url()
        );
        let first = server
            .mock("GET", "/subscriptions/sub/providers/Microsoft.DocumentDB/databaseAccounts")
            .match_query(Matcher::UrlEncoded("api-version".into(), API_VERSION.into()))
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(format!(
                r#"{{"value":[{{"id":"{}","name":"orders-dev","tags":{{"CosmosDBAutoScaleCategory":"NonProd"}},"properties":{{"documentEndpoint":"https://orders-dev.documents.azure.com:443/"}}}}],"nextLink":"{}"}}"#,
                ACCOUNT_ID, next
            ))
            .create_async()
            .await;
        let second = server
            .mock("GET", "/subscriptions/sub/providers/Microsoft.DocumentDB/databaseAccounts")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_body(r#"{"value":[]}"#)
            .create_async()
            .await;

        let client = ArmClient::new(&server.url(), TokenSource::fixed("tok")).unwrap();
        let accounts = client.list_accounts("sub", None).await.unwrap();

        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].resource_group, "rg-dev");
        assert_eq!(accounts[0].tags["CosmosDBAutoScaleCategory"], "NonProd");
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_keys_auth_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", format!("{}/listKeys", ACCOUNT_ID).as_str())
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let client = ArmClient::new(&server.url(), TokenSource::fixed("tok")).unwrap();
        let err = client.primary_key(&account()).await.unwrap_err();

        assert!(matches!(err, ProviderError::Auth(_)));
    }

    #[tokio::test]
    async fn test_list_metrics_sends_filter() {
        let mut server = mockito::Server::new_async().await;
        let start = "2024-03-01T12:15:00Z".parse().unwrap();
        let end = "2024-03-01T12:20:00Z".parse().unwrap();
        let filter = MetricFilter::new("Max RUs Per Second", "PT1M", start, end).unwrap();

        server
            .mock(
                "GET",
                format!("{}/databases/shop/collections/carts/partitions/metrics", ACCOUNT_ID).as_str(),
            )
            .match_query(Matcher::UrlEncoded("$filter".into(), filter.to_expression()))
            .with_status(200)
            .with_body(
                r#"{"value":[{"name":{"value":"Max RUs Per Second"},"metricValues":[
                    {"timestamp":"2024-03-01T12:16:00Z","maximum":42.0},
                    {"timestamp":"2024-03-01T12:17:00Z"}]}]}"#,
            )
            .create_async()
            .await;

        let client = ArmClient::new(&server.url(), TokenSource::fixed("tok")).unwrap();
        let series = client
            .list_metrics(&account(), "shop", "carts", &filter)
            .await
            .unwrap();

        assert_eq!(series.len(), 1);
        assert_eq!(series[0].values.len(), 2);
        assert_eq!(series[0].values[0].maximum, Some(42.0));
        assert_eq!(series[0].values[1].maximum, None);
    }
}
