//! Data plane client
//!
//! Offers, collections and partition key ranges of one account, addressed
//! through the REST API with master key signatures.

use super::auth::{master_key_authorization, rfc1123_date};
use super::{DatabaseConnector, DatabaseSession, MIN_THROUGHPUT_HEADER, RESOURCE_USAGE_HEADER};
use crate::error::ProviderError;
use crate::models::{Account, CollectionResponse, Offer, OfferDetail, PartitionKeyRange};
use crate::paging::Page;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const API_VERSION: &str = "2018-12-31";

const CONTINUATION_HEADER: &str = "x-ms-continuation";
const ALT_CONTENT_PATH_HEADER: &str = "x-ms-alt-content-path";

/// Opens [`DocumentDbSession`]s sharing one HTTP client
pub struct DocumentDbConnector {
    http: Client,
}

impl DocumentDbConnector {
    pub fn new() -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ProviderError::Transient(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl DatabaseConnector for DocumentDbConnector {
    async fn connect(
        &self,
        account: &Account,
        key: &str,
    ) -> Result<Box<dyn DatabaseSession>, ProviderError> {
        let session = DocumentDbSession::new(self.http.clone(), &account.document_endpoint, key)?;
        Ok(Box::new(session))
    }
}

/// Data plane session for one account endpoint
pub struct DocumentDbSession {
    http: Client,
    endpoint: Url,
    master_key: String,
}

/// Link that goes into the request signature
///
/// Feeds sign with their parent's link. Resources addressed by resource id
/// sign with that id, lowercased; offers are always addressed that way.
fn signing_link(path: &str, resource_type: &str, is_feed: bool) -> String {
    let trimmed = path.trim_matches('/');
    let link = if is_feed {
        trimmed.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
    } else {
        trimmed
    };

    let segments: Vec<&str> = link.split('/').filter(|s| !s.is_empty()).collect();
    let Some(last) = segments.last() else {
        return String::new();
    };

    let by_resource_id = resource_type == "offers" || last.ends_with('=');
    if segments.len() % 2 == 0 && by_resource_id {
        last.to_lowercase()
    } else {
        link.to_string()
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn continuation(headers: &HeaderMap) -> Option<String> {
    header_str(headers, CONTINUATION_HEADER)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Read an offer document from the offers feed
pub fn offer_from_document(document: Value) -> Result<Offer, ProviderError> {
    let field = |name: &str| {
        document
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Malformed(format!("offer without `{}`", name)))
    };

    let id = field("id")?;
    let self_link = field("_self")?;
    let resource_link = field("resource")?;
    let throughput = document
        .pointer("/content/offerThroughput")
        .and_then(Value::as_u64)
        .and_then(|t| u32::try_from(t).ok())
        .ok_or_else(|| ProviderError::Malformed(format!("offer {} has no fixed throughput", id)))?;

    Ok(Offer {
        id,
        resource_link,
        self_link,
        throughput,
        body: document,
    })
}

impl DocumentDbSession {
    pub fn new(http: Client, endpoint: &str, master_key: &str) -> Result<Self, ProviderError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ProviderError::Malformed(format!("invalid document endpoint: {}", e)))?;
        Ok(Self {
            http,
            endpoint,
            master_key: master_key.to_string(),
        })
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        resource_type: &str,
        is_feed: bool,
    ) -> Result<RequestBuilder, ProviderError> {
        let url = self
            .endpoint
            .join(path.trim_start_matches('/'))
            .map_err(|e| ProviderError::Malformed(format!("invalid path {}: {}", path, e)))?;
        let date = rfc1123_date(Utc::now());
        let authorization = master_key_authorization(
            method.as_str(),
            resource_type,
            &signing_link(path, resource_type, is_feed),
            &date,
            &self.master_key,
        )?;

        debug!(method = %method, url = %url, "Data plane request");
        Ok(self
            .http
            .request(method, url)
            .header("authorization", authorization)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION)
            .header("Accept", "application/json"))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ProviderError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::from_status(status.as_u16(), body))
    }

    /// One page of a feed; returns the documents under `field`, the
    /// continuation and the response headers
    async fn feed(
        &self,
        path: &str,
        resource_type: &str,
        field: &str,
        continuation_token: Option<String>,
        max_items: usize,
    ) -> Result<(Vec<Value>, Option<String>, HeaderMap), ProviderError> {
        let mut request = self
            .request(Method::GET, path, resource_type, true)?
            .header("x-ms-max-item-count", max_items.to_string());
        if let Some(token) = continuation_token {
            request = request.header(CONTINUATION_HEADER, token);
        }

        let response = self.send(request).await?;
        let headers = response.headers().clone();
        let mut body: Value = response.json().await?;
        let documents = match body.get_mut(field).map(Value::take) {
            Some(Value::Array(documents)) => documents,
            _ => {
                return Err(ProviderError::Malformed(format!(
                    "feed response without `{}` array",
                    field
                )))
            }
        };

        Ok((documents, continuation(&headers), headers))
    }
}

#[async_trait]
impl DatabaseSession for DocumentDbSession {
    async fn list_offers(
        &self,
        continuation: Option<String>,
        max_items: usize,
    ) -> Result<Page<Offer>, ProviderError> {
        let (documents, next, _) = self
            .feed("offers", "offers", "Offers", continuation, max_items)
            .await?;

        let offers = documents
            .into_iter()
            .filter_map(|document| match offer_from_document(document) {
                Ok(offer) => Some(offer),
                Err(err) => {
                    warn!(error = %err, "Skipping unreadable offer");
                    None
                }
            })
            .collect();

        Ok(Page::new(offers, next))
    }

    async fn list_collections(
        &self,
        database_link: &str,
        continuation: Option<String>,
        max_items: usize,
    ) -> Result<Page<String>, ProviderError> {
        let database_link = database_link.trim_end_matches('/');
        let path = format!("{}/colls", database_link);
        let (documents, next, headers) = self
            .feed(&path, "colls", "DocumentCollections", continuation, max_items)
            .await?;

        let parent = header_str(&headers, ALT_CONTENT_PATH_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| database_link.to_string());
        let links = documents
            .iter()
            .filter_map(|document| document.get("id").and_then(Value::as_str))
            .map(|id| format!("{}/colls/{}", parent.trim_end_matches('/'), id))
            .collect();

        Ok(Page::new(links, next))
    }

    async fn list_partition_key_ranges(
        &self,
        collection_link: &str,
        continuation: Option<String>,
        max_items: usize,
    ) -> Result<Page<PartitionKeyRange>, ProviderError> {
        let path = format!("{}/pkranges", collection_link.trim_end_matches('/'));
        let (documents, next, _) = self
            .feed(&path, "pkranges", "PartitionKeyRanges", continuation, max_items)
            .await?;

        let ranges = documents
            .iter()
            .filter_map(|document| document.get("id").and_then(Value::as_str))
            .map(|id| PartitionKeyRange { id: id.to_string() })
            .collect();

        Ok(Page::new(ranges, next))
    }

    async fn read_collection(
        &self,
        collection_link: &str,
    ) -> Result<CollectionResponse, ProviderError> {
        let request = self
            .request(Method::GET, collection_link, "colls", false)?
            .header("x-ms-documentdb-populatequotainfo", "true");
        let response = self.send(request).await?;
        let headers = response.headers().clone();
        let body: Value = response.json().await?;

        let alt_link = match (
            header_str(&headers, ALT_CONTENT_PATH_HEADER),
            body.get("id").and_then(Value::as_str),
        ) {
            (Some(parent), Some(id)) => format!("{}/colls/{}", parent.trim_end_matches('/'), id),
            _ => collection_link.trim_end_matches('/').to_string(),
        };

        Ok(CollectionResponse {
            alt_link,
            resource_usage: header_str(&headers, RESOURCE_USAGE_HEADER).map(str::to_string),
        })
    }

    async fn read_offer(&self, offer: &Offer) -> Result<OfferDetail, ProviderError> {
        let request = self.request(Method::GET, &offer.self_link, "offers", false)?;
        let response = self.send(request).await?;
        let min_throughput = header_str(response.headers(), MIN_THROUGHPUT_HEADER)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .ok_or_else(|| {
                ProviderError::Malformed(format!(
                    "offer {} read without a usable {} header",
                    offer.id, MIN_THROUGHPUT_HEADER
                ))
            })?;
        let current = offer_from_document(response.json().await?)?;

        Ok(OfferDetail {
            throughput: current.throughput,
            min_throughput,
        })
    }

    async fn replace_offer(&self, offer: &Offer, throughput: u32) -> Result<(), ProviderError> {
        let mut body = offer.body.clone();
        match body.pointer_mut("/content/offerThroughput") {
            Some(value) => *value = Value::from(throughput),
            None => {
                return Err(ProviderError::Malformed(format!(
                    "offer {} has no throughput to replace",
                    offer.id
                )))
            }
        }

        let request = self
            .request(Method::PUT, &offer.self_link, "offers", false)?
            .json(&body);
        self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    const KEY: &str = "d2F0Y2hkb2ctdGVzdC1tYXN0ZXIta2V5";

    fn offer_document(id: &str, throughput: u32) -> Value {
        json!({
            "id": id,
            "_self": format!("offers/{}/", id),
            "resource": "dbs/abc=/colls/def=/",
            "offerVersion": "V2",
            "content": { "offerThroughput": throughput },
        })
    }

    async fn session(server: &mockito::ServerGuard) -> DocumentDbSession {
        DocumentDbSession::new(Client::new(), &format!("{}/", server.url()), KEY).unwrap()
    }

    #[test]
    fn test_signing_link() {
        assert_eq!(signing_link("offers", "offers", true), "");
        assert_eq!(signing_link("offers/AbCd/", "offers", false), "abcd");
        assert_eq!(signing_link("dbs/shop/colls", "colls", true), "dbs/shop");
        assert_eq!(signing_link("dbs/shop/colls/carts", "colls", false), "dbs/shop/colls/carts");
        assert_eq!(signing_link("dbs/AbC=/colls/DeF=/pkranges", "pkranges", true), "def=");
    }

    #[test]
    fn test_offer_from_document() {
        let offer = offer_from_document(offer_document("ab12", 1000)).unwrap();
        assert_eq!(offer.id, "ab12");
        assert_eq!(offer.self_link, "offers/ab12/");
        assert_eq!(offer.throughput, 1000);

        let autoscale = json!({"id": "x", "_self": "offers/x/", "resource": "dbs/a=/", "content": {}});
        assert!(matches!(offer_from_document(autoscale), Err(ProviderError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_offer_feed_paging() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/offers")
            .match_header("x-ms-max-item-count", "100")
            .match_header("x-ms-continuation", Matcher::Missing)
            .match_header("x-ms-version", API_VERSION)
            .with_status(200)
            .with_header("x-ms-continuation", "page-2")
            .with_body(json!({ "Offers": [offer_document("o1", 1000)] }).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/offers")
            .match_header("x-ms-continuation", "page-2")
            .with_status(200)
            .with_body(json!({ "Offers": [offer_document("o2", 400)] }).to_string())
            .create_async()
            .await;

        let session = session(&server).await;
        let first = session.list_offers(None, 100).await.unwrap();
        assert_eq!(first.items[0].id, "o1");
        assert_eq!(first.continuation.as_deref(), Some("page-2"));

        let second = session.list_offers(first.continuation, 100).await.unwrap();
        assert_eq!(second.items[0].throughput, 400);
        assert_eq!(second.continuation, None);
    }

    #[tokio::test]
    async fn test_collections_use_alt_content_path() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/dbs/abc=/colls")
            .with_status(200)
            .with_header("x-ms-alt-content-path", "dbs/shop")
            .with_body(json!({ "DocumentCollections": [{"id": "carts"}, {"id": "orders"}] }).to_string())
            .create_async()
            .await;

        let session = session(&server).await;
        let page = session.list_collections("dbs/abc=/", None, 100).await.unwrap();

        assert_eq!(page.items, vec!["dbs/shop/colls/carts", "dbs/shop/colls/orders"]);
    }

    #[tokio::test]
    async fn test_read_collection_usage() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/dbs/abc=/colls/def=/")
            .match_header("x-ms-documentdb-populatequotainfo", "true")
            .with_status(200)
            .with_header("x-ms-alt-content-path", "dbs/shop")
            .with_header("x-ms-resource-usage", "documentsSize=1;documentsCount=2;collectionSize=3")
            .with_body(json!({ "id": "carts" }).to_string())
            .create_async()
            .await;

        let session = session(&server).await;
        let response = session.read_collection("dbs/abc=/colls/def=/").await.unwrap();

        assert_eq!(response.alt_link, "dbs/shop/colls/carts");
        assert_eq!(
            response.resource_usage.as_deref(),
            Some("documentsSize=1;documentsCount=2;collectionSize=3")
        );
    }

    #[tokio::test]
    async fn test_read_offer_floor() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/offers/o1/")
            .with_status(200)
            .with_header("x-ms-cosmos-min-throughput", "600")
            .with_body(offer_document("o1", 1000).to_string())
            .create_async()
            .await;

        let session = session(&server).await;
        let offer = offer_from_document(offer_document("o1", 1000)).unwrap();
        let detail = session.read_offer(&offer).await.unwrap();

        assert_eq!(detail, OfferDetail { throughput: 1000, min_throughput: 600 });
    }

    #[tokio::test]
    async fn test_replace_offer_sends_new_throughput() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/offers/o1/")
            .match_body(Matcher::PartialJson(json!({ "content": { "offerThroughput": 400 } })))
            .with_status(200)
            .with_body(offer_document("o1", 400).to_string())
            .create_async()
            .await;

        let session = session(&server).await;
        let offer = offer_from_document(offer_document("o1", 1000)).unwrap();
        session.replace_offer(&offer, 400).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_throttling_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/offers/o1/")
            .with_status(429)
            .create_async()
            .await;

        let session = session(&server).await;
        let offer = offer_from_document(offer_document("o1", 1000)).unwrap();
        let err = session.replace_offer(&offer, 400).await.unwrap_err();

        assert!(err.is_transient());
    }
}
