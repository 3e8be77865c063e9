//! Credentials for the management and data planes
//!
//! - Bearer tokens for the management plane, either fixed or fetched from
//!   the managed identity endpoint and cached until shortly before expiry
//! - Master key request signatures for the data plane

use crate::error::ProviderError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Resource requested for management plane tokens
pub const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";

const IDENTITY_API_VERSION: &str = "2019-08-01";

/// Refresh tokens this long before they expire
const EXPIRY_MARGIN_SECS: i64 = 300;

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct IdentityTokenResponse {
    access_token: String,
    /// Seconds since the epoch, sent as a string
    expires_on: String,
}

#[derive(Debug, Clone)]
enum TokenKind {
    Fixed(String),
    ManagedIdentity {
        endpoint: String,
        header: String,
        resource: String,
    },
}

/// Source of management plane bearer tokens
pub struct TokenSource {
    kind: TokenKind,
    http: Client,
    cache: RwLock<Option<CachedToken>>,
}

impl TokenSource {
    /// A token obtained out of band
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Fixed(token.into()),
            http: Client::new(),
            cache: RwLock::new(None),
        }
    }

    pub fn managed_identity(
        endpoint: impl Into<String>,
        header: impl Into<String>,
        resource: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Transient(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            kind: TokenKind::ManagedIdentity {
                endpoint: endpoint.into(),
                header: header.into(),
                resource: resource.into(),
            },
            http,
            cache: RwLock::new(None),
        })
    }

    /// Managed identity from `IDENTITY_ENDPOINT` and `IDENTITY_HEADER`
    pub fn from_environment(resource: &str) -> Result<Self, ProviderError> {
        let endpoint = std::env::var("IDENTITY_ENDPOINT")
            .map_err(|_| ProviderError::Auth("IDENTITY_ENDPOINT is not set".into()))?;
        let header = std::env::var("IDENTITY_HEADER")
            .map_err(|_| ProviderError::Auth("IDENTITY_HEADER is not set".into()))?;
        Self::managed_identity(endpoint, header, resource)
    }

    /// Current bearer token, refreshed when close to expiry
    pub async fn token(&self) -> Result<String, ProviderError> {
        let (endpoint, header, resource) = match &self.kind {
            TokenKind::Fixed(token) => return Ok(token.clone()),
            TokenKind::ManagedIdentity {
                endpoint,
                header,
                resource,
            } => (endpoint, header, resource),
        };

        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.expires_at - chrono::Duration::seconds(EXPIRY_MARGIN_SECS) > Utc::now() {
                return Ok(cached.value.clone());
            }
        }

        debug!(endpoint = %endpoint, "Requesting managed identity token");
        let response = self
            .http
            .get(endpoint.as_str())
            .query(&[("resource", resource.as_str()), ("api-version", IDENTITY_API_VERSION)])
            .header("X-IDENTITY-HEADER", header.as_str())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match ProviderError::from_status(status.as_u16(), body) {
                ProviderError::Rejected { message, .. } => ProviderError::Auth(message),
                other => other,
            });
        }

        let token: IdentityTokenResponse = response.json().await?;
        let expires_at = token
            .expires_on
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .ok_or_else(|| ProviderError::Malformed(format!("bad expires_on `{}`", token.expires_on)))?;

        *self.cache.write().await = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at,
        });

        Ok(token.access_token)
    }
}

/// `x-ms-date` value for a request timestamp
pub fn rfc1123_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Master key `authorization` header value, already URL encoded
pub fn master_key_authorization(
    verb: &str,
    resource_type: &str,
    resource_link: &str,
    date: &str,
    master_key: &str,
) -> Result<String, ProviderError> {
    let key = base64::decode(master_key)
        .map_err(|e| ProviderError::Auth(format!("master key is not base64: {}", e)))?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| ProviderError::Auth(format!("unusable master key: {}", e)))?;

    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    );
    mac.update(payload.as_bytes());
    let signature = base64::encode(mac.finalize().into_bytes());

    let token = format!("type=master&ver=1.0&sig={}", signature);
    Ok(url::form_urlencoded::byte_serialize(token.as_bytes()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rfc1123_date() {
        let ts = Utc.with_ymd_and_hms(2017, 4, 27, 0, 51, 12).unwrap();
        assert_eq!(rfc1123_date(ts), "Thu, 27 Apr 2017 00:51:12 GMT");
    }

    #[test]
    fn test_master_key_signature() {
        let auth = master_key_authorization(
            "GET",
            "colls",
            "dbs/shop/colls/carts",
            "Thu, 27 Apr 2017 00:51:12 GMT",
            "d2F0Y2hkb2ctdGVzdC1tYXN0ZXIta2V5",
        )
        .unwrap();

        assert_eq!(
            auth,
            "type%3Dmaster%26ver%3D1.0%26sig%3D3xB3GOQPnU8vKFB09xrm%2BXsHyX9gQNXa3gHcuXX9i4M%3D"
        );
    }

    #[test]
    fn test_invalid_key_is_auth_error() {
        let err = master_key_authorization("GET", "dbs", "", "date", "not base64!").unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
    }

    #[tokio::test]
    async fn test_fixed_token() {
        let source = TokenSource::fixed("abc");
        assert_eq!(source.token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_managed_identity_token_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let expires_on = (Utc::now().timestamp() + 3600).to_string();
        let mock = server
            .mock("GET", "/msi/token")
            .match_query(mockito::Matcher::Any)
            .match_header("X-IDENTITY-HEADER", "secret")
            .with_status(200)
            .with_body(format!(
                r#"{{"access_token":"tok-1","expires_on":"{}"}}"#,
                expires_on
            ))
            .expect(1)
            .create_async()
            .await;

        let source = TokenSource::managed_identity(
            format!("{}/msi/token", server.url()),
            "secret",
            MANAGEMENT_RESOURCE,
        )
        .unwrap();

        assert_eq!(source.token().await.unwrap(), "tok-1");
        assert_eq!(source.token().await.unwrap(), "tok-1");
        mock.assert_async().await;
    }
}
