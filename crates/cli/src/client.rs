//! HTTP client for the watchdog service

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;
use watchdog_lib::{HealthResponse, PassReport};

/// Passes can run for minutes; the request waits for them
const PASS_TIMEOUT_SECS: u64 = 600;

pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(PASS_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// GET a JSON document; `accepted` lists extra statuses whose body is
    /// still the expected document
    async fn get<T: DeserializeOwned>(&self, path: &str, accepted: &[StatusCode]) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if !status.is_success() && !accepted.contains(&status) {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    /// Trigger a pass and wait for its report
    pub async fn run_pass(&self) -> Result<PassReport> {
        let mut url = self.base_url.join("api/v1/run").context("Invalid path")?;
        url.query_pairs_mut().append_pair("format", "json");

        let response = self
            .client
            .post(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Pass failed ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse pass report")
    }

    /// Service health; an unhealthy service still answers with its components
    pub async fn health(&self) -> Result<HealthResponse> {
        self.get("healthz", &[StatusCode::SERVICE_UNAVAILABLE]).await
    }
}
