//! Component health for the watchdog service
//!
//! Backs the liveness and readiness endpoints. Pass outcomes feed two
//! components: [`components::LAST_PASS`] for the pass as a whole and
//! [`components::PROVIDERS`] for the external APIs it talked to. Both only
//! ever degrade, so a bad pass is visible without taking the service out of
//! rotation.

use crate::error::WatchdogError;
use crate::report::PassReport;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ordered from best to worst so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Degraded components still serve traffic
    pub fn is_operational(&self) -> bool {
        *self < ComponentStatus::Unhealthy
    }
}

/// Latest observation of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds of the observation
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn observed(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::observed(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::observed(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::observed(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of the liveness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components; an empty registry is healthy
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|health| health.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }

    /// Names of the components that are not operational, sorted
    pub fn unhealthy_components(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .components
            .iter()
            .filter(|(_, health)| !health.status.is_operational())
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names tracked by the service
pub mod components {
    /// The periodic pass loop
    pub const SCHEDULER: &str = "scheduler";
    /// Management and data plane APIs as seen by the latest pass
    pub const PROVIDERS: &str = "providers";
    /// Outcome of the latest pass
    pub const LAST_PASS: &str = "last_pass";
}

/// Shared component table plus the readiness flag
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a component as healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components
            .write()
            .await
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Latest observation of one component
    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.components.read().await.get(name).cloned()
    }

    /// Fold a finished pass into [`components::LAST_PASS`] and
    /// [`components::PROVIDERS`]
    ///
    /// Provider trouble shows up either as a fatal listing error or as
    /// accounts and updates the pass had to skip. Errors that are not
    /// provider failures leave [`components::PROVIDERS`] as it was.
    pub async fn record_pass(&self, result: &Result<PassReport, WatchdogError>) {
        match result {
            Ok(report) if report.deadline_exceeded => {
                self.set_degraded(components::LAST_PASS, "pass stopped at its deadline")
                    .await
            }
            Ok(_) => self.set_healthy(components::LAST_PASS).await,
            Err(err) => self.set_degraded(components::LAST_PASS, err.to_string()).await,
        }

        match result {
            Ok(report) => match provider_trouble(report) {
                Some(message) => self.set_degraded(components::PROVIDERS, message).await,
                None => self.set_healthy(components::PROVIDERS).await,
            },
            Err(err @ WatchdogError::Provider { .. }) => {
                self.set_degraded(components::PROVIDERS, err.to_string())
                    .await
            }
            Err(_) => {}
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once initialized and while no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.ready.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("watchdog not yet initialized".to_string()),
            };
        }

        let health = self.health().await;
        let unhealthy = health.unhealthy_components();
        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("unhealthy: {}", unhealthy.join(", "))),
            }
        }
    }
}

/// Skips and failed updates in an otherwise successful pass
fn provider_trouble(report: &PassReport) -> Option<String> {
    let mut problems = Vec::new();
    if report.accounts_skipped > 0 {
        problems.push(format!(
            "{} of {} accounts skipped",
            report.accounts_skipped, report.accounts_evaluated
        ));
    }
    if report.downscale_failures > 0 {
        problems.push(format!("{} offer updates failed", report.downscale_failures));
    }
    (!problems.is_empty()).then(|| problems.join("; "))
}
