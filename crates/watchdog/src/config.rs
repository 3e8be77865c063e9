//! Service configuration

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;
use watchdog_lib::orchestrator::PassOptions;
use watchdog_lib::providers::arm::DEFAULT_MANAGEMENT_ENDPOINT;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "WATCHDOG_CONFIG";

/// Watchdog service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    /// Subscription whose accounts are evaluated
    #[serde(default)]
    pub subscription_id: String,

    /// Restrict passes to one resource group
    #[serde(default)]
    pub resource_group: Option<String>,

    /// API server port for triggers, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Timer trigger interval in seconds
    #[serde(default = "default_schedule_interval")]
    pub schedule_interval_secs: u64,

    /// Run a pass as soon as the service starts
    #[serde(default)]
    pub run_on_startup: bool,

    /// Deadline for a single pass in seconds
    #[serde(default = "default_pass_timeout")]
    pub pass_timeout_secs: u64,

    /// Decide and report without updating offers
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default = "default_management_endpoint")]
    pub management_endpoint: String,

    /// Static bearer token; managed identity is used when absent
    #[serde(default)]
    pub access_token: Option<String>,
}

fn default_api_port() -> u16 {
    8080
}

fn default_schedule_interval() -> u64 {
    300
}

fn default_pass_timeout() -> u64 {
    240
}

fn default_management_endpoint() -> String {
    DEFAULT_MANAGEMENT_ENDPOINT.to_string()
}

impl WatchdogConfig {
    /// Load configuration from the optional file and the environment
    ///
    /// Environment variables win over file values.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let config: Self = builder
            .add_source(config::Environment::with_prefix("WATCHDOG"))
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.subscription_id.trim().is_empty() {
            bail!("subscription_id is required (set WATCHDOG_SUBSCRIPTION_ID)");
        }
        if self.schedule_interval_secs == 0 {
            bail!("schedule_interval_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }

    /// Options every pass of this service runs with
    pub fn pass_options(&self) -> PassOptions {
        let timeout = (self.pass_timeout_secs > 0).then(|| Duration::from_secs(self.pass_timeout_secs));
        PassOptions::new(self.subscription_id.clone())
            .with_resource_group(self.resource_group.clone())
            .with_dry_run(self.dry_run)
            .with_timeout(timeout)
    }
}
