//! Cosmos Watchdog CLI
//!
//! Triggers passes on a running watchdog service, shows its health and
//! classifies account names offline.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{classify, run, status};
use thiserror::Error;

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Cosmos Watchdog CLI
#[derive(Parser)]
#[command(name = "watchdogctl")]
#[command(author, version, about = "CLI for the Cosmos throughput watchdog", long_about = None)]
pub struct Cli {
    /// Watchdog service URL (can also be set via WATCHDOG_API_URL env var)
    #[arg(long, env = "WATCHDOG_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one pass on the service and print its report
    Run {
        /// Print the raw JSON report
        #[arg(long)]
        json: bool,
    },

    /// Show service health
    Status,

    /// Classify an account locally
    Classify {
        /// Account name
        name: String,

        /// Account tag, repeatable (key=value)
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("expected key=value, got `{0}`")]
    MissingSeparator(String),
    #[error("tag key must not be empty")]
    EmptyKey,
}

fn parse_tag(raw: &str) -> Result<(String, String), TagError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| TagError::MissingSeparator(raw.to_string()))?;
    if key.trim().is_empty() {
        return Err(TagError::EmptyKey);
    }
    Ok((key.trim().to_string(), value.trim().to_string()))
}

/// Flag or env first, then the config file, then localhost
fn connect(api_url: Option<String>) -> Result<client::ApiClient> {
    let api_url = match api_url {
        Some(url) => url,
        None => config::Config::load()?
            .api_url
            .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
    };
    client::ApiClient::new(&api_url)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { json } => {
            let client = connect(cli.api_url)?;
            run::run_pass(&client, json, cli.format).await?;
        }
        Commands::Status => {
            let client = connect(cli.api_url)?;
            status::show_status(&client, cli.format).await?;
        }
        Commands::Classify { name, tags } => {
            classify::classify_account(&name, tags, cli.format)?;
        }
    }

    Ok(())
}
