//! `watchdogctl run`

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;
use watchdog_lib::{DownscaleRecord, PassReport};

use crate::client::ApiClient;
use crate::output::{
    color_status, format_throughput, print_info, print_json, print_success, print_warning,
    OutputFormat,
};

#[derive(Tabled)]
struct DownscaleRow {
    #[tabled(rename = "Account")]
    account: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    to: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl From<&DownscaleRecord> for DownscaleRow {
    fn from(record: &DownscaleRecord) -> Self {
        let status = if record.applied { "applied" } else { "dry run" };
        Self {
            account: record.account.clone(),
            resource: record.resource_link.clone(),
            scope: record.scope.label().to_string(),
            from: format_throughput(u64::from(record.previous_throughput)),
            to: format_throughput(u64::from(record.new_throughput)),
            status: color_status(status),
        }
    }
}

/// Trigger a pass and print its report
pub async fn run_pass(client: &ApiClient, json: bool, format: OutputFormat) -> Result<()> {
    print_info("Running pass, this can take a few minutes");
    let report = client.run_pass().await?;

    if json || format == OutputFormat::Json {
        return print_json(&report);
    }

    print_report(&report);
    Ok(())
}

fn print_report(report: &PassReport) {
    println!("{}", "Pass Report".bold());
    println!("{}", "=".repeat(60));
    println!("Accounts evaluated:   {}", report.accounts_evaluated);
    println!("Accounts skipped:     {}", report.accounts_skipped);
    println!("Offers evaluated:     {}", report.offers_evaluated);
    println!("Downscale failures:   {}", report.downscale_failures);
    println!();

    if report.deadline_exceeded {
        print_warning("Pass stopped at its deadline; the report is partial");
    }

    if report.downscaled.is_empty() {
        print_success("No idle throughput found");
        return;
    }

    let rows: Vec<DownscaleRow> = report.downscaled.iter().map(DownscaleRow::from).collect();
    let table = tabled::Table::new(rows)
        .with(tabled::settings::Style::rounded())
        .to_string();
    println!("{}", table);

    let reclaimed = report.throughput_reclaimed();
    if reclaimed > 0 {
        print_success(&format!("Reclaimed {}", format_throughput(reclaimed)));
    }
}
