//! Pass report
//!
//! The textual form is one line per downscaled offer; the structured form
//! adds counters for the CLI and the HTTP trigger.

use crate::models::OfferScope;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One offer that was (or in a dry run would have been) scaled down
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownscaleRecord {
    pub account: String,
    pub resource_link: String,
    pub scope: OfferScope,
    pub previous_throughput: u32,
    pub new_throughput: u32,
    /// False in dry runs
    pub applied: bool,
}

impl fmt::Display for DownscaleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.applied {
            "Scaled down to"
        } else {
            "Would scale down to"
        };
        write!(
            f,
            "{} - {}: {} {} RUs",
            self.resource_link,
            self.scope,
            verb,
            group_thousands(u64::from(self.new_throughput))
        )
    }
}

/// Result of one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub accounts_evaluated: usize,
    pub accounts_skipped: usize,
    pub offers_evaluated: usize,
    pub downscale_failures: usize,
    /// The top level deadline cut the pass short
    pub deadline_exceeded: bool,
    pub downscaled: Vec<DownscaleRecord>,
}

impl PassReport {
    /// One line per downscaled offer
    pub fn render(&self) -> String {
        self.downscaled
            .iter()
            .map(|record| format!("{}\n", record))
            .collect()
    }

    /// RU/s removed by this pass
    pub fn throughput_reclaimed(&self) -> u64 {
        self.downscaled
            .iter()
            .filter(|r| r.applied)
            .map(|r| u64::from(r.previous_throughput.saturating_sub(r.new_throughput)))
            .sum()
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// `1234567` -> `1,234,567`
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
