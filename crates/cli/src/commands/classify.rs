//! `watchdogctl classify`

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::collections::HashMap;
use watchdog_lib::classifier::{classify_name_and_tags, CATEGORY_TAG};

use crate::output::{color_status, print_json, OutputFormat};

#[derive(Debug, Serialize)]
struct Classification {
    account: String,
    non_production: bool,
    /// `tag` when the category tag decided, `name` otherwise
    decided_by: &'static str,
}

fn classify(name: &str, tags: Vec<(String, String)>) -> Classification {
    let tags: HashMap<String, String> = tags.into_iter().collect();
    let decided_by = if tags.contains_key(CATEGORY_TAG) { "tag" } else { "name" };
    Classification {
        account: name.to_string(),
        non_production: classify_name_and_tags(name, &tags),
        decided_by,
    }
}

/// Report whether the watchdog would touch an account
pub fn classify_account(name: &str, tags: Vec<(String, String)>, format: OutputFormat) -> Result<()> {
    let result = classify(name, tags);

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            let label = if result.non_production {
                "non-production"
            } else {
                "production"
            };
            println!(
                "{} is {} (decided by {})",
                result.account.cyan(),
                color_status(label),
                result.decided_by
            );
        }
    }

    Ok(())
}
