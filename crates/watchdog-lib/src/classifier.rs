//! Non-production account classification
//!
//! An account opts in or out explicitly through the
//! `CosmosDBAutoScaleCategory` tag. Without the tag, its name decides.

use crate::error::{Result, WatchdogError};
use crate::models::Account;
use std::collections::HashMap;

/// Tag key that carries an explicit category
pub const CATEGORY_TAG: &str = "CosmosDBAutoScaleCategory";

/// Tag value marking an account as non-production
pub const NON_PROD_CATEGORY: &str = "NonProd";

/// Name fragments that mark an untagged account as non-production
pub const NON_PROD_NAME_MARKERS: &[&str] = &["dev", "test", "tst", "qa", "stag"];

/// Decides whether an account may be scaled down automatically
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountClassifier;

impl AccountClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify an account reference that may be absent
    pub fn classify(&self, account: Option<&Account>) -> Result<bool> {
        let account = account
            .ok_or_else(|| WatchdogError::InvalidInput("account reference is absent".into()))?;
        Ok(self.is_non_production(account))
    }

    pub fn is_non_production(&self, account: &Account) -> bool {
        classify_name_and_tags(&account.name, &account.tags)
    }
}

/// Tag first, then name heuristics
pub fn classify_name_and_tags(name: &str, tags: &HashMap<String, String>) -> bool {
    if let Some(category) = tags.get(CATEGORY_TAG) {
        return category.eq_ignore_ascii_case(NON_PROD_CATEGORY);
    }

    let name = name.to_lowercase();
    NON_PROD_NAME_MARKERS
        .iter()
        .any(|marker| name.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(name: &str, tags: &[(&str, &str)]) -> Account {
        Account {
            name: name.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_tag_wins_regardless_of_name() {
        let classifier = AccountClassifier::new();
        assert!(classifier.is_non_production(&account("billing-prod", &[(CATEGORY_TAG, "NonProd")])));
        assert!(classifier.is_non_production(&account("billing", &[(CATEGORY_TAG, "nonprod")])));
    }

    #[test]
    fn test_explicit_other_tag_overrides_name() {
        let classifier = AccountClassifier::new();
        assert!(!classifier.is_non_production(&account("orders-dev", &[(CATEGORY_TAG, "Prod")])));
        assert!(!classifier.is_non_production(&account("orders-dev", &[(CATEGORY_TAG, "")])));
    }

    #[test]
    fn test_name_markers() {
        let classifier = AccountClassifier::new();
        for name in ["orders-DEV", "loadtest", "tst01", "qa-east", "Staging-eu"] {
            assert!(classifier.is_non_production(&account(name, &[])), "{}", name);
        }
        assert!(!classifier.is_non_production(&account("orders-prod", &[])));
        assert!(!classifier.is_non_production(&account("", &[])));
    }

    #[test]
    fn test_unrelated_tags_fall_back_to_name() {
        let classifier = AccountClassifier::new();
        assert!(classifier.is_non_production(&account("orders-dev", &[("owner", "team-a")])));
    }

    #[test]
    fn test_absent_account_is_input_error() {
        let classifier = AccountClassifier::new();
        assert!(matches!(
            classifier.classify(None),
            Err(WatchdogError::InvalidInput(_))
        ));
        assert!(classifier.classify(Some(&account("qa", &[]))).unwrap());
    }
}
