//! Collection storage metadata from the resource usage header
//!
//! The data plane reports quota usage as a semicolon separated list, e.g.
//! `functions=0;documentsSize=5781669;documentsCount=17151514;collectionSize=10422760`.
//! Size fields are in kilobytes.

use crate::error::{ProviderError, UsageParseError};
use crate::models::{CollectionUsage, ResourcePath};
use crate::providers::DatabaseSession;
use tracing::debug;

/// Database name reported when a collection link cannot be split
pub const UNKNOWN_DATABASE: &str = "unknown";

const DOCUMENTS_SIZE_KEY: &str = "documentsSize";
const DOCUMENTS_COUNT_KEY: &str = "documentsCount";
const COLLECTION_SIZE_KEY: &str = "collectionSize";

/// Numeric part of the usage header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub document_count: u64,
    pub document_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UsageField {
    DocumentsSize,
    DocumentsCount,
    CollectionSize,
}

impl UsageField {
    fn from_key(key: &str) -> Option<Self> {
        if key.eq_ignore_ascii_case(DOCUMENTS_SIZE_KEY) {
            Some(UsageField::DocumentsSize)
        } else if key.eq_ignore_ascii_case(DOCUMENTS_COUNT_KEY) {
            Some(UsageField::DocumentsCount)
        } else if key.eq_ignore_ascii_case(COLLECTION_SIZE_KEY) {
            Some(UsageField::CollectionSize)
        } else {
            None
        }
    }

    fn is_kilobytes(&self) -> bool {
        !matches!(self, UsageField::DocumentsCount)
    }
}

/// Parse one `key=value` fragment
///
/// Returns `Ok(None)` for keys we do not track.
fn parse_fragment(fragment: &str) -> Result<Option<(UsageField, u64)>, UsageParseError> {
    let mut parts = fragment.split('=');
    let (key, value) = match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) => (key.trim(), value.trim()),
        _ => return Err(UsageParseError::NotKeyValue(fragment.to_string())),
    };

    let Some(field) = UsageField::from_key(key) else {
        return Ok(None);
    };

    let raw: u64 = value.parse().map_err(|_| UsageParseError::NotNumeric {
        key: key.to_string(),
        value: value.to_string(),
    })?;

    let value = if field.is_kilobytes() {
        raw.checked_mul(1024)
            .ok_or_else(|| UsageParseError::Overflow(key.to_string()))?
    } else {
        raw
    };

    Ok(Some((field, value)))
}

/// Parse the usage header, skipping anything unreadable
pub fn parse_resource_usage(header: &str) -> ResourceUsage {
    let mut usage = ResourceUsage::default();

    for fragment in header.split(';').filter(|f| !f.trim().is_empty()) {
        match parse_fragment(fragment) {
            Ok(Some((UsageField::DocumentsSize, bytes))) => usage.document_bytes = bytes,
            Ok(Some((UsageField::DocumentsCount, count))) => usage.document_count = count,
            Ok(Some((UsageField::CollectionSize, bytes))) => usage.total_bytes = bytes,
            Ok(None) => {}
            Err(err) => debug!(error = %err, "Skipping usage fragment"),
        }
    }

    usage
}

/// Split a name based collection link into display names
///
/// Falls back to [`UNKNOWN_DATABASE`] and the raw link when the link is too
/// short to address a collection.
pub fn display_names(alt_link: &str) -> (String, String) {
    match ResourcePath::parse(alt_link) {
        Ok(path) => (path.database, path.collection),
        Err(_) => (UNKNOWN_DATABASE.to_string(), alt_link.to_string()),
    }
}

/// Resolves storage metadata for collections
pub struct CollectionUsageReader<'a> {
    session: &'a dyn DatabaseSession,
}

impl<'a> CollectionUsageReader<'a> {
    pub fn new(session: &'a dyn DatabaseSession) -> Self {
        Self { session }
    }

    pub async fn read_usage(&self, collection_link: &str) -> Result<CollectionUsage, ProviderError> {
        let response = self.session.read_collection(collection_link).await?;
        let (database, collection) = display_names(&response.alt_link);
        let usage = response
            .resource_usage
            .as_deref()
            .map(parse_resource_usage)
            .unwrap_or_default();

        Ok(CollectionUsage {
            database,
            collection,
            document_count: usage.document_count,
            document_bytes: usage.document_bytes,
            total_bytes: usage.total_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_header() {
        let usage = parse_resource_usage("documentsSize=100;documentsCount=50;collectionSize=200");
        assert_eq!(
            usage,
            ResourceUsage {
                document_count: 50,
                document_bytes: 102400,
                total_bytes: 204800,
            }
        );
    }

    #[test]
    fn test_parse_full_header_ignores_unknown_keys() {
        let usage = parse_resource_usage(
            "functions=0;storedProcedures=0;triggers=0;documentSize=10178;documentsSize=5781669;documentsCount=17151514;collectionSize=10422760",
        );
        assert_eq!(usage.document_count, 17_151_514);
        assert_eq!(usage.document_bytes, 5_781_669 * 1024);
        assert_eq!(usage.total_bytes, 10_422_760 * 1024);
    }

    #[test]
    fn test_unparsable_field_is_skipped() {
        let usage = parse_resource_usage("documentsSize=abc;documentsCount=7;collectionSize;x=1=2");
        assert_eq!(usage.document_bytes, 0);
        assert_eq!(usage.document_count, 7);
        assert_eq!(usage.total_bytes, 0);
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let usage = parse_resource_usage("DOCUMENTSCOUNT=3;CollectionSize=1");
        assert_eq!(usage.document_count, 3);
        assert_eq!(usage.total_bytes, 1024);
    }

    #[test]
    fn test_overflowing_size_is_skipped() {
        let header = format!("documentsSize={}", u64::MAX);
        assert_eq!(parse_resource_usage(&header).document_bytes, 0);
        assert_eq!(
            parse_fragment(&header),
            Err(UsageParseError::Overflow("documentsSize".to_string()))
        );
    }

    #[test]
    fn test_empty_header() {
        assert_eq!(parse_resource_usage(""), ResourceUsage::default());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(
            display_names("dbs/orders/colls/lines"),
            ("orders".to_string(), "lines".to_string())
        );
        assert_eq!(
            display_names("dbs/orders"),
            (UNKNOWN_DATABASE.to_string(), "dbs/orders".to_string())
        );
    }
}
