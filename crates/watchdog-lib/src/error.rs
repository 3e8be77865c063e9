//! Error taxonomy for the watchdog
//!
//! Provider calls fail with a small closed set of [`ProviderError`] kinds.
//! Everything the library surfaces to a caller is a [`WatchdogError`].

use thiserror::Error;

/// Failure reported by an external provider (management or data plane)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Credentials were missing, expired or insufficient
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The addressed resource does not exist
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Throttling, timeouts, server errors and transport failures
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The provider refused the request
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The provider answered with a payload we could not read
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Map an HTTP status code to the matching error kind
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => ProviderError::Auth(message),
            404 => ProviderError::NotFound(message),
            408 | 429 | 500..=599 => ProviderError::Transient(message),
            _ => ProviderError::Rejected { status, message },
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ProviderError::from_status(status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return ProviderError::Malformed(err.to_string());
        }
        ProviderError::Transient(err.to_string())
    }
}

/// Errors surfaced by the watchdog library
#[derive(Debug, Error)]
pub enum WatchdogError {
    /// A required input was absent or blank
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A provider call failed
    #[error("{operation} failed: {source}")]
    Provider {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    /// A resource path or header could not be parsed
    #[error("parse error: {0}")]
    Parse(String),
}

impl WatchdogError {
    pub fn provider(operation: &'static str, source: ProviderError) -> Self {
        WatchdogError::Provider { operation, source }
    }
}

/// Error from strict parsing of a single resource usage field
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UsageParseError {
    #[error("usage fragment `{0}` is not a key=value pair")]
    NotKeyValue(String),

    #[error("usage value for `{key}` is not an integer: `{value}`")]
    NotNumeric { key: String, value: String },

    #[error("usage value for `{0}` overflows when converted to bytes")]
    Overflow(String),
}

pub type Result<T, E = WatchdogError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(ProviderError::from_status(401, "x"), ProviderError::Auth(_)));
        assert!(matches!(ProviderError::from_status(403, "x"), ProviderError::Auth(_)));
        assert!(matches!(ProviderError::from_status(404, "x"), ProviderError::NotFound(_)));
        assert!(ProviderError::from_status(429, "x").is_transient());
        assert!(ProviderError::from_status(503, "x").is_transient());
        assert_eq!(
            ProviderError::from_status(400, "bad"),
            ProviderError::Rejected {
                status: 400,
                message: "bad".to_string()
            }
        );
    }

    #[test]
    fn test_provider_error_display_names_operation() {
        let err = WatchdogError::provider("list offers", ProviderError::Transient("timeout".into()));
        assert_eq!(
            err.to_string(),
            "list offers failed: transient provider failure: timeout"
        );
    }
}
