//! Error types for Depot caches.

use depot_abstraction::{ProviderError, TypeTag};
use thiserror::Error;

/// Failure returned by `acquire` on either cache.
///
/// Errors are cloneable: one failed load is reported to every caller that
/// was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The key was empty. Rejected before the provider is consulted.
    #[error("Invalid resource key: key must not be empty")]
    InvalidKey,

    /// The provider could not resolve anything for the key.
    #[error("No resource found for key '{0}'")]
    NotFound(String),

    /// The provider reported a failed fetch.
    #[error("Load of '{key}' failed: {message}")]
    LoadFailed {
        /// Requested key.
        key: String,
        /// Provider-reported message.
        message: String,
    },

    /// The provider panicked, or the load task went away before finishing.
    #[error("Load of '{key}' faulted: {detail}")]
    Faulted {
        /// Requested key.
        key: String,
        /// Fault detail.
        detail: String,
    },

    /// The key is cached (or loading) as a different type than requested.
    #[error("Type mismatch for '{key}': expected {expected}, found {actual}")]
    TypeMismatch {
        /// Requested key.
        key: String,
        /// Type the caller asked for.
        expected: &'static str,
        /// Type actually held for the key.
        actual: &'static str,
    },
}

impl CacheError {
    pub(crate) fn type_mismatch(key: &str, expected: TypeTag, actual: TypeTag) -> Self {
        Self::TypeMismatch {
            key: key.to_string(),
            expected: expected.name(),
            actual: actual.name(),
        }
    }

    pub(crate) fn from_provider(key: &str, error: ProviderError) -> Self {
        match error {
            ProviderError::NotFound { .. } => Self::NotFound(key.to_string()),
            ProviderError::LoadFailed { message, .. } => Self::LoadFailed {
                key: key.to_string(),
                message,
            },
            other => Self::LoadFailed {
                key: key.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Whether re-requesting the same key could succeed.
    ///
    /// Nothing is retried automatically; this only tells the caller whether
    /// trying again is worthwhile.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidKey | Self::TypeMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_provider_not_found() {
        let err = CacheError::from_provider(
            "ui/icon",
            ProviderError::NotFound {
                key: "ui/icon".to_string(),
            },
        );
        assert_eq!(err, CacheError::NotFound("ui/icon".to_string()));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_provider_keeps_message() {
        let err = CacheError::from_provider("a", ProviderError::Other("socket closed".to_string()));
        match err {
            CacheError::LoadFailed { key, message } => {
                assert_eq!(key, "a");
                assert!(message.contains("socket closed"));
            }
            other => panic!("Expected LoadFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_usage_errors_are_not_retryable() {
        assert!(!CacheError::InvalidKey.is_retryable());
        let mismatch = CacheError::type_mismatch("a", TypeTag::of::<u8>(), TypeTag::of::<String>());
        assert!(!mismatch.is_retryable());
        assert!(mismatch.to_string().contains("expected u8"));
    }
}
