use common_redis::CustomRedisError;
use thiserror::Error;

/// Error type loaders are converted into. Anything `Into<BoxError>` works,
/// including `sqlx::Error`, `anyhow::Error` and plain strings.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache store error: {0}")]
    Store(#[from] CustomRedisError),
    #[error("failed to encode or decode cached value: {0}")]
    Codec(String),
    #[error("loader failed: {0}")]
    Loader(#[source] BoxError),
    #[error("gave up waiting for rebuild lock {key} after {attempts} attempts")]
    LockTimeout { key: String, attempts: u32 },
    #[error("rebuild executor rejected the task")]
    RebuildRejected,
    #[error("invalid cache configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Codec(err.to_string())
    }
}

impl CacheError {
    pub(crate) fn loader(err: impl Into<BoxError>) -> Self {
        CacheError::Loader(err.into())
    }

    /// True when the store failed in a way that may clear up on its own.
    /// Callers may fall back to the source of record in that case.
    ///
    /// Permanent store errors (bad configuration, rejected credentials,
    /// unparseable replies) are not unavailability and should surface.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, CacheError::Store(err) if !err.is_unrecoverable_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_timeouts_are_unavailability() {
        let err = CacheError::from(CustomRedisError::Timeout);
        assert!(err.is_store_unavailable());
    }

    #[test]
    fn test_loader_and_lock_errors_are_not_store_unavailability() {
        assert!(!CacheError::loader("db down").is_store_unavailable());
        assert!(!CacheError::LockTimeout {
            key: "lock:shop:1".to_string(),
            attempts: 3
        }
        .is_store_unavailable());
    }

    #[test]
    fn test_permanent_store_errors_are_not_unavailability() {
        for err in [
            CustomRedisError::ParseError("bad".to_string()),
            CustomRedisError::InvalidConfiguration("response timeout of 0s".to_string()),
        ] {
            assert!(!CacheError::Store(err).is_store_unavailable());
        }
    }

    #[test]
    fn test_loader_error_keeps_its_source() {
        let err = CacheError::loader("connection refused");
        assert_eq!(err.to_string(), "loader failed: connection refused");
        assert!(std::error::Error::source(&err).is_some());
    }
}
