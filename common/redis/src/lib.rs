use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Redis(Arc::new(err))
        }
    }
}

impl CustomRedisError {
    /// Whether retrying the same command can never succeed.
    ///
    /// Configuration and parse errors are permanent. Redis errors delegate to
    /// `redis::RedisError::is_unrecoverable_error`, except for client
    /// configuration and authentication failures which are always permanent.
    pub fn is_unrecoverable_error(&self) -> bool {
        match self {
            CustomRedisError::Timeout => false,
            CustomRedisError::InvalidConfiguration(_) => true,
            CustomRedisError::ParseError(_) => true,
            CustomRedisError::Redis(err) => {
                Self::is_config_error(err) || err.is_unrecoverable_error()
            }
        }
    }

    fn is_config_error(err: &redis::RedisError) -> bool {
        matches!(
            err.kind(),
            redis::ErrorKind::InvalidClientConfig | redis::ErrorKind::AuthenticationFailed
        )
    }
}

/// The narrow slice of the key-value store the cache layer consumes.
///
/// Values are raw bytes. An empty value is a legitimate stored value and is
/// reported as `Some(vec![])`, which is distinct from a missing key (`None`).
/// TTLs are whole seconds.
#[async_trait]
pub trait Client {
    async fn get(&self, k: String) -> Result<Option<Vec<u8>>, CustomRedisError>;

    /// Store a value without expiry.
    async fn set(&self, k: String, v: Vec<u8>) -> Result<(), CustomRedisError>;

    async fn setex(&self, k: String, v: Vec<u8>, seconds: u64) -> Result<(), CustomRedisError>;

    /// Atomic `SET k v EX seconds NX`. Returns whether the key was written.
    async fn set_nx_ex(&self, k: String, v: Vec<u8>, seconds: u64)
        -> Result<bool, CustomRedisError>;

    async fn del(&self, k: String) -> Result<(), CustomRedisError>;

    /// Delete `k` only while it still holds `expected`. Returns whether a key was removed.
    async fn del_if_eq(&self, k: String, expected: Vec<u8>) -> Result<bool, CustomRedisError>;

    /// Reset the TTL of an existing key. Returns false when the key does not exist.
    async fn expire(&self, k: String, seconds: u64) -> Result<bool, CustomRedisError>;

    async fn hset_multiple(
        &self,
        k: String,
        fields: Vec<(String, String)>,
    ) -> Result<(), CustomRedisError>;

    /// All fields of a hash. Missing keys yield an empty map.
    async fn hgetall(&self, k: String) -> Result<HashMap<String, String>, CustomRedisError>;
}

mod client;
mod mock;

pub use client::RedisClient;
pub use mock::{MockRedisCall, MockRedisClient, MockRedisValue};
