//! Cache configuration types and cache operation results
//!
//! This module contains the core types used throughout the cache system:
//! - [`CacheConfig`]: Tunables shared by every strategy (null TTL, lock window, retry budget, rebuild pool)
//! - [`Strategy`]: Which read strategy produced a result
//! - [`CacheSource`]: Enum indicating where a value came from (for observability)
//! - [`CacheResult`]: Wrapper containing a value and its source

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::CacheError;

/// Configuration for a [`crate::CacheClient`]
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL of the null marker written when the loader reports a missing entity.
    /// Must be strictly shorter than `default_ttl`.
    pub null_ttl: Duration,

    /// TTL domain services use for positive entries unless they pass their own
    pub default_ttl: Duration,

    /// Safety window after which a rebuild lock expires on its own.
    /// Must exceed the worst-case loader latency.
    pub lock_ttl: Duration,

    /// Sleep between lock attempts in the mutex strategy
    pub retry_backoff: Duration,

    /// Lock attempts before the mutex strategy gives up with [`CacheError::LockTimeout`]
    pub max_lock_attempts: u32,

    /// Rebuilds allowed to run at the same time in the logical-expiration strategy
    pub max_concurrent_rebuilds: usize,

    /// Rebuilds allowed to be queued or running before new ones are rejected
    pub max_pending_rebuilds: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            null_ttl: Duration::from_secs(2 * 60),
            default_ttl: Duration::from_secs(30 * 60),
            lock_ttl: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(50),
            max_lock_attempts: 100,
            max_concurrent_rebuilds: 10,
            max_pending_rebuilds: 1024,
        }
    }
}

impl CacheConfig {
    pub fn with_null_ttl(mut self, null_ttl: Duration) -> Self {
        self.null_ttl = null_ttl;
        self
    }

    pub fn with_default_ttl(mut self, default_ttl: Duration) -> Self {
        self.default_ttl = default_ttl;
        self
    }

    pub fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }

    pub fn with_retry(mut self, retry_backoff: Duration, max_lock_attempts: u32) -> Self {
        self.retry_backoff = retry_backoff;
        self.max_lock_attempts = max_lock_attempts;
        self
    }

    pub fn with_rebuild_pool(mut self, max_concurrent: usize, max_pending: usize) -> Self {
        self.max_concurrent_rebuilds = max_concurrent;
        self.max_pending_rebuilds = max_pending;
        self
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.null_ttl.is_zero() || self.null_ttl >= self.default_ttl {
            return Err(CacheError::InvalidConfiguration(format!(
                "null_ttl ({:?}) must be non-zero and shorter than default_ttl ({:?})",
                self.null_ttl, self.default_ttl
            )));
        }
        if self.lock_ttl.is_zero() {
            return Err(CacheError::InvalidConfiguration(
                "lock_ttl cannot be zero".to_string(),
            ));
        }
        if self.max_lock_attempts == 0 {
            return Err(CacheError::InvalidConfiguration(
                "max_lock_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_rebuilds == 0 || self.max_pending_rebuilds == 0 {
            return Err(CacheError::InvalidConfiguration(
                "rebuild pool bounds must be at least 1".to_string(),
            ));
        }
        if self.max_pending_rebuilds < self.max_concurrent_rebuilds {
            return Err(CacheError::InvalidConfiguration(format!(
                "max_pending_rebuilds ({}) cannot be lower than max_concurrent_rebuilds ({})",
                self.max_pending_rebuilds, self.max_concurrent_rebuilds
            )));
        }
        Ok(())
    }

    /// Per-call entry TTLs must be strictly longer than `null_ttl`.
    pub fn check_entry_ttl(&self, ttl: Duration) -> Result<(), CacheError> {
        if ttl <= self.null_ttl {
            return Err(CacheError::InvalidConfiguration(format!(
                "entry ttl ({:?}) must be longer than null_ttl ({:?})",
                ttl, self.null_ttl
            )));
        }
        Ok(())
    }
}

/// The read strategy a [`CacheResult`] was produced by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    PassThrough,
    Mutex,
    LogicalExpire,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::PassThrough => "pass_through",
            Strategy::Mutex => "mutex",
            Strategy::LogicalExpire => "logical_expire",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pass_through" | "pass-through" => Ok(Strategy::PassThrough),
            "mutex" => Ok(Strategy::Mutex),
            "logical_expire" | "logical-expire" => Ok(Strategy::LogicalExpire),
            other => Err(CacheError::InvalidConfiguration(format!(
                "unknown cache strategy: {other}"
            ))),
        }
    }
}

/// Indicates where a cached value came from and what operations were performed
///
/// This type implements `Display` for use in logging and metrics:
/// ```
/// # use common_cache::CacheSource;
/// let source = CacheSource::PositiveCache;
/// println!("Cache result: {}", source); // "positive_cache"
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    // Value found cases
    /// Value was found in the store on the first look
    PositiveCache,
    /// Value was written by another caller's rebuild while we waited for / took the lock
    PositiveCacheAfterRebuild,
    /// Cache miss - value loaded from loader function
    LoaderCacheMiss,
    /// Cache data was corrupted - value loaded from loader function
    LoaderCacheCorrupted,
    /// Logical entry has not expired yet
    LogicalFresh,
    /// Logical entry expired, stale value returned and a rebuild was scheduled
    LogicalStaleRebuildScheduled,
    /// Logical entry expired, stale value returned, another rebuild already holds the lock
    LogicalStaleRebuildInFlight,
    /// Logical entry expired, stale value returned, the rebuild could not be scheduled
    LogicalStaleRebuildRejected,

    // Value not found cases
    /// Null marker found (known to not exist)
    NegativeCache,
    /// Null marker written by another caller's rebuild while we waited for / took the lock
    NegativeCacheAfterRebuild,
    /// Cache miss - loader function indicated value doesn't exist
    LoaderNotFoundCacheMiss,
    /// Cache was corrupted - loader function indicated value doesn't exist
    LoaderNotFoundCacheCorrupted,
    /// No logical entry stored; the strategy expects keys to be pre-warmed
    LogicalMiss,
}

impl fmt::Display for CacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheSource::PositiveCache => "positive_cache",
            CacheSource::PositiveCacheAfterRebuild => "positive_cache_after_rebuild",
            CacheSource::LoaderCacheMiss => "loader_cache_miss",
            CacheSource::LoaderCacheCorrupted => "loader_cache_corrupted",
            CacheSource::LogicalFresh => "logical_fresh",
            CacheSource::LogicalStaleRebuildScheduled => "logical_stale_rebuild_scheduled",
            CacheSource::LogicalStaleRebuildInFlight => "logical_stale_rebuild_in_flight",
            CacheSource::LogicalStaleRebuildRejected => "logical_stale_rebuild_rejected",
            CacheSource::NegativeCache => "negative_cache",
            CacheSource::NegativeCacheAfterRebuild => "negative_cache_after_rebuild",
            CacheSource::LoaderNotFoundCacheMiss => "loader_not_found_cache_miss",
            CacheSource::LoaderNotFoundCacheCorrupted => "loader_not_found_cache_corrupted",
            CacheSource::LogicalMiss => "logical_miss",
        };
        f.write_str(name)
    }
}

/// Result of a cache operation with detailed source information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheResult<V> {
    /// The value, if found. None indicates the item doesn't exist (negative result)
    pub value: Option<V>,

    /// Where the result came from - provides context for observability
    pub source: CacheSource,
}

impl<V> CacheResult<V> {
    /// Create a cache result with a value
    pub fn found(value: V, source: CacheSource) -> Self {
        Self {
            value: Some(value),
            source,
        }
    }

    /// Create a cache result indicating the value was not found
    pub fn not_found(source: CacheSource) -> Self {
        Self {
            value: None,
            source,
        }
    }

    pub fn is_found(&self) -> bool {
        self.value.is_some()
    }

    /// Check if the answer came from a stored entry or null marker
    pub fn was_cached(&self) -> bool {
        !self.invoked_loader() && self.source != CacheSource::LogicalMiss
    }

    /// Check if this call invoked the loader function itself
    pub fn invoked_loader(&self) -> bool {
        matches!(
            self.source,
            CacheSource::LoaderCacheMiss
                | CacheSource::LoaderCacheCorrupted
                | CacheSource::LoaderNotFoundCacheMiss
                | CacheSource::LoaderNotFoundCacheCorrupted
        )
    }

    /// Check if the value returned is past its logical expiration
    pub fn is_stale(&self) -> bool {
        matches!(
            self.source,
            CacheSource::LogicalStaleRebuildScheduled
                | CacheSource::LogicalStaleRebuildInFlight
                | CacheSource::LogicalStaleRebuildRejected
        )
    }
}
