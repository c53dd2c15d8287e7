//! Cache-aside resilience layer over Redis
//!
//! [`CacheClient`] puts a Redis cache in front of any source of record and
//! protects that source from three failure modes:
//!
//! - penetration: ids that do not exist are remembered with a short-lived
//!   null marker
//! - breakdown of a hot key: rebuilds are serialized by a distributed lock,
//!   either waited on ([`CacheClient::get_with_mutex`]) or run in the
//!   background while stale data is served
//!   ([`CacheClient::get_with_logical_expire`])
//! - stale reads after writes: callers [`CacheClient::invalidate`] once their
//!   write is committed
//!
//! Every read takes the loader as a closure, so a single client serves every
//! entity type. Results carry a [`CacheSource`] for logs and metrics.
//!
//! # Example
//!
//! ```rust,ignore
//! use common_cache::{CacheClient, CacheConfig, CacheSource};
//!
//! let cache = CacheClient::new(redis, CacheConfig::default())?;
//!
//! let result = cache
//!     .get_pass_through("cache:shop:", id, |id| async move {
//!         load_shop(id).await
//!     }, ttl)
//!     .await?;
//!
//! match result.source {
//!     CacheSource::PositiveCache => println!("Cache hit!"),
//!     CacheSource::NegativeCache => println!("Known to not exist"),
//!     _ => println!("Other source: {}", result.source),
//! }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod rebuild;
pub mod types;

pub use client::CacheClient;
pub use codec::LogicalEntry;
pub use error::{BoxError, CacheError};
pub use lock::{DistributedLock, LockGuard};
pub use rebuild::{RebuildExecutor, Reservation};
pub use types::{CacheConfig, CacheResult, CacheSource, Strategy};
