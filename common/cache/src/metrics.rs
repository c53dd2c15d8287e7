//! Counters emitted by [`crate::CacheClient`]
//!
//! - `cache_client_reads_total{strategy, source}` - one per completed read
//! - `cache_client_loader_invocations_total{strategy}` - loader calls made by a read or a rebuild
//! - `cache_client_lock_contention_total{strategy}` - lock attempts that found the lock held
//! - `cache_client_errors_total{strategy, reason}` - reads that returned an error
//! - `cache_rebuild_tasks_total{outcome}` - `submitted`, `rejected` or `dropped` from the
//!   executor, then how each logical rebuild ended (`rebuilt`, `removed`, `loader_failed`, ...)

use crate::{CacheError, CacheResult, Strategy};

pub const READS_TOTAL: &str = "cache_client_reads_total";
pub const LOADER_INVOCATIONS_TOTAL: &str = "cache_client_loader_invocations_total";
pub const LOCK_CONTENTION_TOTAL: &str = "cache_client_lock_contention_total";
pub const ERRORS_TOTAL: &str = "cache_client_errors_total";
pub const REBUILD_TASKS_TOTAL: &str = "cache_rebuild_tasks_total";

pub(crate) fn record_read<V>(strategy: Strategy, result: &CacheResult<V>) {
    metrics::counter!(
        READS_TOTAL,
        "strategy" => strategy.as_str(),
        "source" => result.source.to_string()
    )
    .increment(1);
}

pub(crate) fn record_loader_invocation(strategy: Strategy) {
    metrics::counter!(LOADER_INVOCATIONS_TOTAL, "strategy" => strategy.as_str()).increment(1);
}

pub(crate) fn record_lock_contention(strategy: Strategy) {
    metrics::counter!(LOCK_CONTENTION_TOTAL, "strategy" => strategy.as_str()).increment(1);
}

pub(crate) fn record_error(strategy: Strategy, error: &CacheError) {
    let reason = match error {
        CacheError::Store(_) => "store",
        CacheError::Codec(_) => "codec",
        CacheError::Loader(_) => "loader",
        CacheError::LockTimeout { .. } => "lock_timeout",
        CacheError::RebuildRejected => "rebuild_rejected",
        CacheError::InvalidConfiguration(_) => "invalid_configuration",
    };
    metrics::counter!(ERRORS_TOTAL, "strategy" => strategy.as_str(), "reason" => reason)
        .increment(1);
}

pub(crate) fn record_rebuild(outcome: &'static str) {
    metrics::counter!(REBUILD_TASKS_TOTAL, "outcome" => outcome).increment(1);
}
