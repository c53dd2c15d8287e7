use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common_redis::Client as RedisClient;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::codec::{decode, encode, is_null_marker, ttl_secs, LogicalEntry, NULL_MARKER};
use crate::lock::DistributedLock;
use crate::metrics::{
    record_error, record_loader_invocation, record_lock_contention, record_read, record_rebuild,
};
use crate::rebuild::RebuildExecutor;
use crate::{BoxError, CacheConfig, CacheError, CacheResult, CacheSource, Strategy};

/// What a single `GET` of a data key found.
enum Lookup<V> {
    Hit(V),
    NullMarker,
    Miss,
    Corrupted,
}

/// Cache-aside client shared by every domain service
///
/// Each read names a key prefix, an identifier, a TTL and a loader for the
/// source of record. The client never keeps per-key state in process: locks,
/// null markers and logical expiry all live in the store, so any number of
/// instances can serve the same key space.
///
/// # Example
///
/// ```rust,ignore
/// let cache = CacheClient::new(redis, CacheConfig::default())?;
///
/// let shop = cache
///     .get_with_mutex("cache:shop:", id, |id| async move { store.find(id).await }, ttl)
///     .await?;
/// ```
pub struct CacheClient {
    redis: Arc<dyn RedisClient + Send + Sync>,
    lock: DistributedLock,
    executor: Arc<RebuildExecutor>,
    config: CacheConfig,
}

impl CacheClient {
    pub fn new(
        redis: Arc<dyn RedisClient + Send + Sync>,
        config: CacheConfig,
    ) -> Result<Self, CacheError> {
        let executor = Arc::new(RebuildExecutor::new(
            config.max_concurrent_rebuilds,
            config.max_pending_rebuilds,
        ));
        Self::with_executor(redis, config, executor)
    }

    /// Build a client that shares its rebuild pool with other clients.
    pub fn with_executor(
        redis: Arc<dyn RedisClient + Send + Sync>,
        config: CacheConfig,
        executor: Arc<RebuildExecutor>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        let lock = DistributedLock::new(redis.clone(), config.lock_ttl);
        Ok(Self {
            redis,
            lock,
            executor,
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn rebuild_executor(&self) -> &Arc<RebuildExecutor> {
        &self.executor
    }

    pub fn cache_key(prefix: &str, id: impl Display) -> String {
        format!("{prefix}{id}")
    }

    /// Lock key guarding rebuilds of `prefix + id`.
    ///
    /// `cache:shop:` becomes `lock:shop:`. Prefixes outside the `cache:`
    /// namespace get `lock:` prepended.
    pub fn lock_key(prefix: &str, id: impl Display) -> String {
        match prefix.strip_prefix("cache:") {
            Some(entity) => format!("lock:{entity}{id}"),
            None => format!("lock:{prefix}{id}"),
        }
    }

    /// Read with negative caching and no locking.
    ///
    /// Concurrent misses on the same id may each call the loader.
    #[instrument(skip_all, fields(prefix = %prefix, id = %id))]
    pub async fn get_pass_through<K, V, E, F, Fut>(
        &self,
        prefix: &str,
        id: K,
        loader: F,
        ttl: Duration,
    ) -> Result<CacheResult<V>, CacheError>
    where
        K: Display,
        V: Serialize + DeserializeOwned,
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: Into<BoxError>,
    {
        let result = self.pass_through_read(prefix, id, loader, ttl).await;
        observe(Strategy::PassThrough, &result);
        result
    }

    async fn pass_through_read<K, V, E, F, Fut>(
        &self,
        prefix: &str,
        id: K,
        loader: F,
        ttl: Duration,
    ) -> Result<CacheResult<V>, CacheError>
    where
        K: Display,
        V: Serialize + DeserializeOwned,
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: Into<BoxError>,
    {
        self.config.check_entry_ttl(ttl)?;
        let key = Self::cache_key(prefix, &id);
        let corrupted = match self.lookup::<V>(&key).await? {
            Lookup::Hit(value) => return Ok(CacheResult::found(value, CacheSource::PositiveCache)),
            Lookup::NullMarker => return Ok(CacheResult::not_found(CacheSource::NegativeCache)),
            Lookup::Miss => false,
            Lookup::Corrupted => true,
        };
        self.load_and_populate(Strategy::PassThrough, &key, id, loader, ttl, corrupted)
            .await
    }

    /// Read with negative caching, rebuilding misses under a distributed lock.
    ///
    /// Callers that lose the lock race sleep `retry_backoff` and look again,
    /// up to `max_lock_attempts` lock attempts in total.
    #[instrument(skip_all, fields(prefix = %prefix, id = %id))]
    pub async fn get_with_mutex<K, V, E, F, Fut>(
        &self,
        prefix: &str,
        id: K,
        loader: F,
        ttl: Duration,
    ) -> Result<CacheResult<V>, CacheError>
    where
        K: Display,
        V: Serialize + DeserializeOwned,
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: Into<BoxError>,
    {
        let result = self.mutex_read(prefix, id, loader, ttl).await;
        observe(Strategy::Mutex, &result);
        result
    }

    async fn mutex_read<K, V, E, F, Fut>(
        &self,
        prefix: &str,
        id: K,
        loader: F,
        ttl: Duration,
    ) -> Result<CacheResult<V>, CacheError>
    where
        K: Display,
        V: Serialize + DeserializeOwned,
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: Into<BoxError>,
    {
        self.config.check_entry_ttl(ttl)?;
        let key = Self::cache_key(prefix, &id);
        let lock_key = Self::lock_key(prefix, &id);
        let max_attempts = self.config.max_lock_attempts;
        let mut attempts = 0;

        loop {
            let waited = attempts > 0;
            match self.lookup::<V>(&key).await? {
                Lookup::Hit(value) => {
                    let source = if waited {
                        CacheSource::PositiveCacheAfterRebuild
                    } else {
                        CacheSource::PositiveCache
                    };
                    return Ok(CacheResult::found(value, source));
                }
                Lookup::NullMarker => {
                    let source = if waited {
                        CacheSource::NegativeCacheAfterRebuild
                    } else {
                        CacheSource::NegativeCache
                    };
                    return Ok(CacheResult::not_found(source));
                }
                Lookup::Miss | Lookup::Corrupted => {}
            }

            attempts += 1;
            match self.lock.try_acquire(lock_key.as_str()).await? {
                Some(guard) => {
                    let rebuild = self.rebuild_under_lock(&key, id, loader, ttl);
                    return guard.run_then_release(rebuild).await;
                }
                None => {
                    record_lock_contention(Strategy::Mutex);
                    if attempts >= max_attempts {
                        warn!(lock = %lock_key, attempts, "gave up waiting for rebuild lock");
                        return Err(CacheError::LockTimeout {
                            key: lock_key,
                            attempts,
                        });
                    }
                    debug!(lock = %lock_key, attempts, "rebuild in progress elsewhere, backing off");
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
            }
        }
    }

    async fn rebuild_under_lock<K, V, E, F, Fut>(
        &self,
        key: &str,
        id: K,
        loader: F,
        ttl: Duration,
    ) -> Result<CacheResult<V>, CacheError>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: Into<BoxError>,
    {
        // another holder may have finished between our miss and our acquire
        let corrupted = match self.lookup::<V>(key).await? {
            Lookup::Hit(value) => {
                return Ok(CacheResult::found(
                    value,
                    CacheSource::PositiveCacheAfterRebuild,
                ))
            }
            Lookup::NullMarker => {
                return Ok(CacheResult::not_found(
                    CacheSource::NegativeCacheAfterRebuild,
                ))
            }
            Lookup::Miss => false,
            Lookup::Corrupted => true,
        };
        self.load_and_populate(Strategy::Mutex, key, id, loader, ttl, corrupted)
            .await
    }

    /// Read entries that never expire physically.
    ///
    /// A fresh entry is returned as is. An expired one is returned as is too,
    /// and one caller schedules a background rebuild on the executor. Keys
    /// that were never written report [`CacheSource::LogicalMiss`] without
    /// calling the loader, so hot keys are expected to be pre-warmed with
    /// [`CacheClient::set_with_logical_expire`].
    #[instrument(skip_all, fields(prefix = %prefix, id = %id))]
    pub async fn get_with_logical_expire<K, V, E, F, Fut>(
        &self,
        prefix: &str,
        id: K,
        loader: F,
        ttl: Duration,
    ) -> Result<CacheResult<V>, CacheError>
    where
        K: Display + Send + 'static,
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let result = self.logical_read(prefix, id, loader, ttl).await;
        observe(Strategy::LogicalExpire, &result);
        result
    }

    async fn logical_read<K, V, E, F, Fut>(
        &self,
        prefix: &str,
        id: K,
        loader: F,
        ttl: Duration,
    ) -> Result<CacheResult<V>, CacheError>
    where
        K: Display + Send + 'static,
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let key = Self::cache_key(prefix, &id);
        let bytes = match self.redis.get(key.clone()).await? {
            Some(bytes) if !is_null_marker(&bytes) => bytes,
            _ => {
                debug!(key = %key, "no logical entry stored");
                return Ok(CacheResult::not_found(CacheSource::LogicalMiss));
            }
        };

        let entry: LogicalEntry<V> = decode(&bytes)?;
        if !entry.is_expired() {
            return Ok(CacheResult::found(entry.data, CacheSource::LogicalFresh));
        }

        let source = self
            .schedule_rebuild(prefix, key, id, loader, ttl)
            .await;
        Ok(CacheResult::found(entry.data, source))
    }

    async fn schedule_rebuild<K, V, E, F, Fut>(
        &self,
        prefix: &str,
        key: String,
        id: K,
        loader: F,
        ttl: Duration,
    ) -> CacheSource
    where
        K: Display + Send + 'static,
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let lock_key = Self::lock_key(prefix, &id);
        let guard = match self.lock.try_acquire(lock_key.as_str()).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                record_lock_contention(Strategy::LogicalExpire);
                debug!(lock = %lock_key, "rebuild already in flight");
                return CacheSource::LogicalStaleRebuildInFlight;
            }
            Err(e) => {
                warn!(lock = %lock_key, error = %e, "could not take rebuild lock, serving stale entry");
                return CacheSource::LogicalStaleRebuildRejected;
            }
        };

        // a queued rebuild could outlive its lock, so only run on an idle worker
        let reservation = match self.executor.reserve_permit() {
            Ok(reservation) => reservation,
            Err(e) => {
                warn!(key = %key, error = %e, "rebuild not scheduled, serving stale entry");
                if let Err(e) = guard.release().await {
                    warn!(lock = %lock_key, error = %e, "failed to release rebuild lock");
                }
                return CacheSource::LogicalStaleRebuildRejected;
            }
        };

        let redis = self.redis.clone();
        reservation.spawn(async move {
            let outcome = guard
                .run_then_release(rebuild_logical_entry(redis, key, id, loader, ttl))
                .await;
            record_rebuild(outcome.as_str());
        });
        CacheSource::LogicalStaleRebuildScheduled
    }

    /// Delete the entry for `prefix + id`.
    ///
    /// Call this only once the write to the source of record is committed.
    /// A reader that loaded the old row before the write can still put it
    /// back after the delete; the entry TTL bounds how long that lasts.
    #[instrument(skip_all, fields(prefix = %prefix, id = %id))]
    pub async fn invalidate(&self, prefix: &str, id: impl Display) -> Result<(), CacheError> {
        let key = Self::cache_key(prefix, &id);
        self.redis.del(key).await?;
        debug!("cache entry invalidated");
        Ok(())
    }

    /// Write an entry directly. `ttl = None` stores it without expiry.
    pub async fn set<V: Serialize>(
        &self,
        prefix: &str,
        id: impl Display,
        value: &V,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let key = Self::cache_key(prefix, &id);
        let bytes = encode(value)?;
        match ttl {
            Some(ttl) => self.redis.setex(key, bytes, ttl_secs(ttl)).await?,
            None => self.redis.set(key, bytes).await?,
        }
        Ok(())
    }

    /// Read an entry written by [`CacheClient::set`] without touching any loader.
    ///
    /// Null markers and corrupted entries read as `None`.
    pub async fn get<V: DeserializeOwned>(
        &self,
        prefix: &str,
        id: impl Display,
    ) -> Result<Option<V>, CacheError> {
        let key = Self::cache_key(prefix, &id);
        match self.lookup(&key).await? {
            Lookup::Hit(value) => Ok(Some(value)),
            Lookup::NullMarker | Lookup::Miss | Lookup::Corrupted => Ok(None),
        }
    }

    /// Write a [`LogicalEntry`] that turns stale after `ttl`.
    pub async fn set_with_logical_expire<V: Serialize>(
        &self,
        prefix: &str,
        id: impl Display,
        value: &V,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let key = Self::cache_key(prefix, &id);
        let bytes = encode(&LogicalEntry::new(value, ttl))?;
        self.redis.set(key, bytes).await?;
        Ok(())
    }

    /// Merge `fields` into the hash at `prefix + id`, then (re)set its TTL.
    pub async fn put_fields(
        &self,
        prefix: &str,
        id: impl Display,
        fields: Vec<(String, String)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if fields.is_empty() {
            return Ok(());
        }
        let key = Self::cache_key(prefix, &id);
        self.redis.hset_multiple(key.clone(), fields).await?;
        if let Some(ttl) = ttl {
            self.redis.expire(key, ttl_secs(ttl)).await?;
        }
        Ok(())
    }

    /// Read the hash at `prefix + id`.
    ///
    /// With `refresh_ttl` set, a successful read pushes the expiry forward,
    /// so the entry lives as long as it keeps being read.
    pub async fn get_fields(
        &self,
        prefix: &str,
        id: impl Display,
        refresh_ttl: Option<Duration>,
    ) -> Result<Option<HashMap<String, String>>, CacheError> {
        let key = Self::cache_key(prefix, &id);
        let fields = self.redis.hgetall(key.clone()).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        if let Some(ttl) = refresh_ttl {
            if let Err(e) = self.redis.expire(key.clone(), ttl_secs(ttl)).await {
                warn!(key = %key, error = %e, "failed to refresh entry TTL");
            }
        }
        Ok(Some(fields))
    }

    async fn lookup<V: DeserializeOwned>(&self, key: &str) -> Result<Lookup<V>, CacheError> {
        let Some(bytes) = self.redis.get(key.to_string()).await? else {
            return Ok(Lookup::Miss);
        };
        if is_null_marker(&bytes) {
            return Ok(Lookup::NullMarker);
        }
        match decode(&bytes) {
            Ok(value) => Ok(Lookup::Hit(value)),
            Err(e) => {
                warn!(key = %key, error = %e, "cached entry is corrupted, rebuilding");
                Ok(Lookup::Corrupted)
            }
        }
    }

    async fn load_and_populate<K, V, E, F, Fut>(
        &self,
        strategy: Strategy,
        key: &str,
        id: K,
        loader: F,
        ttl: Duration,
        corrupted: bool,
    ) -> Result<CacheResult<V>, CacheError>
    where
        V: Serialize,
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: Into<BoxError>,
    {
        record_loader_invocation(strategy);
        let loaded = loader(id).await.map_err(CacheError::loader)?;

        match loaded {
            Some(value) => {
                let bytes = encode(&value)?;
                self.write_back(key, bytes, ttl).await;
                let source = if corrupted {
                    CacheSource::LoaderCacheCorrupted
                } else {
                    CacheSource::LoaderCacheMiss
                };
                Ok(CacheResult::found(value, source))
            }
            None => {
                self.write_back(key, NULL_MARKER.to_vec(), self.config.null_ttl)
                    .await;
                let source = if corrupted {
                    CacheSource::LoaderNotFoundCacheCorrupted
                } else {
                    CacheSource::LoaderNotFoundCacheMiss
                };
                Ok(CacheResult::not_found(source))
            }
        }
    }

    async fn write_back(&self, key: &str, bytes: Vec<u8>, ttl: Duration) {
        if let Err(e) = self.redis.setex(key.to_string(), bytes, ttl_secs(ttl)).await {
            warn!(key = %key, error = %e, "failed to write loaded value to cache");
        }
    }
}

/// How a background rebuild ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RebuildOutcome {
    Rebuilt,
    AlreadyFresh,
    Removed,
    LoaderFailed,
    CodecFailed,
    StoreFailed,
}

impl RebuildOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            RebuildOutcome::Rebuilt => "rebuilt",
            RebuildOutcome::AlreadyFresh => "already_fresh",
            RebuildOutcome::Removed => "removed",
            RebuildOutcome::LoaderFailed => "loader_failed",
            RebuildOutcome::CodecFailed => "codec_failed",
            RebuildOutcome::StoreFailed => "store_failed",
        }
    }
}

/// Body of a background rebuild. Runs while holding the rebuild lock.
async fn rebuild_logical_entry<K, V, E, F, Fut>(
    redis: Arc<dyn RedisClient + Send + Sync>,
    key: String,
    id: K,
    loader: F,
    ttl: Duration,
) -> RebuildOutcome
where
    V: Serialize + DeserializeOwned,
    F: FnOnce(K) -> Fut,
    Fut: Future<Output = Result<Option<V>, E>>,
    E: Into<BoxError>,
{
    // the lock may have been freed by a rebuild that finished after our read
    if let Ok(Some(bytes)) = redis.get(key.clone()).await {
        if decode::<LogicalEntry<V>>(&bytes).is_ok_and(|entry| !entry.is_expired()) {
            debug!(key = %key, "entry already rebuilt");
            return RebuildOutcome::AlreadyFresh;
        }
    }

    record_loader_invocation(Strategy::LogicalExpire);
    match loader(id).await {
        Ok(Some(value)) => {
            let bytes = match encode(&LogicalEntry::new(&value, ttl)) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(key = %key, error = %e, "failed to encode rebuilt entry");
                    return RebuildOutcome::CodecFailed;
                }
            };
            match redis.set(key.clone(), bytes).await {
                Ok(()) => {
                    debug!(key = %key, "logical entry rebuilt");
                    RebuildOutcome::Rebuilt
                }
                Err(e) => {
                    error!(key = %key, error = %e, "failed to store rebuilt entry");
                    RebuildOutcome::StoreFailed
                }
            }
        }
        Ok(None) => {
            debug!(key = %key, "entity no longer exists, removing stale entry");
            match redis.del(key.clone()).await {
                Ok(()) => RebuildOutcome::Removed,
                Err(e) => {
                    error!(key = %key, error = %e, "failed to remove stale entry");
                    RebuildOutcome::StoreFailed
                }
            }
        }
        Err(e) => {
            let e: BoxError = e.into();
            error!(key = %key, error = %e, "loader failed during rebuild, stale entry kept");
            RebuildOutcome::LoaderFailed
        }
    }
}

fn observe<V>(strategy: Strategy, result: &Result<CacheResult<V>, CacheError>) {
    match result {
        Ok(result) => {
            debug!(%strategy, source = %result.source, "cache read");
            record_read(strategy, result);
        }
        Err(e) => {
            warn!(%strategy, error = %e, "cache read failed");
            record_error(strategy, e);
        }
    }
}
