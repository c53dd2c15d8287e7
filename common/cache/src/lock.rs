//! Store-backed mutual exclusion for cache rebuilds
//!
//! A lock is a key (`lock:<entity>:<id>`) written with `SET NX EX`. Whoever
//! wrote it holds it. The safety TTL releases locks whose holder crashed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common_redis::{Client as RedisClient, CustomRedisError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::ttl_secs;

#[derive(Clone)]
pub struct DistributedLock {
    redis: Arc<dyn RedisClient + Send + Sync>,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(redis: Arc<dyn RedisClient + Send + Sync>, ttl: Duration) -> Self {
        Self { redis, ttl }
    }

    /// Single non-blocking acquisition attempt.
    ///
    /// Returns `Ok(None)` when someone else holds the lock. Contention is not
    /// an error; callers decide whether to back off and retry.
    pub async fn try_acquire(
        &self,
        key: impl Into<String>,
    ) -> Result<Option<LockGuard>, CustomRedisError> {
        let key = key.into();
        let token = Uuid::now_v7().to_string().into_bytes();

        let acquired = self
            .redis
            .set_nx_ex(key.clone(), token.clone(), ttl_secs(self.ttl))
            .await?;

        if !acquired {
            debug!(lock = %key, "lock held elsewhere");
            return Ok(None);
        }

        debug!(lock = %key, "lock acquired");
        Ok(Some(LockGuard {
            redis: self.redis.clone(),
            key,
            token,
            released: false,
        }))
    }
}

/// A held lock.
///
/// Release it with [`LockGuard::release`] or scope work with
/// [`LockGuard::run_then_release`]. A guard dropped while still held (panic,
/// cancelled future) schedules the release on the current tokio runtime.
#[must_use = "dropping a LockGuard releases the lock in the background"]
pub struct LockGuard {
    redis: Arc<dyn RedisClient + Send + Sync>,
    key: String,
    token: Vec<u8>,
    released: bool,
}

impl LockGuard {
    /// Release the lock if this guard still owns it.
    ///
    /// Returns `Ok(false)` when the lock had already expired, possibly
    /// re-acquired by someone else, in which case nothing is deleted.
    pub async fn release(mut self) -> Result<bool, CustomRedisError> {
        self.released = true;
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);

        let owned = self.redis.del_if_eq(key.clone(), token).await?;
        if owned {
            debug!(lock = %key, "lock released");
        } else {
            warn!(lock = %key, "lock expired before release; rebuild outlived the lock TTL");
        }
        Ok(owned)
    }

    /// Await `work`, then release the lock regardless of what `work` yielded.
    ///
    /// Release failures are logged and otherwise ignored: the lock TTL
    /// bounds how long a failed release can block other rebuilds.
    pub async fn run_then_release<T, Fut>(self, work: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let output = work.await;
        let key = self.key.clone();
        if let Err(e) = self.release().await {
            warn!(lock = %key, error = %e, "failed to release lock; it will expire on its own");
        }
        output
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let redis = self.redis.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = redis.del_if_eq(key.clone(), token).await {
                        warn!(lock = %key, error = %e, "background lock release failed");
                    }
                });
            }
            Err(_) => {
                warn!(lock = %key, "lock guard dropped outside a runtime; lock will expire on its own");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_redis::MockRedisClient;

    fn setup_lock(redis: &MockRedisClient) -> DistributedLock {
        DistributedLock::new(Arc::new(redis.clone()), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_second_acquire_fails_while_held() {
        let redis = MockRedisClient::new();
        let lock = setup_lock(&redis);

        let guard = lock.try_acquire("lock:shop:1").await.unwrap();
        assert!(guard.is_some());
        assert!(lock.try_acquire("lock:shop:1").await.unwrap().is_none());

        // other keys are independent
        let other = lock.try_acquire("lock:shop:2").await.unwrap();
        assert!(other.is_some());

        assert!(guard.unwrap().release().await.unwrap());
        assert!(lock.try_acquire("lock:shop:1").await.unwrap().is_some());
        other.unwrap().release().await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_is_written_with_safety_ttl() {
        let redis = MockRedisClient::new();
        let lock = setup_lock(&redis);

        let guard = lock.try_acquire("lock:shop:1").await.unwrap().unwrap();

        let calls = redis.calls_for("set_nx_ex");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].key, "lock:shop:1");
        assert!(matches!(
            calls[0].value,
            common_redis::MockRedisValue::BytesWithTTL(_, 10)
        ));
        guard.release().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_release_does_not_remove_new_holder() {
        let redis = MockRedisClient::new();
        let lock = setup_lock(&redis);

        let stale = lock.try_acquire("lock:shop:1").await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;

        let fresh = lock.try_acquire("lock:shop:1").await.unwrap().unwrap();
        assert!(!stale.release().await.unwrap());
        assert!(redis.peek("lock:shop:1").is_some());

        assert!(fresh.release().await.unwrap());
        assert!(redis.peek("lock:shop:1").is_none());
    }

    #[tokio::test]
    async fn test_run_then_release_releases_after_error() {
        let redis = MockRedisClient::new();
        let lock = setup_lock(&redis);

        let guard = lock.try_acquire("lock:shop:1").await.unwrap().unwrap();
        let result: Result<(), String> = guard
            .run_then_release(async { Err("loader exploded".to_string()) })
            .await;

        assert!(result.is_err());
        assert!(redis.peek("lock:shop:1").is_none());
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_in_background() {
        let redis = MockRedisClient::new();
        let lock = setup_lock(&redis);

        let guard = lock.try_acquire("lock:shop:1").await.unwrap().unwrap();
        drop(guard);

        // let the spawned release run
        for _ in 0..10 {
            if redis.peek("lock:shop:1").is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(redis.peek("lock:shop:1").is_none());
    }

    #[tokio::test]
    async fn test_release_failure_is_not_fatal_to_scoped_work() {
        let redis = MockRedisClient::new();
        let lock = setup_lock(&redis);

        let guard = lock.try_acquire("lock:shop:1").await.unwrap().unwrap();
        redis.fail_op("del_if_eq", CustomRedisError::Timeout);

        let value = guard.run_then_release(async { 7 }).await;
        assert_eq!(value, 7);
        assert!(redis.peek("lock:shop:1").is_some());
    }
}
