//! Bounded background executor for logical-expiration rebuilds
//!
//! At most `max_concurrent` rebuilds run at once. At most `max_pending`
//! rebuilds may be queued or running; submissions past that are rejected so a
//! flood of expired keys cannot grow memory without bound.
//!
//! [`RebuildExecutor::reserve_permit`] skips the queue entirely: it only
//! succeeds when a task could start right away.

use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics::record_rebuild;
use crate::CacheError;

pub struct RebuildExecutor {
    semaphore: Arc<Semaphore>,
    state: Arc<ExecutorState>,
    max_pending: usize,
}

#[derive(Default)]
struct ExecutorState {
    pending: AtomicUsize,
    submitted: AtomicU64,
    closed: AtomicBool,
    idle: Notify,
}

/// Decrements the pending count when dropped, including on task panic.
struct PendingGuard {
    state: Arc<ExecutorState>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.state.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.state.idle.notify_waiters();
        }
    }
}

/// A claimed slot in the executor. Dropping it without spawning frees the slot.
#[must_use = "a reservation holds a pending slot until spawned or dropped"]
pub struct Reservation {
    semaphore: Arc<Semaphore>,
    permit: Option<OwnedSemaphorePermit>,
    pending: PendingGuard,
}

impl Reservation {
    /// Run `task` once a concurrency permit is available, or right away if
    /// the reservation already holds one.
    pub fn spawn<F>(self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Reservation {
            semaphore,
            permit,
            pending,
        } = self;
        pending.state.submitted.fetch_add(1, Ordering::Relaxed);
        record_rebuild("submitted");

        tokio::spawn(async move {
            let _pending = pending;
            let permit = match permit {
                Some(permit) => permit,
                None => match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("rebuild executor semaphore closed, dropping task");
                        record_rebuild("dropped");
                        return;
                    }
                },
            };

            task.await;
            drop(permit);
        })
    }
}

impl RebuildExecutor {
    pub fn new(max_concurrent: usize, max_pending: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            state: Arc::new(ExecutorState::default()),
            max_pending,
        }
    }

    /// Claim a pending slot without committing to a task yet.
    ///
    /// Lets callers find out about rejection before doing work that would
    /// need undoing, such as taking a rebuild lock.
    pub fn reserve(&self) -> Result<Reservation, CacheError> {
        Ok(Reservation {
            semaphore: self.semaphore.clone(),
            permit: None,
            pending: self.claim_pending()?,
        })
    }

    /// Claim a pending slot together with a concurrency permit.
    ///
    /// Rejected when every permit is taken, even if the pending limit has
    /// room, so a task spawned from this reservation never waits in a queue.
    pub fn reserve_permit(&self) -> Result<Reservation, CacheError> {
        let pending = self.claim_pending()?;
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(Reservation {
                semaphore: self.semaphore.clone(),
                permit: Some(permit),
                pending,
            }),
            Err(_) => {
                debug!("no idle rebuild worker, rejecting task");
                record_rebuild("rejected");
                Err(CacheError::RebuildRejected)
            }
        }
    }

    fn claim_pending(&self) -> Result<PendingGuard, CacheError> {
        if self.state.closed.load(Ordering::Acquire) {
            debug!("rebuild executor is shut down, rejecting task");
            record_rebuild("rejected");
            return Err(CacheError::RebuildRejected);
        }

        let max_pending = self.max_pending;
        let claimed = self
            .state
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                (pending < max_pending).then_some(pending + 1)
            });

        if claimed.is_err() {
            warn!(max_pending, "rebuild executor saturated, rejecting task");
            record_rebuild("rejected");
            return Err(CacheError::RebuildRejected);
        }

        Ok(PendingGuard {
            state: self.state.clone(),
        })
    }

    pub fn submit<F>(&self, task: F) -> Result<JoinHandle<()>, CacheError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Ok(self.reserve()?.spawn(task))
    }

    /// Tasks ever handed to the executor.
    pub fn submitted(&self) -> u64 {
        self.state.submitted.load(Ordering::Relaxed)
    }

    /// Tasks reserved, queued or running.
    pub fn in_flight(&self) -> usize {
        self.state.pending.load(Ordering::Acquire)
    }

    /// Resolve once no task is reserved, queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.state.idle.notified());
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting tasks and wait for the accepted ones to finish.
    pub async fn shutdown(&self) {
        self.state.closed.store(true, Ordering::Release);
        self.wait_idle().await;
    }
}
