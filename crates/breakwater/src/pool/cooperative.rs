//! Cooperative resource pool for the task scheduling domain
//!
//! Waiting never blocks the carrier thread: each queued caller parks on a
//! oneshot wait handle and races it against an injectable async sleep.
//! Bookkeeping lives behind a short `parking_lot` critical section that is
//! never held across an await; permit grants are sent while holding that
//! lock so the grant/timeout race resolves deterministically.
//!
//! Waiters are served strictly FIFO. A waiter whose future is dropped
//! (cancelled) simply abandons its receiver; `release` skips such dead
//! handles and the queue prunes them opportunistically.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::{PoolConfig, PoolStats, ResourcePool};
use crate::clock::{AsyncSleep, TokioSleep};
use crate::error::{ConfigResult, PoolError};

/// A queued caller: FIFO position plus its wake-up channel
struct Waiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

struct Inner {
    active: usize,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
}

/// Bounded concurrency pool for cooperative callers
///
/// Clones share the same underlying pool state. Must never be driven from
/// blocking code; blocking callers use
/// [`BlockingResourcePool`](super::BlockingResourcePool) instead.
pub struct CooperativeResourcePool {
    config: PoolConfig,
    inner: Arc<Mutex<Inner>>,
    sleep: Arc<dyn AsyncSleep>,
    total_acquired: Arc<AtomicU64>,
    total_released: Arc<AtomicU64>,
    total_timeouts: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl Clone for CooperativeResourcePool {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            sleep: Arc::clone(&self.sleep),
            total_acquired: Arc::clone(&self.total_acquired),
            total_released: Arc::clone(&self.total_released),
            total_timeouts: Arc::clone(&self.total_timeouts),
            total_rejections: Arc::clone(&self.total_rejections),
        }
    }
}

impl fmt::Debug for CooperativeResourcePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CooperativeResourcePool")
            .field("max_concurrent", &self.config.max_concurrent)
            .field("max_queue_size", &self.config.max_queue_size)
            .field("active", &self.active_count())
            .field("queued", &self.queue_size())
            .finish()
    }
}

impl CooperativeResourcePool {
    /// Create a new pool for a validated configuration
    pub fn new(config: PoolConfig) -> ConfigResult<Self> {
        Self::with_sleep(config, Arc::new(TokioSleep))
    }

    /// Create a pool with a custom sleep primitive (useful for testing)
    pub fn with_sleep(config: PoolConfig, sleep: Arc<dyn AsyncSleep>) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                active: 0,
                waiters: VecDeque::new(),
                next_waiter_id: 0,
            })),
            sleep,
            total_acquired: Arc::new(AtomicU64::new(0)),
            total_released: Arc::new(AtomicU64::new(0)),
            total_timeouts: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
            config,
        })
    }

    /// Take a permit without suspending
    ///
    /// Returns `true` when a permit was free; never queues.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.active < self.config.max_concurrent {
            inner.active += 1;
            drop(inner);
            self.total_acquired.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Take a permit, suspending the current task for at most `timeout`
    ///
    /// Returns `Ok(true)` when a permit was taken (immediately or handed
    /// over by a release), `Ok(false)` when the timeout elapsed first, and
    /// `Err(PoolError::QueueFull)` immediately when the wait queue is at
    /// its bound. A timed-out waiter removes itself from the queue and can
    /// never receive a later handoff.
    pub async fn acquire(&self, timeout: Duration) -> Result<bool, PoolError> {
        let (id, mut rx) = {
            let mut inner = self.inner.lock();
            // Prune waiters whose futures were cancelled.
            inner.waiters.retain(|waiter| !waiter.tx.is_closed());

            if inner.active < self.config.max_concurrent {
                inner.active += 1;
                drop(inner);
                self.total_acquired.fetch_add(1, Ordering::Relaxed);
                return Ok(true);
            }
            if let Some(max_queue) = self.config.max_queue_size {
                if inner.waiters.len() >= max_queue {
                    drop(inner);
                    self.total_rejections.fetch_add(1, Ordering::Relaxed);
                    debug!(capacity = max_queue, "cooperative pool rejecting caller, queue full");
                    return Err(PoolError::QueueFull { capacity: max_queue });
                }
            }
            let (tx, rx) = oneshot::channel();
            let id = inner.next_waiter_id;
            inner.next_waiter_id += 1;
            inner.waiters.push_back(Waiter { id, tx });
            (id, rx)
        };

        trace!(?timeout, "cooperative pool caller queued");
        tokio::select! {
            granted = &mut rx => {
                if granted.is_ok() {
                    self.total_acquired.fetch_add(1, Ordering::Relaxed);
                    Ok(true)
                } else {
                    // Sender vanished without a grant; treat as a failed wait.
                    Ok(false)
                }
            }
            () = self.sleep.sleep(timeout) => {
                let mut inner = self.inner.lock();
                let before = inner.waiters.len();
                inner.waiters.retain(|waiter| waiter.id != id);
                let removed = inner.waiters.len() < before;
                drop(inner);

                if removed {
                    self.total_timeouts.fetch_add(1, Ordering::Relaxed);
                    debug!(?timeout, "cooperative pool acquire timed out");
                    Ok(false)
                } else {
                    // Grants are sent under the pool lock, so an absent entry
                    // means the permit was already handed to us; keep it.
                    match rx.try_recv() {
                        Ok(()) => {
                            self.total_acquired.fetch_add(1, Ordering::Relaxed);
                            Ok(true)
                        }
                        Err(_) => Ok(false),
                    }
                }
            }
        }
    }

    /// Return a permit to the pool
    ///
    /// If any live waiter is queued, the head of the FIFO queue receives the
    /// freed permit directly (the slot is transferred, not re-allocated);
    /// cancelled waiters are skipped. Otherwise the active count drops.
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        while let Some(waiter) = inner.waiters.pop_front() {
            if waiter.tx.send(()).is_ok() {
                drop(inner);
                self.total_released.fetch_add(1, Ordering::Relaxed);
                trace!("cooperative pool permit handed to queued waiter");
                return;
            }
            // Receiver dropped (cancelled or timed out); skip to the next.
        }
        inner.active = inner.active.saturating_sub(1);
        drop(inner);
        self.total_released.fetch_add(1, Ordering::Relaxed);
    }
}

impl ResourcePool for CooperativeResourcePool {
    fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    fn active_count(&self) -> usize {
        self.inner.lock().active
    }

    fn queue_size(&self) -> usize {
        self.inner.lock().waiters.iter().filter(|waiter| !waiter.tx.is_closed()).count()
    }

    fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            active: inner.active,
            available: self.config.max_concurrent.saturating_sub(inner.active),
            queued: inner.waiters.iter().filter(|waiter| !waiter.tx.is_closed()).count(),
            max_concurrent: self.config.max_concurrent,
            total_acquired: self.total_acquired.load(Ordering::Acquire),
            total_released: self.total_released.load(Ordering::Acquire),
            total_timeouts: self.total_timeouts.load(Ordering::Acquire),
            total_rejections: self.total_rejections.load(Ordering::Acquire),
        }
    }
}
