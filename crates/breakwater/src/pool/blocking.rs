//! Blocking resource pool for the OS-thread scheduling domain
//!
//! Admission is serialized through the pool's internal mutex, but the
//! blocking wait for a turn happens on the waiter's own wait slot outside
//! that lock (check under lock, wait unlocked). Waiters are served strictly
//! FIFO: a released permit is handed to the longest-waiting queued caller
//! before any new `acquire` is admitted.
//!
//! **Thread Safety**
//! - All operations take `&self` and may be invoked concurrently.
//! - Mutex poisoning is recovered transparently so operations can proceed
//!   after a panic in another thread.
//!
//! This type must never be driven from cooperative code without an explicit
//! thread handoff; cooperative callers use
//! [`CooperativeResourcePool`](super::CooperativeResourcePool) instead.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::{PoolConfig, PoolStats, ResourcePool};
use crate::error::{ConfigResult, PoolError};

/// State of a queued waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Still queued, no permit yet
    Waiting,
    /// A released permit was transferred to this waiter
    Granted,
    /// The waiter timed out and removed itself
    Cancelled,
}

/// Per-waiter wait handle: private mutex + condvar pair
struct WaitSlot {
    state: Mutex<SlotState>,
    cv: Condvar,
}

impl WaitSlot {
    fn new() -> Self {
        Self { state: Mutex::new(SlotState::Waiting), cv: Condvar::new() }
    }

    fn lock_state(&self) -> MutexGuard<'_, SlotState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, SlotState>,
        duration: Duration,
    ) -> MutexGuard<'a, SlotState> {
        match self.cv.wait_timeout(guard, duration) {
            Ok((guard, _result)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }
}

struct Inner {
    active: usize,
    waiters: VecDeque<Arc<WaitSlot>>,
}

/// Bounded concurrency pool for blocking callers
///
/// Clones share the same underlying pool state.
pub struct BlockingResourcePool {
    config: PoolConfig,
    inner: Arc<Mutex<Inner>>,
    total_acquired: Arc<AtomicU64>,
    total_released: Arc<AtomicU64>,
    total_timeouts: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl Clone for BlockingResourcePool {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            total_acquired: Arc::clone(&self.total_acquired),
            total_released: Arc::clone(&self.total_released),
            total_timeouts: Arc::clone(&self.total_timeouts),
            total_rejections: Arc::clone(&self.total_rejections),
        }
    }
}

impl fmt::Debug for BlockingResourcePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingResourcePool")
            .field("max_concurrent", &self.config.max_concurrent)
            .field("max_queue_size", &self.config.max_queue_size)
            .field("active", &self.active_count())
            .field("queued", &self.queue_size())
            .finish()
    }
}

impl BlockingResourcePool {
    /// Create a new pool for a validated configuration
    pub fn new(config: PoolConfig) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                active: 0,
                waiters: VecDeque::new(),
            })),
            total_acquired: Arc::new(AtomicU64::new(0)),
            total_released: Arc::new(AtomicU64::new(0)),
            total_timeouts: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
            config,
        })
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Take a permit without waiting
    ///
    /// Returns `true` when a permit was free; never queues.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock_inner();
        if inner.active < self.config.max_concurrent {
            inner.active += 1;
            drop(inner);
            self.total_acquired.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Take a permit, blocking the calling thread for at most `timeout`
    ///
    /// Returns `Ok(true)` when a permit was taken (immediately or handed
    /// over by a release), `Ok(false)` when the timeout elapsed first, and
    /// `Err(PoolError::QueueFull)` immediately when the wait queue is at
    /// its bound. A timed-out waiter removes itself from the queue and can
    /// never receive a later handoff.
    pub fn acquire(&self, timeout: Duration) -> Result<bool, PoolError> {
        let slot = {
            let mut inner = self.lock_inner();
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
                    debug!(capacity = max_queue, "blocking pool rejecting caller, queue full");
                    return Err(PoolError::QueueFull { capacity: max_queue });
                }
            }
            let slot = Arc::new(WaitSlot::new());
            inner.waiters.push_back(Arc::clone(&slot));
            slot
        };

        trace!(?timeout, "blocking pool caller queued");
        let deadline = Instant::now().checked_add(timeout);
        let mut state = slot.lock_state();
        loop {
            match *state {
                SlotState::Granted => {
                    self.total_acquired.fetch_add(1, Ordering::Relaxed);
                    return Ok(true);
                }
                SlotState::Cancelled => return Ok(false),
                SlotState::Waiting => {}
            }
            let remaining = deadline
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::MAX);
            if remaining.is_zero() {
                break;
            }
            state = slot.wait_timeout(state, remaining);
        }
        drop(state);

        // Timed out: dequeue ourselves under the pool lock. A grant may have
        // landed between the deadline firing and this point; the grant wins
        // and the permit is kept.
        let mut inner = self.lock_inner();
        let mut state = slot.lock_state();
        if *state == SlotState::Granted {
            self.total_acquired.fetch_add(1, Ordering::Relaxed);
            return Ok(true);
        }
        *state = SlotState::Cancelled;
        drop(state);
        inner.waiters.retain(|candidate| !Arc::ptr_eq(candidate, &slot));
        drop(inner);
        self.total_timeouts.fetch_add(1, Ordering::Relaxed);
        debug!(?timeout, "blocking pool acquire timed out");
        Ok(false)
    }

    /// Return a permit to the pool
    ///
    /// If any waiter is queued, the head of the FIFO queue receives the
    /// freed permit directly (the slot is transferred, not re-allocated);
    /// otherwise the active count drops.
    pub fn release(&self) {
        let mut inner = self.lock_inner();
        while let Some(slot) = inner.waiters.pop_front() {
            let mut state = slot.lock_state();
            if *state == SlotState::Cancelled {
                continue;
            }
            *state = SlotState::Granted;
            drop(state);
            slot.cv.notify_one();
            drop(inner);
            self.total_released.fetch_add(1, Ordering::Relaxed);
            trace!("blocking pool permit handed to queued waiter");
            return;
        }
        inner.active = inner.active.saturating_sub(1);
        drop(inner);
        self.total_released.fetch_add(1, Ordering::Relaxed);
    }
}

impl ResourcePool for BlockingResourcePool {
    fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    fn active_count(&self) -> usize {
        self.lock_inner().active
    }

    fn queue_size(&self) -> usize {
        self.lock_inner().waiters.len()
    }

    fn stats(&self) -> PoolStats {
        let inner = self.lock_inner();
        PoolStats {
            active: inner.active,
            available: self.config.max_concurrent.saturating_sub(inner.active),
            queued: inner.waiters.len(),
            max_concurrent: self.config.max_concurrent,
            total_acquired: self.total_acquired.load(Ordering::Acquire),
            total_released: self.total_released.load(Ordering::Acquire),
            total_timeouts: self.total_timeouts.load(Ordering::Acquire),
            total_rejections: self.total_rejections.load(Ordering::Acquire),
        }
    }
}
