//! Bulkhead: a named binding of one resource pool to an execution entry point
//!
//! The bulkhead is the admission-control layer of the composition stack: it
//! answers "can this operation even start?" by taking a pool permit before
//! invoking the operation and releasing it on every exit path. Blocking work
//! only ever runs against a blocking pool and cooperative work against a
//! cooperative pool; calling the wrong entry point for the bound pool type
//! is a configuration error reported before anything is acquired or invoked.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::error::{PoolError, ResilienceError, ResilienceResult};
use crate::pool::{BlockingResourcePool, CooperativeResourcePool, PoolStats, ResourcePool};

/// Default permit acquisition timeout for bulkhead execution
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// The pool a bulkhead is bound to
///
/// Pools are wrapped in `Arc` so a bulkhead and other owners can share one
/// pool instance.
#[derive(Debug, Clone)]
pub enum PoolHandle {
    /// OS-thread domain pool; served by [`Bulkhead::execute`]
    Blocking(Arc<BlockingResourcePool>),
    /// Task domain pool; served by [`Bulkhead::execute_async`]
    Cooperative(Arc<CooperativeResourcePool>),
}

impl From<BlockingResourcePool> for PoolHandle {
    fn from(pool: BlockingResourcePool) -> Self {
        Self::Blocking(Arc::new(pool))
    }
}

impl From<Arc<BlockingResourcePool>> for PoolHandle {
    fn from(pool: Arc<BlockingResourcePool>) -> Self {
        Self::Blocking(pool)
    }
}

impl From<CooperativeResourcePool> for PoolHandle {
    fn from(pool: CooperativeResourcePool) -> Self {
        Self::Cooperative(Arc::new(pool))
    }
}

impl From<Arc<CooperativeResourcePool>> for PoolHandle {
    fn from(pool: Arc<CooperativeResourcePool>) -> Self {
        Self::Cooperative(pool)
    }
}

/// Releases the held permit exactly once, on every exit path
enum PermitGuard<'a> {
    Blocking(&'a BlockingResourcePool),
    Cooperative(&'a CooperativeResourcePool),
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        match self {
            PermitGuard::Blocking(pool) => pool.release(),
            PermitGuard::Cooperative(pool) => pool.release(),
        }
    }
}

/// Named admission-control wrapper around a resource pool
///
/// Stateless beyond the pool reference, a name for diagnostics, and the
/// acquire timeout applied on entry.
#[derive(Debug, Clone)]
pub struct Bulkhead {
    name: String,
    acquire_timeout: Duration,
    pool: PoolHandle,
}

impl Bulkhead {
    /// Bind a pool under a diagnostic name with the default acquire timeout
    pub fn new(name: impl Into<String>, pool: impl Into<PoolHandle>) -> Self {
        Self { name: name.into(), acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT, pool: pool.into() }
    }

    /// Bind a blocking pool (convenience constructor)
    pub fn blocking(name: impl Into<String>, pool: BlockingResourcePool) -> Self {
        Self::new(name, pool)
    }

    /// Bind a cooperative pool (convenience constructor)
    pub fn cooperative(name: impl Into<String>, pool: CooperativeResourcePool) -> Self {
        Self::new(name, pool)
    }

    /// Set the permit acquisition timeout applied on entry
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// The diagnostic name of this bulkhead
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Usage snapshot of the bound pool
    pub fn pool_stats(&self) -> PoolStats {
        match &self.pool {
            PoolHandle::Blocking(pool) => pool.stats(),
            PoolHandle::Cooperative(pool) => pool.stats(),
        }
    }

    /// Execute a blocking operation under admission control
    ///
    /// Requires a blocking-shaped pool. On entry a permit is acquired
    /// (waiting up to the configured timeout); if acquisition fails the
    /// operation is never invoked. The permit is released exactly once on
    /// every exit path.
    #[instrument(skip(self, operation), fields(bulkhead = %self.name))]
    pub fn execute<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let PoolHandle::Blocking(pool) = &self.pool else {
            return Err(ResilienceError::InvalidConfiguration {
                message: format!(
                    "bulkhead '{}': sync execution requires a blocking pool",
                    self.name
                ),
            });
        };

        match pool.acquire(self.acquire_timeout) {
            Ok(true) => {}
            Ok(false) => {
                debug!(timeout = ?self.acquire_timeout, "bulkhead admission timed out");
                return Err(ResilienceError::AcquireTimeout { timeout: self.acquire_timeout });
            }
            Err(PoolError::QueueFull { capacity }) => {
                debug!(capacity, "bulkhead rejected, wait queue full");
                return Err(ResilienceError::QueueFull { capacity });
            }
        }

        let _permit = PermitGuard::Blocking(pool);
        match operation() {
            Ok(result) => Ok(result),
            Err(error) => {
                warn!("bulkhead: operation failed");
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Execute a cooperative operation under admission control
    ///
    /// Requires a cooperative-shaped pool; otherwise identical to
    /// [`execute`](Self::execute).
    #[instrument(skip(self, operation), fields(bulkhead = %self.name))]
    pub async fn execute_async<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let PoolHandle::Cooperative(pool) = &self.pool else {
            return Err(ResilienceError::InvalidConfiguration {
                message: format!(
                    "bulkhead '{}': async execution requires a cooperative pool",
                    self.name
                ),
            });
        };

        match pool.acquire(self.acquire_timeout).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(timeout = ?self.acquire_timeout, "bulkhead admission timed out");
                return Err(ResilienceError::AcquireTimeout { timeout: self.acquire_timeout });
            }
            Err(PoolError::QueueFull { capacity }) => {
                debug!(capacity, "bulkhead rejected, wait queue full");
                return Err(ResilienceError::QueueFull { capacity });
            }
        }

        let _permit = PermitGuard::Cooperative(pool);
        match operation().await {
            Ok(result) => Ok(result),
            Err(error) => {
                warn!("bulkhead: operation failed");
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for bulkhead admission control
    //!
    //! Tests cover pool-type/execution-mode matching, acquire failure
    //! mapping, and exactly-once release on success and failure paths.

    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::pool::PoolConfig;

    fn blocking_pool(max_concurrent: usize) -> BlockingResourcePool {
        BlockingResourcePool::new(PoolConfig {
            max_concurrent,
            max_queue_size: Some(4),
        })
        .unwrap()
    }

    fn cooperative_pool(max_concurrent: usize) -> CooperativeResourcePool {
        CooperativeResourcePool::new(PoolConfig {
            max_concurrent,
            max_queue_size: Some(4),
        })
        .unwrap()
    }

    /// Tests sync execution against a cooperative pool is a configuration
    /// error and never invokes the operation.
    #[test]
    fn test_execute_requires_blocking_pool() {
        let bulkhead = Bulkhead::cooperative("mismatched", cooperative_pool(1));
        let calls = AtomicU32::new(0);

        let result = bulkhead.execute(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(())
        });

        assert!(matches!(result, Err(ResilienceError::InvalidConfiguration { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "operation must never run");
    }

    /// Tests async execution against a blocking pool is a configuration
    /// error and never invokes the operation.
    #[tokio::test]
    async fn test_execute_async_requires_cooperative_pool() {
        let bulkhead = Bulkhead::blocking("mismatched", blocking_pool(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = bulkhead
            .execute_async(|| async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(())
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::InvalidConfiguration { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "operation must never run");
    }

    /// Tests the permit is released after a successful blocking execution.
    #[test]
    fn test_execute_releases_on_success() {
        let pool = blocking_pool(1);
        let bulkhead = Bulkhead::blocking("orders", pool.clone());

        let result = bulkhead.execute(|| Ok::<_, std::io::Error>(42));
        assert_eq!(result.unwrap(), 42);
        assert_eq!(pool.active_count(), 0, "permit must be released");
    }

    /// Tests the permit is released when the operation fails.
    #[test]
    fn test_execute_releases_on_failure() {
        let pool = blocking_pool(1);
        let bulkhead = Bulkhead::blocking("orders", pool.clone());

        let result = bulkhead.execute(|| Err::<(), _>(std::io::Error::other("boom")));
        assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));
        assert_eq!(pool.active_count(), 0, "permit must be released on the error path");
    }

    /// Tests a full wait queue maps to `ResilienceError::QueueFull` without
    /// invoking the operation.
    #[test]
    fn test_execute_maps_queue_full() {
        let pool = BlockingResourcePool::new(PoolConfig {
            max_concurrent: 1,
            max_queue_size: Some(0),
        })
        .unwrap();
        assert!(pool.try_acquire());

        let bulkhead = Bulkhead::blocking("busy", pool.clone());
        let calls = AtomicU32::new(0);
        let result = bulkhead.execute(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(())
        });

        assert!(matches!(result, Err(ResilienceError::QueueFull { capacity: 0 })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        pool.release();
    }

    /// Tests a held pool times the caller out with
    /// `ResilienceError::AcquireTimeout`.
    #[tokio::test]
    async fn test_execute_async_acquire_timeout() {
        let pool = cooperative_pool(1);
        assert!(pool.try_acquire());

        let bulkhead = Bulkhead::cooperative("busy", pool.clone())
            .with_acquire_timeout(Duration::from_millis(20));

        let result = bulkhead.execute_async(|| async { Ok::<_, std::io::Error>(()) }).await;
        assert!(matches!(result, Err(ResilienceError::AcquireTimeout { .. })));
        pool.release();
    }

    /// Tests the async permit is released on both outcome paths.
    #[tokio::test]
    async fn test_execute_async_releases_permit() {
        let pool = cooperative_pool(1);
        let bulkhead = Bulkhead::cooperative("orders", pool.clone());

        let ok = bulkhead.execute_async(|| async { Ok::<_, std::io::Error>(7) }).await;
        assert_eq!(ok.unwrap(), 7);
        assert_eq!(pool.active_count(), 0);

        let err = bulkhead
            .execute_async(|| async { Err::<(), _>(std::io::Error::other("boom")) })
            .await;
        assert!(matches!(err, Err(ResilienceError::OperationFailed { .. })));
        assert_eq!(pool.active_count(), 0);
    }

    /// Validates `Bulkhead::name` and `Bulkhead::pool_stats` behavior for
    /// the introspection scenario.
    ///
    /// Assertions:
    /// - Confirms the diagnostic name round-trips.
    /// - Confirms pool stats reflect executed operations.
    #[test]
    fn test_bulkhead_introspection() {
        let bulkhead = Bulkhead::blocking("payments", blocking_pool(3));
        assert_eq!(bulkhead.name(), "payments");

        let _ = bulkhead.execute(|| Ok::<_, std::io::Error>(()));
        let stats = bulkhead.pool_stats();
        assert_eq!(stats.total_acquired, 1);
        assert_eq!(stats.total_released, 1);
        assert_eq!(stats.max_concurrent, 3);
    }
}
