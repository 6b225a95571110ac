//! Bounded concurrency pools with fair FIFO admission
//!
//! A resource pool hands out up to `max_concurrent` permits; excess callers
//! wait in a bounded FIFO queue or are rejected immediately when the queue is
//! full. Two disjoint implementations exist and are never mixed:
//!
//! - [`BlockingResourcePool`] — OS-thread primitives; `acquire` blocks the
//!   calling thread.
//! - [`CooperativeResourcePool`] — task primitives; `acquire` suspends only
//!   the current task.
//!
//! The split makes the "never mix scheduling domains" invariant a property
//! of the types: the [`Bulkhead`](crate::bulkhead::Bulkhead) entry points
//! check which implementation they were handed before any permit is taken.

pub mod blocking;
pub mod cooperative;

use crate::error::{ConfigError, ConfigResult};

pub use blocking::BlockingResourcePool;
pub use cooperative::CooperativeResourcePool;

/// Configuration shared by both pool implementations
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of concurrently held permits (> 0)
    pub max_concurrent: usize,
    /// Maximum number of queued waiters; `None` means unbounded, `0` means
    /// reject as soon as all permits are held
    pub max_queue_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_concurrent: 10, max_queue_size: Some(10) }
    }
}

impl PoolConfig {
    /// Create a configuration builder
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`PoolConfig`]
#[derive(Debug)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConfigBuilder {
    /// Create a builder seeded with the default configuration
    pub fn new() -> Self {
        Self { config: PoolConfig::default() }
    }

    /// Set the maximum number of concurrently held permits
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.max_concurrent = max;
        self
    }

    /// Bound the wait queue at `max` waiters
    pub fn max_queue_size(mut self, max: usize) -> Self {
        self.config.max_queue_size = Some(max);
        self
    }

    /// Allow an unbounded wait queue
    pub fn unbounded_queue(mut self) -> Self {
        self.config.max_queue_size = None;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> ConfigResult<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Snapshot of pool usage for monitoring
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Permits currently held
    pub active: usize,
    /// Permits immediately available
    pub available: usize,
    /// Waiters currently queued
    pub queued: usize,
    /// Configured permit count
    pub max_concurrent: usize,
    /// Cumulative successful acquisitions
    pub total_acquired: u64,
    /// Cumulative releases
    pub total_released: u64,
    /// Cumulative acquire timeouts
    pub total_timeouts: u64,
    /// Cumulative queue-full rejections
    pub total_rejections: u64,
}

impl PoolStats {
    /// Current utilization as a fraction in `[0.0, 1.0]`
    pub fn utilization(&self) -> f64 {
        if self.max_concurrent == 0 {
            return 0.0;
        }
        self.active as f64 / self.max_concurrent as f64
    }

    /// Whether every permit is currently held
    pub fn is_at_capacity(&self) -> bool {
        self.active >= self.max_concurrent
    }
}

/// Read-only introspection shared by both pool implementations
pub trait ResourcePool {
    /// Configured permit count
    fn max_concurrent(&self) -> usize;

    /// Permits currently held
    fn active_count(&self) -> usize;

    /// Permits immediately available
    fn available_capacity(&self) -> usize {
        self.max_concurrent().saturating_sub(self.active_count())
    }

    /// Waiters currently queued
    fn queue_size(&self) -> usize;

    /// Usage snapshot including cumulative counters
    fn stats(&self) -> PoolStats;
}
