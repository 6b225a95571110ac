//! Fault-tolerance toolkit for calling unreliable operations.
//!
//! Breakwater provides three independently usable primitives and a
//! composition contract for wrapping network calls and other unreliable
//! work:
//!
//! - **Retry**: [`RetryPolicy`] encodes attempt limits, backoff shape,
//!   jitter, and classification rules; [`RetryExecutor`] drives the bounded
//!   retry loop in either execution domain.
//! - **Circuit breaker**: [`CircuitBreaker`] short-circuits calls to an
//!   unhealthy dependency and cautiously probes for recovery.
//! - **Bulkhead**: [`Bulkhead`] bounds concurrent use of a resource through
//!   a [`BlockingResourcePool`] or [`CooperativeResourcePool`] with fair
//!   FIFO admission and bounded queuing.
//!
//! Composed, the layers nest as decorators around a unit of work: bulkhead
//! (admission control) around circuit breaker (health gate) around retry
//! (transient-failure resilience).
//!
//! Two scheduling domains coexist and are never bridged implicitly: the
//! blocking entry points block OS threads, the cooperative entry points
//! suspend tasks. Every time-dependent component accepts an injectable
//! clock or sleep so tests can advance virtual time.
//!
//! Diagnostics are emitted as structured `tracing` events; the engine is
//! fully functional with no subscriber installed.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod pool;
pub mod retry;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use bulkhead::{Bulkhead, PoolHandle, DEFAULT_ACQUIRE_TIMEOUT};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState,
};
pub use clock::{
    AsyncSleep, BlockingSleep, Clock, MockClock, RecordingSleep, SystemClock, ThreadSleep,
    TokioSleep,
};
pub use error::{
    BoxedError, ConfigError, ConfigResult, ErrorClass, ErrorKind, HasStatus, PoolError,
    ResilienceError, ResilienceResult,
};
pub use pool::{
    BlockingResourcePool, CooperativeResourcePool, PoolConfig, PoolConfigBuilder, PoolStats,
    ResourcePool,
};
pub use retry::{
    retry_async, retry_blocking, BackoffKind, RetryExecutor, RetryExecutorBuilder, RetryPolicy,
    RetryPolicyBuilder,
};
