//! Circuit breaker guarding calls to an unhealthy dependency
//!
//! The breaker tracks consecutive failures and short-circuits calls once a
//! threshold is reached, then self-probes for recovery after a cooldown:
//! `CLOSED → OPEN → HALF_OPEN → CLOSED | OPEN`. Exactly one trial call is
//! admitted while half-open; concurrent callers arriving during the trial
//! are rejected as if the circuit were open.
//!
//! Time is always read through the injected [`Clock`] so state transitions
//! can be tested deterministically with [`MockClock`](crate::clock::MockClock).

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing a single probe to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u64,
    /// Time to wait after the last failure before admitting a probe
    pub recovery_timeout: Duration,
    /// Whether a success in the closed state resets the failure count
    ///
    /// Defaults to `true` so stale failures from unrelated incidents do not
    /// accumulate toward the threshold.
    pub reset_on_success: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            reset_on_success: true,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfigBuilder {
    /// Create a builder seeded with the default configuration
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    /// Set the failure threshold
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the recovery timeout
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Set whether closed-state successes reset the failure count
    pub fn reset_on_success(mut self, reset: bool) -> Self {
        self.config.reset_on_success = reset;
        self
    }

    /// Set a custom clock for the circuit breaker (useful for testing)
    pub fn clock<C: Clock>(self, clock: C) -> CircuitBreakerBuilderWithClock<C> {
        CircuitBreakerBuilderWithClock { config: self.config, clock }
    }

    /// Validate and build the configuration
    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder with a custom clock that builds a [`CircuitBreaker`] directly
pub struct CircuitBreakerBuilderWithClock<C: Clock> {
    config: CircuitBreakerConfig,
    clock: C,
}

impl<C: Clock> CircuitBreakerBuilderWithClock<C> {
    /// Set the failure threshold
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the recovery timeout
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Set whether closed-state successes reset the failure count
    pub fn reset_on_success(mut self, reset: bool) -> Self {
        self.config.reset_on_success = reset;
        self
    }

    /// Validate the configuration and build the breaker
    pub fn build(self) -> ConfigResult<CircuitBreaker<C>> {
        CircuitBreaker::with_clock(self.config, self.clock)
    }
}

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures counted toward the threshold
    pub failure_count: u64,
    /// Cumulative successes observed
    pub success_count: u64,
    /// Cumulative calls admitted through the breaker
    pub total_calls: u64,
    /// Cumulative calls rejected without invoking the operation
    pub rejected_calls: u64,
    /// When the most recent failure was recorded
    pub last_failure_time: Option<Instant>,
}

/// Mutable breaker state, guarded by a single lock
#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u64,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Admission decision for a single call
struct Admission {
    trial: bool,
}

/// Clears a claimed probe slot if the call never reports an outcome
///
/// A dropped in-flight probe future would otherwise leave the breaker
/// half-open with the trial slot claimed forever.
struct ProbeGuard<'a> {
    inner: &'a Mutex<BreakerInner>,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            inner.trial_in_flight = false;
        }
    }
}

/// Stateful guard wrapping calls to a single downstream dependency
///
/// Create one breaker per protected resource and share it (it is `Clone`;
/// clones observe the same state). Call outcomes drive the state machine
/// either through the [`execute`](Self::execute) / [`call`](Self::call)
/// wrappers or manually via [`record_success`](Self::record_success) /
/// [`record_failure`](Self::record_failure).
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
    success_count: Arc<AtomicU64>,
    total_calls: Arc<AtomicU64>,
    rejected_calls: Arc<AtomicU64>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            success_count: Arc::clone(&self.success_count),
            total_calls: Arc::clone(&self.total_calls),
            rejected_calls: Arc::clone(&self.rejected_calls),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a circuit breaker with the default configuration
    pub fn with_defaults() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                trial_in_flight: false,
            })),
            success_count: Arc::new(AtomicU64::new(0)),
            total_calls: Arc::new(AtomicU64::new(0)),
            rejected_calls: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a circuit breaker using the builder pattern
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                trial_in_flight: false,
            })),
            success_count: Arc::new(AtomicU64::new(0)),
            total_calls: Arc::new(AtomicU64::new(0)),
            rejected_calls: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(clock),
        })
    }

    fn lock_inner(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn recovery_elapsed(&self, inner: &BreakerInner) -> bool {
        match inner.last_failure_at {
            Some(at) => self.clock.now().duration_since(at) >= self.config.recovery_timeout,
            None => true,
        }
    }

    /// Admission check that claims the half-open trial slot when applicable
    fn try_admit(&self) -> Option<Admission> {
        let mut inner = self.lock_inner();
        match inner.state {
            CircuitState::Closed => Some(Admission { trial: false }),
            CircuitState::Open => {
                if self.recovery_elapsed(&inner) {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!("circuit breaker half-open, admitting recovery probe");
                    Some(Admission { trial: true })
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(Admission { trial: true })
                }
            }
        }
    }

    /// Check whether the breaker would currently admit a call
    ///
    /// Advisory only: it transitions OPEN → HALF_OPEN once the recovery
    /// timeout has elapsed but does not claim the probe slot. Use
    /// [`execute`](Self::execute) / [`call`](Self::call) for the guarded
    /// admission.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock_inner();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.recovery_elapsed(&inner) {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = false;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Execute a cooperative operation with circuit breaker protection
    ///
    /// Rejected calls return [`ResilienceError::CircuitOpen`] without
    /// invoking the operation; operation failures are recorded and wrapped
    /// in [`ResilienceError::OperationFailed`] with the original error as
    /// source.
    #[instrument(skip(self, operation), fields(state = %self.state()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let Some(admission) = self.try_admit() else {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            debug!("circuit breaker rejecting call");
            return Err(ResilienceError::CircuitOpen);
        };

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let mut probe = ProbeGuard { inner: &self.inner, armed: admission.trial };

        match operation().await {
            Ok(result) => {
                probe.armed = false;
                self.record_success();
                Ok(result)
            }
            Err(error) => {
                probe.armed = false;
                self.record_failure();
                warn!(error = %error, "circuit breaker: operation failed");
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Execute a blocking operation with circuit breaker protection
    #[instrument(skip(self, operation), fields(state = %self.state()))]
    pub fn call<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let Some(admission) = self.try_admit() else {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            debug!("circuit breaker rejecting call");
            return Err(ResilienceError::CircuitOpen);
        };

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let mut probe = ProbeGuard { inner: &self.inner, armed: admission.trial };

        match operation() {
            Ok(result) => {
                probe.armed = false;
                self.record_success();
                Ok(result)
            }
            Err(error) => {
                probe.armed = false;
                self.record_failure();
                warn!("circuit breaker: operation failed");
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Record a successful operation
    ///
    /// A half-open success closes the circuit and clears the failure count;
    /// a closed-state success clears the count when `reset_on_success` is
    /// enabled.
    pub fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock_inner();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.trial_in_flight = false;
                info!("circuit breaker closed after successful probe");
            }
            CircuitState::Closed => {
                if self.config.reset_on_success {
                    inner.failure_count = 0;
                }
            }
            CircuitState::Open => {
                warn!("success recorded while circuit is open");
            }
        }
    }

    /// Record a failed operation
    ///
    /// Reaching the threshold in the closed state opens the circuit; any
    /// half-open failure reopens it and refreshes the recovery deadline.
    pub fn record_failure(&self) {
        let now = self.clock.now();

        let mut inner = self.lock_inner();
        inner.last_failure_at = Some(now);
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    warn!(failures = inner.failure_count, "circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.trial_in_flight = false;
                warn!("circuit breaker reopened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.lock_inner().state
    }

    /// Get a metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.lock_inner();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: self.success_count.load(Ordering::Acquire),
            total_calls: self.total_calls.load(Ordering::Acquire),
            rejected_calls: self.rejected_calls.load(Ordering::Acquire),
            last_failure_time: inner.last_failure_at,
        }
    }

    /// Reset the circuit breaker to the closed state
    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.trial_in_flight = false;
        drop(inner);
        info!("circuit breaker manually reset to closed state");
    }
}
