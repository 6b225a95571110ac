//! Retry policy and executor with configurable backoff and jitter
//!
//! [`RetryPolicy`] is an immutable value type encoding attempt limits,
//! backoff shape, jitter, and classification rules; it performs pure
//! computation only. [`RetryExecutor`] drives a bounded retry loop around a
//! blocking or cooperative operation, invoking an optional retry observer
//! and an injectable sleep for determinism.
//!
//! The blocking and cooperative execution paths are deliberately separate:
//! blocking sleep blocks the calling thread, cooperative sleep suspends only
//! the current task. A single executor exposes both entry points and the
//! caller picks the mode explicitly.

use std::collections::HashSet;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use crate::clock::{AsyncSleep, BlockingSleep, ThreadSleep, TokioSleep};
use crate::error::{ConfigError, ConfigResult, ErrorClass, ErrorKind, HasStatus};

/// Backoff strategy for calculating retry delays
///
/// The attempt number is 1-based; the strategy maps it to a raw delay which
/// is then capped at the policy's `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// Constant delay between retries
    Fixed,
    /// Delay grows linearly: `base_delay * attempt`
    Linear,
    /// Delay doubles each attempt: `base_delay * 2^(attempt - 1)`
    Exponential,
    /// Delay follows the Fibonacci sequence: `base_delay * fib(attempt)`
    /// with `fib(1) = fib(2) = 1`
    Fibonacci,
}

/// Immutable retry configuration
///
/// Create once, share freely: the policy holds no per-call state and every
/// method is a pure computation. Construction through
/// [`RetryPolicy::builder`] validates the delay invariants.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (≥ 1)
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffKind,
    /// Base delay fed into the backoff strategy
    pub base_delay: Duration,
    /// Upper bound applied to every computed delay
    pub max_delay: Duration,
    /// Whether to scale each capped delay by a uniform factor in
    /// `[0.75, 1.25]`
    pub jitter: bool,
    /// Failure categories eligible for retry; `None` retries any failure
    pub retryable_kinds: Option<HashSet<ErrorKind>>,
    /// Response status codes eligible for retry; `None` never retries based
    /// on response status
    pub retryable_status_codes: Option<HashSet<u16>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Exponential,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: true,
            retryable_kinds: None,
            retryable_status_codes: None,
        }
    }
}

impl RetryPolicy {
    /// Create a policy builder
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be at least 1"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid(format!(
                "max_delay ({:?}) must not be less than base_delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }
        Ok(())
    }

    /// Calculate the delay before the retry that follows `attempt`
    ///
    /// `attempt` is 1-based; `0` yields no delay. The raw strategy delay is
    /// capped at `max_delay` first, then jitter (when enabled) scales the
    /// capped value by a uniform factor in `[0.75, 1.25]`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.base_delay.as_secs_f64();
        let raw = match self.backoff {
            BackoffKind::Fixed => base,
            BackoffKind::Linear => base * f64::from(attempt),
            BackoffKind::Exponential => base * 2f64.powi(attempt as i32 - 1),
            BackoffKind::Fibonacci => base * fibonacci(attempt),
        };

        let capped = raw.min(self.max_delay.as_secs_f64());
        let scaled = if self.jitter {
            capped * rand::thread_rng().gen_range(0.75..=1.25)
        } else {
            capped
        };

        Duration::try_from_secs_f64(scaled.max(0.0)).unwrap_or(self.max_delay)
    }

    /// Whether a failure of `kind` should be retried after `attempt`
    /// attempts have been consumed
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match &self.retryable_kinds {
            None => true,
            Some(kinds) => kinds.contains(&kind),
        }
    }

    /// Whether a successful response should nevertheless be retried based on
    /// its status code
    ///
    /// Returns `false` when attempts are exhausted, when the policy carries
    /// no retryable status codes, or when the response exposes no status.
    pub fn should_retry_response<R: HasStatus>(&self, response: &R, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        let Some(codes) = &self.retryable_status_codes else {
            return false;
        };
        match response.status() {
            Some(code) => codes.contains(&code),
            None => false,
        }
    }
}

/// Fibonacci number as f64, with `fib(1) = fib(2) = 1`
fn fibonacci(n: u32) -> f64 {
    let (mut a, mut b) = (0f64, 1f64);
    for _ in 0..n {
        (a, b) = (b, a + b);
    }
    a
}

/// Builder for [`RetryPolicy`] with fluent API
#[derive(Debug)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicyBuilder {
    /// Create a builder seeded with the default policy
    pub fn new() -> Self {
        Self { policy: RetryPolicy::default() }
    }

    /// Set the maximum number of attempts (including the first)
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    /// Set the backoff strategy
    pub fn backoff(mut self, backoff: BackoffKind) -> Self {
        self.policy.backoff = backoff;
        self
    }

    /// Set the base delay
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    /// Set the delay cap
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Use a fixed delay between retries
    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.policy.backoff = BackoffKind::Fixed;
        self.policy.base_delay = delay;
        if self.policy.max_delay < delay {
            self.policy.max_delay = delay;
        }
        self
    }

    /// Use exponential backoff between `base` and `max`
    pub fn exponential_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.policy.backoff = BackoffKind::Exponential;
        self.policy.base_delay = base;
        self.policy.max_delay = max;
        self
    }

    /// Use linearly growing backoff starting at `base`, capped at `max`
    pub fn linear_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.policy.backoff = BackoffKind::Linear;
        self.policy.base_delay = base;
        self.policy.max_delay = max;
        self
    }

    /// Use Fibonacci backoff starting at `base`, capped at `max`
    pub fn fibonacci_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.policy.backoff = BackoffKind::Fibonacci;
        self.policy.base_delay = base;
        self.policy.max_delay = max;
        self
    }

    /// Enable or disable jitter
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.policy.jitter = enabled;
        self
    }

    /// Restrict retries to the given failure categories
    pub fn retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.policy.retryable_kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Retry any failure category (the default)
    pub fn retry_any_kind(mut self) -> Self {
        self.policy.retryable_kinds = None;
        self
    }

    /// Retry responses carrying one of the given status codes
    pub fn retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.policy.retryable_status_codes = Some(codes.into_iter().collect());
        self
    }

    /// Validate and build the policy
    pub fn build(self) -> ConfigResult<RetryPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

/// Observer invoked before each backoff sleep with the attempt number just
/// consumed and the failure that triggered the retry
pub type OnRetry = dyn Fn(u32, &(dyn std::error::Error + 'static)) + Send + Sync;

/// Drives bounded retry loops around blocking or cooperative operations
///
/// Created once and reused across invocations; attempt counters are local to
/// each `execute*` call. The executor carries both a blocking and a
/// cooperative sleep so either entry point can be used, but a single
/// invocation only ever touches the sleep matching its mode.
pub struct RetryExecutor {
    policy: RetryPolicy,
    on_retry: Option<Arc<OnRetry>>,
    sleep_async: Arc<dyn AsyncSleep>,
    sleep_blocking: Arc<dyn BlockingSleep>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("has_observer", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryExecutor {
    /// Create an executor for a validated policy with production sleeps
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            on_retry: None,
            sleep_async: Arc::new(TokioSleep),
            sleep_blocking: Arc::new(ThreadSleep),
        }
    }

    /// Create an executor builder
    pub fn builder() -> RetryExecutorBuilder {
        RetryExecutorBuilder::new()
    }

    /// The policy driving this executor
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute a blocking operation with retry
    ///
    /// Blocks the calling thread during backoff. Non-retryable failures and
    /// the final attempt's failure propagate unchanged.
    #[instrument(skip(self, operation), fields(max_attempts = self.policy.max_attempts))]
    pub fn execute<F, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: ErrorClass + std::error::Error + 'static,
    {
        let mut attempt = 1u32;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !self.policy.should_retry(error.error_kind(), attempt) {
                        debug!(attempt, kind = %error.error_kind(), "not retrying");
                        return Err(error);
                    }
                    self.notify_retry(attempt, &error);
                    let delay = self.policy.calculate_delay(attempt);
                    warn!(attempt, ?delay, error = %error, "attempt failed, retrying");
                    self.sleep_blocking.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Execute a cooperative operation with retry
    ///
    /// Suspends only the current task during backoff.
    #[instrument(skip(self, operation), fields(max_attempts = self.policy.max_attempts))]
    pub async fn execute_async<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClass + std::error::Error + 'static,
    {
        let mut attempt = 1u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !self.policy.should_retry(error.error_kind(), attempt) {
                        debug!(attempt, kind = %error.error_kind(), "not retrying");
                        return Err(error);
                    }
                    self.notify_retry(attempt, &error);
                    let delay = self.policy.calculate_delay(attempt);
                    warn!(attempt, ?delay, error = %error, "attempt failed, retrying");
                    self.sleep_async.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Execute a blocking operation whose successful response may still be
    /// retried based on its status code
    ///
    /// A response whose status is not retryable (or whose attempts are
    /// exhausted) is returned as `Ok`; failures follow the same rules as
    /// [`execute`](Self::execute).
    #[instrument(skip(self, operation), fields(max_attempts = self.policy.max_attempts))]
    pub fn execute_response<F, R, E>(&self, mut operation: F) -> Result<R, E>
    where
        F: FnMut() -> Result<R, E>,
        R: HasStatus,
        E: ErrorClass + std::error::Error + 'static,
    {
        let mut attempt = 1u32;
        loop {
            match operation() {
                Ok(response) => {
                    if !self.policy.should_retry_response(&response, attempt) {
                        return Ok(response);
                    }
                    let delay = self.policy.calculate_delay(attempt);
                    debug!(attempt, status = ?response.status(), ?delay, "retryable status");
                    self.sleep_blocking.sleep(delay);
                    attempt += 1;
                }
                Err(error) => {
                    if !self.policy.should_retry(error.error_kind(), attempt) {
                        return Err(error);
                    }
                    self.notify_retry(attempt, &error);
                    let delay = self.policy.calculate_delay(attempt);
                    warn!(attempt, ?delay, error = %error, "attempt failed, retrying");
                    self.sleep_blocking.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Cooperative variant of [`execute_response`](Self::execute_response)
    #[instrument(skip(self, operation), fields(max_attempts = self.policy.max_attempts))]
    pub async fn execute_response_async<F, Fut, R, E>(&self, mut operation: F) -> Result<R, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: HasStatus,
        E: ErrorClass + std::error::Error + 'static,
    {
        let mut attempt = 1u32;
        loop {
            match operation().await {
                Ok(response) => {
                    if !self.policy.should_retry_response(&response, attempt) {
                        return Ok(response);
                    }
                    let delay = self.policy.calculate_delay(attempt);
                    debug!(attempt, status = ?response.status(), ?delay, "retryable status");
                    self.sleep_async.sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    if !self.policy.should_retry(error.error_kind(), attempt) {
                        return Err(error);
                    }
                    self.notify_retry(attempt, &error);
                    let delay = self.policy.calculate_delay(attempt);
                    warn!(attempt, ?delay, error = %error, "attempt failed, retrying");
                    self.sleep_async.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Invoke the retry observer, discarding any panic it raises
    ///
    /// Observer failures must never replace or suppress the real retry flow.
    fn notify_retry(&self, attempt: u32, error: &(dyn std::error::Error + 'static)) {
        if let Some(on_retry) = &self.on_retry {
            if catch_unwind(AssertUnwindSafe(|| on_retry(attempt, error))).is_err() {
                warn!(attempt, "retry observer panicked; ignoring");
            }
        }
    }
}

/// Builder for [`RetryExecutor`]
///
/// Accepts either a whole [`RetryPolicy`] or individual parameter overrides.
/// Supplying both is ambiguous and rejected at build time.
pub struct RetryExecutorBuilder {
    policy: Option<RetryPolicy>,
    params: RetryPolicyBuilder,
    params_touched: bool,
    on_retry: Option<Arc<OnRetry>>,
    sleep_async: Arc<dyn AsyncSleep>,
    sleep_blocking: Arc<dyn BlockingSleep>,
}

impl std::fmt::Debug for RetryExecutorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutorBuilder")
            .field("policy", &self.policy)
            .field("params_touched", &self.params_touched)
            .finish()
    }
}

impl Default for RetryExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryExecutorBuilder {
    /// Create a builder with default policy parameters and production sleeps
    pub fn new() -> Self {
        Self {
            policy: None,
            params: RetryPolicyBuilder::new(),
            params_touched: false,
            on_retry: None,
            sleep_async: Arc::new(TokioSleep),
            sleep_blocking: Arc::new(ThreadSleep),
        }
    }

    /// Use a pre-built policy (mutually exclusive with parameter overrides)
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Override the maximum number of attempts
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.params = self.params.max_attempts(attempts);
        self.params_touched = true;
        self
    }

    /// Override the backoff strategy
    pub fn backoff(mut self, backoff: BackoffKind) -> Self {
        self.params = self.params.backoff(backoff);
        self.params_touched = true;
        self
    }

    /// Override the base delay
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.params = self.params.base_delay(delay);
        self.params_touched = true;
        self
    }

    /// Override the delay cap
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.params = self.params.max_delay(delay);
        self.params_touched = true;
        self
    }

    /// Use a fixed delay between retries
    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.params = self.params.fixed_backoff(delay);
        self.params_touched = true;
        self
    }

    /// Use exponential backoff between `base` and `max`
    pub fn exponential_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.params = self.params.exponential_backoff(base, max);
        self.params_touched = true;
        self
    }

    /// Use linearly growing backoff starting at `base`, capped at `max`
    pub fn linear_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.params = self.params.linear_backoff(base, max);
        self.params_touched = true;
        self
    }

    /// Use Fibonacci backoff starting at `base`, capped at `max`
    pub fn fibonacci_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.params = self.params.fibonacci_backoff(base, max);
        self.params_touched = true;
        self
    }

    /// Override the jitter setting
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.params = self.params.jitter(enabled);
        self.params_touched = true;
        self
    }

    /// Restrict retries to the given failure categories
    pub fn retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.params = self.params.retryable_kinds(kinds);
        self.params_touched = true;
        self
    }

    /// Retry responses carrying one of the given status codes
    pub fn retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.params = self.params.retryable_status_codes(codes);
        self.params_touched = true;
        self
    }

    /// Install a retry observer
    pub fn on_retry(
        mut self,
        observer: impl Fn(u32, &(dyn std::error::Error + 'static)) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Substitute the cooperative sleep (testing hook)
    pub fn async_sleep(mut self, sleep: Arc<dyn AsyncSleep>) -> Self {
        self.sleep_async = sleep;
        self
    }

    /// Substitute the blocking sleep (testing hook)
    pub fn blocking_sleep(mut self, sleep: Arc<dyn BlockingSleep>) -> Self {
        self.sleep_blocking = sleep;
        self
    }

    /// Validate and build the executor
    ///
    /// Rejects configurations that supply both a whole policy and individual
    /// parameter overrides.
    pub fn build(self) -> ConfigResult<RetryExecutor> {
        let policy = match (self.policy, self.params_touched) {
            (Some(_), true) => {
                return Err(ConfigError::invalid(
                    "specify either a whole retry policy or individual parameters, not both",
                ));
            }
            (Some(policy), false) => {
                policy.validate()?;
                policy
            }
            (None, _) => self.params.build()?,
        };

        Ok(RetryExecutor {
            policy,
            on_retry: self.on_retry,
            sleep_async: self.sleep_async,
            sleep_blocking: self.sleep_blocking,
        })
    }
}

/// Convenience function: retry a cooperative operation under `policy`
pub async fn retry_async<F, Fut, T, E>(policy: RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ErrorClass + std::error::Error + 'static,
{
    RetryExecutor::new(policy).execute_async(operation).await
}

/// Convenience function: retry a blocking operation under `policy`
pub fn retry_blocking<F, T, E>(policy: RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: ErrorClass + std::error::Error + 'static,
{
    RetryExecutor::new(policy).execute(operation)
}
