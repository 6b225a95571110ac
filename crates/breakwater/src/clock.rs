//! Time abstractions for deterministic testing
//!
//! Every time-dependent component in this crate reads the clock and sleeps
//! through the traits defined here rather than calling the wall clock
//! directly. Production code uses [`SystemClock`], [`TokioSleep`], and
//! [`ThreadSleep`]; tests substitute [`MockClock`] and [`RecordingSleep`] to
//! advance virtual time without real delays.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Trait for time operations to enable deterministic testing
///
/// Allows the circuit breaker (and anything else that compares elapsed time
/// against a deadline) to use real system time in production and controlled
/// mock time in tests.
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Get milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Implement Clock for Arc<T> where T: Clock for convenient cloning
impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Mock clock for deterministic testing
///
/// Allows tests to control time progression without actual delays. Clones
/// share the same underlying elapsed counter, so a test can hold one handle
/// while the component under test holds another.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Create a new mock clock with a specific start time
    pub fn with_current_time(start: Instant) -> Self {
        Self { start, elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }

    /// Advance the mock clock by milliseconds (convenience method)
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the mock clock to a specific elapsed time
    pub fn set_elapsed(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed = duration;
        }
    }

    /// Get the current elapsed time
    pub fn elapsed(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        let elapsed = self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO);
        self.start + elapsed
    }

    fn system_time(&self) -> SystemTime {
        let elapsed = self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO);
        SystemTime::UNIX_EPOCH + elapsed
    }
}

/// Boxed future returned by [`AsyncSleep::sleep`]
pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Cooperative sleep primitive
///
/// Suspends only the current task at a yield point; the carrier thread keeps
/// running other tasks. Injected into the retry executor and the cooperative
/// resource pool.
pub trait AsyncSleep: Send + Sync + 'static {
    /// Suspend the current task for `duration`
    fn sleep(&self, duration: Duration) -> SleepFuture<'_>;
}

/// Production cooperative sleep backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleep;

impl AsyncSleep for TokioSleep {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Blocking sleep primitive
///
/// Blocks the calling OS thread. Injected into the blocking retry path; never
/// used from cooperative code.
pub trait BlockingSleep: Send + Sync + 'static {
    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);
}

/// Production blocking sleep backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

impl BlockingSleep for ThreadSleep {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Test sleep that records requested delays and returns immediately
///
/// Implements both sleep traits so a single instance can observe the delays
/// a retry executor computes for either execution domain without slowing the
/// test down.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleep {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleep {
    /// Create a new recording sleep with an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// All delays requested so far, in order
    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Number of sleep calls observed
    pub fn count(&self) -> usize {
        self.slept.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn record(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
    }
}

impl AsyncSleep for RecordingSleep {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        self.record(duration);
        Box::pin(std::future::ready(()))
    }
}

impl BlockingSleep for RecordingSleep {
    fn sleep(&self, duration: Duration) {
        self.record(duration);
    }
}
