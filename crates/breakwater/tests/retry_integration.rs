//! Integration tests for the retry policy and executor
//!
//! Tests retry behavior with various failure patterns, backoff strategies,
//! observer semantics, and both execution domains.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use breakwater::{
    retry_async, BackoffKind, ErrorClass, ErrorKind, HasStatus, RecordingSleep, RetryExecutor,
    RetryPolicy,
};

/// Custom error type for testing
#[derive(Debug, Clone)]
struct TestError {
    message: String,
    kind: ErrorKind,
}

impl TestError {
    fn new(message: &str, kind: ErrorKind) -> Self {
        Self { message: message.to_string(), kind }
    }
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TestError {}

impl ErrorClass for TestError {
    fn error_kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Response type for status-based retry testing
struct TestResponse {
    status: u16,
}

impl HasStatus for TestResponse {
    fn status(&self) -> Option<u16> {
        Some(self.status)
    }
}

/// Validates retry recovery from transient failures with exponential
/// backoff.
///
/// # Test Steps
/// 1. Configure exponential backoff with 5 attempts
/// 2. Simulate an operation failing its first 3 attempts
/// 3. Allow success on the 4th attempt
/// 4. Verify exactly 4 attempts were made and the success value returned
#[tokio::test(flavor = "multi_thread")]
async fn test_retry_exponential_backoff_success() {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let attempt_count_clone = Arc::clone(&attempt_count);

    let policy = RetryPolicy::builder()
        .max_attempts(5)
        .exponential_backoff(Duration::from_millis(10), Duration::from_millis(100))
        .jitter(false)
        .build()
        .expect("Failed to build policy");

    let result = retry_async(policy, || {
        let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
        async move {
            if count < 3 {
                Err(TestError::new("Transient failure", ErrorKind::Timeout))
            } else {
                Ok("Success")
            }
        }
    })
    .await;

    assert_eq!(result.expect("Should succeed"), "Success");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 4); // 3 failures + 1 success
}

/// Validates retry gives up after max attempts and re-raises the original
/// failure.
///
/// # Test Steps
/// 1. Configure 3 attempts with fixed backoff
/// 2. Simulate persistent failures
/// 3. Verify exactly 3 attempts were made
/// 4. Verify the propagated error is the operation's own failure, not a
///    synthetic wrapper
#[tokio::test(flavor = "multi_thread")]
async fn test_retry_max_attempts_exceeded() {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let attempt_count_clone = Arc::clone(&attempt_count);

    let policy = RetryPolicy::builder()
        .max_attempts(3)
        .fixed_backoff(Duration::from_millis(10))
        .jitter(false)
        .build()
        .expect("Failed to build policy");

    let result: Result<(), TestError> = retry_async(policy, || {
        attempt_count_clone.fetch_add(1, Ordering::SeqCst);
        async { Err(TestError::new("Persistent failure", ErrorKind::Connection)) }
    })
    .await;

    let error = result.expect_err("Should exhaust attempts");
    assert_eq!(error.message, "Persistent failure");
    assert_eq!(error.error_kind(), ErrorKind::Connection);
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
}

/// Validates selective retry classification by failure category.
///
/// # Test Steps
/// 1. Restrict retries to timeout failures
/// 2. Fail with a timeout - should retry and succeed
/// 3. Fail with a protocol error - should fail immediately without retry
#[tokio::test(flavor = "multi_thread")]
async fn test_retry_selective_classification() {
    let policy = RetryPolicy::builder()
        .max_attempts(5)
        .fixed_backoff(Duration::from_millis(5))
        .jitter(false)
        .retryable_kinds([ErrorKind::Timeout])
        .build()
        .expect("Failed to build policy");

    // Retryable kind recovers.
    let attempt_count = Arc::new(AtomicU32::new(0));
    let attempt_count_clone = Arc::clone(&attempt_count);
    let result = retry_async(policy.clone(), || {
        let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
        async move {
            if count < 2 {
                Err(TestError::new("slow", ErrorKind::Timeout))
            } else {
                Ok("Success")
            }
        }
    })
    .await;
    assert!(result.is_ok());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);

    // Non-retryable kind is invoked exactly once.
    let attempt_count = Arc::new(AtomicU32::new(0));
    let attempt_count_clone = Arc::clone(&attempt_count);
    let result: Result<(), TestError> = retry_async(policy, || {
        attempt_count_clone.fetch_add(1, Ordering::SeqCst);
        async { Err(TestError::new("malformed", ErrorKind::Protocol)) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
}

/// Validates the retry observer sees each consumed attempt, and that the
/// operation is called exactly max_attempts times on the success boundary.
///
/// # Test Steps
/// 1. Configure 3 attempts with an observer recording attempt numbers
/// 2. Fail twice, succeed on the third call
/// 3. Verify the observer fired exactly twice with attempts 1 and 2
#[tokio::test(flavor = "multi_thread")]
async fn test_retry_observer_sees_attempts() {
    let observed = Arc::new(Mutex::new(Vec::new()));
    let observed_clone = Arc::clone(&observed);

    let executor = RetryExecutor::builder()
        .max_attempts(3)
        .base_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(10))
        .backoff(BackoffKind::Fixed)
        .jitter(false)
        .on_retry(move |attempt, error| {
            if let Ok(mut seen) = observed_clone.lock() {
                seen.push((attempt, error.to_string()));
            }
        })
        .build()
        .expect("Failed to build executor");

    let attempt_count = Arc::new(AtomicU32::new(0));
    let attempt_count_clone = Arc::clone(&attempt_count);

    let result = executor
        .execute_async(|| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(TestError::new("flaky", ErrorKind::Connection))
                } else {
                    Ok(99)
                }
            }
        })
        .await;

    assert_eq!(result.expect("Should succeed"), 99);
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);

    let seen = observed.lock().expect("Observer log should be readable");
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], (1, "flaky".to_string()));
    assert_eq!(seen[1], (2, "flaky".to_string()));
}

/// Validates the executor sleeps exactly the capped delays the policy
/// computes, using the recording sleep instead of wall-clock waits.
///
/// # Test Steps
/// 1. Configure exponential backoff, base 1s, cap 5s, no jitter
/// 2. Exhaust 6 attempts against a persistent failure
/// 3. Verify the recorded delays are [1, 2, 4, 5, 5] seconds
#[tokio::test(flavor = "multi_thread")]
async fn test_retry_deterministic_delay_sequence() {
    let sleep = Arc::new(RecordingSleep::new());

    let executor = RetryExecutor::builder()
        .max_attempts(6)
        .exponential_backoff(Duration::from_secs(1), Duration::from_secs(5))
        .jitter(false)
        .async_sleep(sleep.clone())
        .build()
        .expect("Failed to build executor");

    let result: Result<(), TestError> = executor
        .execute_async(|| async { Err(TestError::new("down", ErrorKind::Server)) })
        .await;
    assert!(result.is_err());

    let slept: Vec<u64> = sleep.recorded().iter().map(Duration::as_secs).collect();
    assert_eq!(slept, vec![1, 2, 4, 5, 5]);
}

/// Validates the blocking execution path recovers on a plain OS thread with
/// no async runtime involved.
///
/// # Test Steps
/// 1. Build a blocking executor with fibonacci backoff
/// 2. Run it on a spawned thread against a twice-failing operation
/// 3. Verify recovery and attempt count
#[test]
fn test_retry_blocking_path_on_thread() {
    let policy = RetryPolicy::builder()
        .max_attempts(4)
        .fibonacci_backoff(Duration::from_millis(1), Duration::from_millis(20))
        .jitter(false)
        .build()
        .expect("Failed to build policy");

    let handle = std::thread::spawn(move || {
        let executor = RetryExecutor::new(policy);
        let calls = AtomicU32::new(0);
        let result = executor.execute(|| {
            let count = calls.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                Err(TestError::new("transient", ErrorKind::Timeout))
            } else {
                Ok(calls.load(Ordering::SeqCst))
            }
        });
        result.expect("Should recover")
    });

    assert_eq!(handle.join().expect("Thread should complete"), 3);
}

/// Validates status-based response retry against a recovering endpoint.
///
/// # Test Steps
/// 1. Treat 503 as retryable, 3 attempts
/// 2. Return 503 twice, then 200
/// 3. Verify the final response carries 200 after 3 calls
#[tokio::test(flavor = "multi_thread")]
async fn test_retry_on_response_status() {
    let executor = RetryExecutor::builder()
        .max_attempts(3)
        .fixed_backoff(Duration::from_millis(5))
        .jitter(false)
        .retryable_status_codes([503])
        .build()
        .expect("Failed to build executor");

    let attempt_count = Arc::new(AtomicU32::new(0));
    let attempt_count_clone = Arc::clone(&attempt_count);

    let response = executor
        .execute_response_async(|| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                let status = if count < 2 { 503 } else { 200 };
                Ok::<_, TestError>(TestResponse { status })
            }
        })
        .await;

    assert_eq!(response.expect("Should succeed").status, 200);
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
}

/// Validates the wrapper form rejects ambiguous configuration.
///
/// # Test Steps
/// 1. Supply both a whole policy and an individual override
/// 2. Verify the builder reports a configuration error
#[test]
fn test_retry_builder_conflict_is_configuration_error() {
    let policy = RetryPolicy::builder()
        .max_attempts(2)
        .build()
        .expect("Failed to build policy");

    let result = RetryExecutor::builder()
        .policy(policy)
        .jitter(false)
        .build();

    assert!(result.is_err(), "policy plus overrides must be rejected");
}
