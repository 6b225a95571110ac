//! Error types and failure classification for the resilience engine
//!
//! The engine introduces a small closed set of synthetic errors (circuit
//! open, queue full, acquire timeout, invalid configuration) and otherwise
//! passes operation failures through unchanged, so callers can pattern-match
//! on the original failure type. Classification of operation failures is
//! expressed through the [`ErrorClass`] capability trait rather than
//! downcasting, and response status checking through [`HasStatus`] rather
//! than runtime attribute probing.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Simple configuration error for validation
///
/// Raised eagerly at construction/builder time for invalid parameter
/// combinations; never raised mid-call.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The supplied configuration is invalid
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Description of the rejected parameter combination
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised by resource pool admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The bounded wait queue is already at capacity; the caller is rejected
    /// immediately instead of waiting.
    #[error("Pool wait queue is full ({capacity} queued waiters)")]
    QueueFull {
        /// Configured maximum queue size
        capacity: usize,
    },
}

/// Errors that can occur in resilience operations
///
/// Generic over the underlying operation error type `E` so the original
/// failure is preserved and remains matchable. Only the variants below are
/// synthesized by the engine itself.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit breaker is open, rejecting calls
    #[error("Circuit breaker is open, rejecting calls")]
    CircuitOpen,

    /// A permit could not be acquired before the timeout elapsed
    #[error("Timed out acquiring a pool permit after {timeout:?}")]
    AcquireTimeout {
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// The pool wait queue was at bounded capacity
    #[error("Pool wait queue is full ({capacity} queued waiters)")]
    QueueFull {
        /// Configured maximum queue size
        capacity: usize,
    },

    /// Configuration error detected at call time (e.g. execution mode does
    /// not match the bound pool type)
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Description of the mismatch
        message: String,
    },

    /// The underlying operation failed
    #[error("Operation failed")]
    OperationFailed {
        /// The original failure, unchanged
        #[source]
        source: E,
    },
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Extract the original operation failure, if this is one
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::OperationFailed { source } => Some(source),
            _ => None,
        }
    }

    /// Returns `true` when the engine rejected the call without invoking the
    /// wrapped operation.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::OperationFailed { .. })
    }
}

/// Boxed error type for configuration and simple errors
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Failure category tags used by retry classification
///
/// A [`RetryPolicy`](crate::retry::RetryPolicy) holds an optional set of
/// these tags; an operation error advertises its own tag through
/// [`ErrorClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The operation exceeded a deadline
    Timeout,
    /// Connection-level failure (refused, reset, broken pipe)
    Connection,
    /// The remote signalled throttling
    RateLimited,
    /// The remote failed internally
    Server,
    /// The exchange violated the expected protocol or data format
    Protocol,
    /// The operation was cancelled before completing
    Canceled,
    /// Anything that does not fit a more specific tag
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::RateLimited => write!(f, "rate_limited"),
            ErrorKind::Server => write!(f, "server"),
            ErrorKind::Protocol => write!(f, "protocol"),
            ErrorKind::Canceled => write!(f, "canceled"),
            ErrorKind::Other => write!(f, "other"),
        }
    }
}

/// Capability trait advertising an error's failure category
///
/// Implemented by operation error types so a retry policy can decide
/// retryability without knowing the concrete type.
pub trait ErrorClass {
    /// The failure category of this error
    fn error_kind(&self) -> ErrorKind;
}

/// Resilience errors classify themselves so wrapped layers compose with
/// retry: an operation failure keeps its own category, admission timeouts
/// read as timeouts, and queue-full rejections read as throttling.
impl<E> ErrorClass for ResilienceError<E>
where
    E: ErrorClass + std::error::Error + Send + Sync + 'static,
{
    fn error_kind(&self) -> ErrorKind {
        match self {
            Self::CircuitOpen => ErrorKind::Other,
            Self::AcquireTimeout { .. } => ErrorKind::Timeout,
            Self::QueueFull { .. } => ErrorKind::RateLimited,
            Self::InvalidConfiguration { .. } => ErrorKind::Other,
            Self::OperationFailed { source } => source.error_kind(),
        }
    }
}

impl ErrorClass for std::io::Error {
    fn error_kind(&self) -> ErrorKind {
        use std::io::ErrorKind as IoKind;
        match self.kind() {
            IoKind::TimedOut | IoKind::WouldBlock => ErrorKind::Timeout,
            IoKind::ConnectionRefused
            | IoKind::ConnectionReset
            | IoKind::ConnectionAborted
            | IoKind::NotConnected
            | IoKind::BrokenPipe => ErrorKind::Connection,
            IoKind::InvalidData => ErrorKind::Protocol,
            IoKind::Interrupted => ErrorKind::Canceled,
            _ => ErrorKind::Other,
        }
    }
}

/// Capability trait for responses that carry a status code
///
/// Replaces duck-typed "has a `.status` attribute" probing: a response type
/// that wants status-based retry implements this, returning `None` when no
/// status applies.
pub trait HasStatus {
    /// The status code of this response, if it carries one
    fn status(&self) -> Option<u16>;
}
