//! Error types for the dispatch engine.
//!
//! The taxonomy mirrors how failures flow through the engine:
//! - [`TransportError::Transient`] never reaches a caller; the task is silently
//!   resubmitted with backoff.
//! - [`TransportError::Fatal`] and task-level failures surface through the
//!   ticket's error channel as [`TaskError`].
//! - [`ConfigError`] is a fast-fail at build time, never retried.

use std::time::Duration;

/// Failure reported by the transport boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Connectivity-level failure (no route, reset connection, DNS). The engine
    /// retries these without completing the caller's ticket.
    #[error("transient connectivity failure: {0}")]
    Transient(String),
    /// The exchange failed in a way a retry cannot fix.
    #[error("transport failure: {0}")]
    Fatal(String),
}

impl TransportError {
    /// Check if this failure is retried silently by the dispatch loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Error surfaced through a ticket's error channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// The transport failed fatally.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The rejection payload of a throttled response could not be decoded.
    #[error("malformed rejection body: {0}")]
    MalformedRejection(String),
    /// The task body panicked on the worker thread.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// Application-level failure produced by the task itself.
    #[error("{0}")]
    App(String),
}

impl TaskError {
    /// Check if this error originated at the transport boundary.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Borrow the transport error if present.
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors produced while validating engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The assumed-bucket token budget must admit at least one request.
    #[error("assumed_budget must be >= 1 (got {0})")]
    InvalidAssumedBudget(i64),
    /// The overflow threshold must allow at least one queued task.
    #[error("overflow_threshold must be >= 1 (got {0})")]
    InvalidOverflowThreshold(usize),
    /// Retry backoff bounds must be non-zero and ordered.
    #[error("retry backoff must satisfy 0 < base <= max (got base {base:?}, max {max:?})")]
    InvalidRetryBackoff { base: Duration, max: Duration },
    /// The worker idle wait must be non-zero so shutdown stays responsive.
    #[error("idle_wait must be > 0")]
    InvalidIdleWait,
    /// The timer runtime or the dispatch worker thread could not be started.
    #[error("failed to start engine runtime: {0}")]
    Runtime(String),
    /// The engine cannot be built without a transport.
    #[error("a transport is required")]
    MissingTransport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_predicate() {
        let e = TransportError::Transient("connection reset".into());
        assert!(e.is_transient());
        let e = TransportError::Fatal("tls handshake rejected".into());
        assert!(!e.is_transient());
    }

    #[test]
    fn task_error_wraps_transport() {
        let e = TaskError::from(TransportError::Fatal("boom".into()));
        assert!(e.is_transport());
        assert!(e.as_transport().is_some());
        assert_eq!(e.to_string(), "transport failure: boom");
    }

    #[test]
    fn config_error_display() {
        let e = ConfigError::InvalidAssumedBudget(0);
        assert!(e.to_string().contains(">= 1"));
        let e = ConfigError::InvalidRetryBackoff {
            base: Duration::from_secs(2),
            max: Duration::from_secs(1),
        };
        assert!(e.to_string().contains("base"));
    }
}
