//! Executor error taxonomy.
//!
//! The consumer's retry loop classifies failures through this type:
//! parse and business errors never retry, transient errors consume an
//! attempt, contention errors reschedule the task without consuming an
//! attempt, and cluster-resource failures are surfaced by controller
//! callbacks.

use std::time::Duration;

/// A classified executor failure.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Malformed payload. Never retried.
    #[error("invalid payload: {0}")]
    Parse(String),

    /// Infrastructure hiccup (store, cluster API 5xx). Retried by the
    /// outer loop.
    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// A token or namespace was unavailable; the executor already
    /// re-queued the task with the given delay. Not counted as an
    /// attempt.
    #[error("resource contention, rescheduled in {0:?}")]
    Contention(Duration),

    /// The request is invalid against current persisted state (e.g.
    /// re-transitioning a non-initial injection row). Never retried.
    #[error("business rejection: {0}")]
    Business(String),

    /// A cluster resource ended in failure (not selected, not injected,
    /// not recovered).
    #[error("cluster resource failure: {0}")]
    ClusterResource(String),

    /// Index corruption or an impossible state.
    #[error("fatal internal error: {0}")]
    Fatal(String),
}

impl ExecError {
    /// Whether the outer retry loop should spend an attempt on this.
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether the executor already moved the task back into the queue.
    pub fn rescheduled(&self) -> bool {
        matches!(self, Self::Contention(_))
    }
}

/// Classify an `anyhow::Error` produced by an executor.
///
/// Typed `ExecError`s keep their classification; anything else is
/// treated as transient so infrastructure noise gets the retry budget.
pub fn classify(err: &anyhow::Error) -> Classified {
    match err.downcast_ref::<ExecError>() {
        Some(ExecError::Parse(_)) | Some(ExecError::Business(_)) => Classified::NoRetry,
        Some(ExecError::ClusterResource(_)) | Some(ExecError::Fatal(_)) => Classified::NoRetry,
        Some(ExecError::Contention(delay)) => Classified::Rescheduled(*delay),
        Some(ExecError::Transient(_)) | None => Classified::Retry,
    }
}

/// Retry-loop verdict for one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classified {
    Retry,
    NoRetry,
    Rescheduled(Duration),
}
