//! Error classification taxonomy and the typed error enums returned by each
//! component of the core. See spec §4.1 (classifier) and §7 (propagation).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The outcome of classifying an opaque failure value from an executor.
///
/// Classification is intentionally coarse: callers branch on `ErrorKind`,
/// never on the underlying executor's error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Api,
    RateLimit,
    Network,
    Auth,
    Validation,
    Timeout,
    Canceled,
    Unknown,
}

impl ErrorKind {
    /// Whether this kind is transient in the sense of spec §7 (retry-eligible
    /// by default, independent of any policy's explicit retryable set).
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Api | Self::RateLimit | Self::Network | Self::Timeout)
    }
}

/// Rate-limit hints extracted from an error by the classifier (spec §4.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitHint {
    /// Absolute instant (unix millis) at which the limit resets.
    pub reset_at_ms: Option<i64>,
    /// Seconds to wait before retrying, as reported by the server.
    pub retry_after_sec: Option<u64>,
    /// Remaining requests in the current window, if reported.
    pub remaining: Option<u64>,
    /// Total requests allowed in the current window, if reported.
    pub limit: Option<u64>,
}

/// Errors surfaced by the retry engine (C2).
#[derive(Debug, Error)]
pub enum RetryError {
    /// All attempts were exhausted; carries the last classified kind and message.
    #[error("retry exhausted after {attempts} attempt(s), last error ({kind:?}): {message}")]
    Exhausted {
        attempts: u32,
        kind: ErrorKind,
        message: String,
    },
    /// A second Auth failure occurred after a credential refresh was attempted.
    #[error("authentication failed after credential refresh: {0}")]
    AuthFailed(String),
    /// Validation failures are never retried; surfaced immediately.
    #[error("validation error: {0}")]
    Validation(String),
    /// The operation was canceled by the caller.
    #[error("operation canceled")]
    Canceled,
    /// The global retry time cap (5 minutes by default) was exceeded.
    #[error("retry time budget exceeded")]
    GlobalCapExceeded,
}

/// Errors surfaced by the circuit breaker (C3).
#[derive(Debug, Error)]
pub enum CircuitError {
    /// The breaker is Open and rejected the call outright.
    #[error("circuit open for executor '{executor}'")]
    Open { executor: String },
    /// The wrapped call exceeded `requestTimeout`.
    #[error("request to executor '{executor}' timed out")]
    RequestTimeout { executor: String },
    /// The wrapped call failed; carries the underlying message.
    #[error("call to executor '{executor}' failed: {message}")]
    CallFailed { executor: String, message: String },
}

/// Errors surfaced by the fallback engine (C4).
#[derive(Debug, Error)]
pub enum FallbackError {
    /// No fallback strategy is registered for this primary action.
    #[error("no fallback strategy for action '{0}'")]
    NoStrategy(String),
    /// Every fallback in the chain failed.
    #[error("all {attempted} fallback(s) for '{primary}' failed; last error: {last}")]
    ChainExhausted {
        primary: String,
        attempted: u32,
        last: String,
    },
}

/// Errors surfaced by the idempotency cache (C5).
#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("in-flight execution for key '{0}' failed")]
    InFlightFailed(String),
    #[error("canonicalization error: {0}")]
    Canonicalize(String),
}

/// Errors surfaced by the approval queue (C6).
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval request '{0}' not found")]
    NotFound(String),
    #[error("approval request '{0}' is not pending (status: {1:?})")]
    NotPending(String, ApprovalStatusKind),
    /// A feedback callback failed; logged, never surfaced to the decision caller.
    #[error("feedback callback failed: {0}")]
    FeedbackCallbackFailed(String),
}

/// Lightweight copy of `ApprovalStatus` for error messages (avoids a
/// types<->types circular doc dependency while keeping Debug output useful).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatusKind {
    Pending,
    Approved,
    Rejected,
    Expired,
    Executing,
    Completed,
    Failed,
}

/// Errors surfaced by the workflow runner (C7).
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("step '{0}' references unknown dependency '{1}'")]
    UnknownDependency(String, String),
    #[error("dependency cycle detected involving step '{0}'")]
    CycleDetected(String),
    #[error("step '{step}' has unmet dependency '{dependency}'")]
    DependencyUnmet { step: String, dependency: String },
    #[error("step '{step_id}' failed: {message}")]
    StepFailed { step_id: String, message: String },
    #[error("step '{0}' timed out")]
    StepTimeout(String),
    #[error("rollback incomplete: {failed:?} step(s) failed to undo; manual steps: {manual:?}")]
    RollbackIncomplete {
        failed: Vec<String>,
        manual: Vec<String>,
    },
    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),
    #[error("workflow has no steps")]
    Empty,
    #[error("operation canceled")]
    Canceled,
}

/// Errors surfaced by the rollback classifier/executor (C8).
#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("undo for step '{0}' timed out")]
    UndoTimeout(String),
    #[error("undo for step '{step}' failed: {message}")]
    UndoFailed { step: String, message: String },
}
