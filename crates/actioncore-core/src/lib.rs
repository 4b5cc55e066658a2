//! Reliability components: classify, retry, circuit breaker, fallback,
//! idempotency, approval, workflow, rollback, and metrics.

pub mod approval;
pub mod circuit;
pub mod classify;
pub mod event;
pub mod executor;
pub mod fallback;
pub mod idempotency;
pub mod metrics;
pub mod retry;
pub mod rollback;
pub mod workflow;

pub use approval::{
    ApprovalExecFuture, ApprovalExecutor, ApprovalFeedbackSink, ApprovalPolicy, ApprovalQueue,
    ApprovalTimeouts, NoopFeedbackSink,
};
pub use circuit::{CallOutcome, CircuitBreaker, CircuitConfig, CircuitStatusInfo};
pub use classify::{classify, extract_rate_limit, RawFailure};
pub use event::EventBus;
pub use executor::{BoxFuture, CredentialRefresh, DynCredentialRefresh, DynExecutor, Executor};
pub use fallback::{builtin, FallbackEngine, FallbackResult, FallbackStep, FallbackStrategy};
pub use idempotency::{generate_key, CheckResult, IdempotencyCache};
pub use metrics::{MetricsCollector, MetricsConfig};
pub use retry::{retry, NoopHooks, RetryAttemptInfo, RetryCall, RetryHooks, SuccessInfo, GLOBAL_CAP};
pub use rollback::{RollbackConfig, RollbackExecutor};
pub use workflow::{resolve_params, validate as validate_workflow, WorkflowRunner};
