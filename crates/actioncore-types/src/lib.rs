//! Shared domain types for the action orchestration core.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, uuid, chrono,
//! thiserror, schemars. Mirrors the error/classification taxonomy and data
//! model described in the core specification.

pub mod action;
pub mod approval;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod policy;
pub mod workflow;

pub use action::{ActionRequest, IdempotencyKey, IdempotencyRecord};
pub use approval::{
    ApprovalDecision, ApprovalFeedback, ApprovalRequest, ApprovalStatus, Priority, ReasoningResult,
    RiskLevel,
};
pub use config::{CoreConfig, FeatureFlags, NotificationTargets};
pub use error::{
    ApprovalError, ApprovalStatusKind, CircuitError, ErrorKind, FallbackError, IdempotencyError,
    RateLimitHint, RetryError, RollbackError, WorkflowError,
};
pub use event::{CircuitStatsSnapshot, CoreEvent};
pub use metrics::{MetricEntry, MetricsAggregate, RealtimeView, SubAggregate};
pub use policy::{BackoffStrategy, Policy, PolicyOverride};
pub use workflow::{
    ManualInterventionStep, RollbackClass, RollbackResult, RollbackSpec, StepResult, StepStatus,
    WorkflowContext, WorkflowDefinition, WorkflowExecution, WorkflowProgress, WorkflowRunStatus,
    WorkflowStep, workflow_step_schema,
};
