//! The single event enum broadcast across every component boundary (spec §6).
//!
//! Modeled directly on the teacher's `AgentEvent`: one internally-tagged enum,
//! `snake_case` variant tags, a stable accessor for the identifier callers
//! most often want to key a subscription on.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approval::{ApprovalFeedback, ApprovalRequest};
use crate::workflow::WorkflowProgress;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitStatsSnapshot {
    pub executor: String,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    ActionRequiresApproval {
        request: ApprovalRequest,
    },
    ApprovalQueued {
        request: ApprovalRequest,
    },
    ApprovalDecided {
        request: ApprovalRequest,
    },
    ApprovalExecuting {
        request: ApprovalRequest,
    },
    ApprovalCompleted {
        request: ApprovalRequest,
    },
    ApprovalFailed {
        request: ApprovalRequest,
    },
    ApprovalExpired {
        request: ApprovalRequest,
    },
    CircuitOpened {
        executor: String,
        stats: CircuitStatsSnapshot,
    },
    CircuitClosed {
        executor: String,
        stats: CircuitStatsSnapshot,
    },
    CircuitHalfOpen {
        executor: String,
        stats: CircuitStatsSnapshot,
    },
    RequestSuccess {
        executor: String,
        latency_ms: u64,
    },
    RequestFailure {
        executor: String,
        error: String,
    },
    RequestRejected {
        executor: String,
        reason: String,
    },
    FallbackUsed {
        executor: String,
    },
    WorkflowStarted {
        workflow_id: Uuid,
    },
    WorkflowProgressed {
        workflow_id: Uuid,
        progress: WorkflowProgress,
    },
    WorkflowCompleted {
        workflow_id: Uuid,
    },
    WorkflowFailed {
        workflow_id: Uuid,
        error: String,
    },
    StepStarted {
        workflow_id: Uuid,
        step_id: String,
    },
    StepCompleted {
        workflow_id: Uuid,
        step_id: String,
        latency_ms: u64,
    },
    StepFailed {
        workflow_id: Uuid,
        step_id: String,
        error: String,
    },
    RollbackStarted {
        workflow_id: Uuid,
    },
    RollbackCompleted {
        workflow_id: Uuid,
        success: bool,
    },
    LearningFeedback {
        feedback: ApprovalFeedback,
    },
}

impl CoreEvent {
    /// The workflow this event belongs to, if any -- useful for subscribers
    /// that only care about one run.
    pub fn workflow_id(&self) -> Option<Uuid> {
        match self {
            Self::WorkflowStarted { workflow_id }
            | Self::WorkflowProgressed { workflow_id, .. }
            | Self::WorkflowCompleted { workflow_id }
            | Self::WorkflowFailed { workflow_id, .. }
            | Self::StepStarted { workflow_id, .. }
            | Self::StepCompleted { workflow_id, .. }
            | Self::StepFailed { workflow_id, .. }
            | Self::RollbackStarted { workflow_id }
            | Self::RollbackCompleted { workflow_id, .. } => Some(*workflow_id),
            _ => None,
        }
    }
}
