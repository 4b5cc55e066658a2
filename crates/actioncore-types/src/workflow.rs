//! Workflow definition and execution data model (spec §3, §4.7, §4.8).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// An undo action declared alongside a step, used instead of the classifier
/// lookup when present (spec §4.8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RollbackSpec {
    pub action: String,
    pub target: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowStep {
    /// Unique within the owning `WorkflowDefinition`.
    pub id: String,
    pub name: String,
    pub action: String,
    pub target: String,
    /// May contain `"$stepId.path"` / `"$X"` references resolved at run time.
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<HashSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackSpec>,
}

impl WorkflowStep {
    pub fn is_optional(&self) -> bool {
        self.optional.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub rollback_on_failure: bool,
    #[serde(default)]
    pub continue_on_optional_failure: bool,
}

/// JSON Schema for a single workflow step, generated the same way the
/// teacher generates a schema for its own structured turn format. Scoped to
/// `WorkflowStep` rather than the whole `WorkflowDefinition` since `id` is a
/// `Uuid`, which needs an extra schemars integration feature the teacher's
/// `Cargo.toml` doesn't enable.
pub fn workflow_step_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(WorkflowStep)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    RolledBack,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back: Option<bool>,
    /// State read back from the target before the step ran, captured for
    /// partially-reversible actions that need a value to restore on undo
    /// (spec §4.8). `None` when the step's rollback class doesn't need it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<Value>,
}

impl StepResult {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            start_time: None,
            end_time: None,
            result: None,
            error: None,
            rolled_back: None,
            previous_value: None,
        }
    }
}

/// The mutable execution context threaded through a running workflow
/// (spec §4.7: `{results = {}, metadata}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub results: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: Uuid,
    pub status: WorkflowRunStatus,
    pub steps: Vec<StepResult>,
    pub context: WorkflowContext,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Aggregated progress reported with `workflow:progress` (spec §4.7 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub current_step: usize,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub percent_complete: f64,
}

/// How a given action classifies for rollback purposes (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackClass {
    Reversible,
    PartiallyReversible,
    ConfirmationRequired,
    NonReversible,
}

/// A human-actionable step the rollback executor could not perform itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualInterventionStep {
    pub step_id: String,
    pub action: String,
    pub advisory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    pub rolled_back: Vec<String>,
    pub failed: Vec<String>,
    pub manual_intervention_actions: Vec<String>,
    pub manual_steps: Vec<ManualInterventionStep>,
    /// Milliseconds.
    pub duration: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_schema_generates_and_serializes() {
        let schema = workflow_step_schema();
        let json = serde_json::to_value(&schema).expect("step schema serialization should not fail");
        assert!(json.get("properties").is_some());
    }

    #[test]
    fn step_is_optional_defaults_false() {
        let step = WorkflowStep {
            id: "a".into(),
            name: "A".into(),
            action: "trello:create_card".into(),
            target: "trello".into(),
            params: serde_json::json!({}),
            optional: None,
            retry_count: None,
            timeout: None,
            depends_on: None,
            rollback: None,
        };
        assert!(!step.is_optional());
    }

    #[test]
    fn workflow_definition_round_trips_through_yaml() {
        let def = WorkflowDefinition {
            id: Uuid::nil(),
            name: "onboarding".into(),
            steps: vec![WorkflowStep {
                id: "create".into(),
                name: "Create task".into(),
                action: "trello:create_card".into(),
                target: "trello".into(),
                params: serde_json::json!({"name": "Review"}),
                optional: Some(false),
                retry_count: Some(2),
                timeout: Some(5000),
                depends_on: None,
                rollback: None,
            }],
            rollback_on_failure: true,
            continue_on_optional_failure: false,
        };
        let yaml = serde_yaml_ng::to_string(&def).unwrap();
        let back: WorkflowDefinition = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back, def);
    }
}
