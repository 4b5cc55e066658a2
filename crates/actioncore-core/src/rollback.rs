//! Rollback classifier and executor (C8): undoes Completed steps in reverse
//! order when a workflow run fails and `rollbackOnFailure` is set, using each
//! step's declared `rollback` spec or falling back to a classification table
//! (spec §4.8).

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use actioncore_types::{
    ManualInterventionStep, RollbackClass, RollbackError, RollbackResult, StepResult, StepStatus,
    WorkflowDefinition, WorkflowExecution, WorkflowStep,
};
use serde_json::Value;
use tracing::warn;

use crate::event::EventBus;

#[derive(Debug, Clone)]
pub struct RollbackConfig {
    /// Per-action overrides for the default classification rules below.
    pub overrides: HashMap<String, RollbackClass>,
    pub skip_non_reversible: bool,
    pub require_confirmation: bool,
    pub stop_on_failure: bool,
    pub timeout_per_action: Duration,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            skip_non_reversible: false,
            require_confirmation: false,
            stop_on_failure: false,
            timeout_per_action: Duration::from_secs(30),
        }
    }
}

/// Default classification for actions with no explicit `rollback` spec and
/// no entry in `RollbackConfig::overrides` (spec §4.8's non-exhaustive
/// defaults, kept deliberately conservative: anything unrecognized is
/// `NonReversible`).
fn classify(action: &str, overrides: &HashMap<String, RollbackClass>) -> RollbackClass {
    if let Some(class) = overrides.get(action) {
        return *class;
    }
    let lower = action.to_ascii_lowercase();
    if lower.contains("create") {
        RollbackClass::Reversible
    } else if lower.contains("upload") || lower.contains("file") {
        RollbackClass::ConfirmationRequired
    } else if lower.contains("append") || lower.contains("update") {
        RollbackClass::PartiallyReversible
    } else {
        RollbackClass::NonReversible
    }
}

enum StepOutcome {
    RolledBack,
    Skipped,
    Manual(ManualInterventionStep),
    Failed(String),
}

pub struct RollbackExecutor {
    config: RollbackConfig,
    #[allow(dead_code)]
    events: EventBus,
}

impl RollbackExecutor {
    pub fn new(config: RollbackConfig, events: EventBus) -> Self {
        Self { config, events }
    }

    /// Public view of the classification table, used by the workflow runner
    /// to decide whether a step needs its pre-execution state captured
    /// before it runs (spec §4.8: partial undo needs the prior value).
    pub(crate) fn classify_action(&self, action: &str) -> RollbackClass {
        classify(action, &self.config.overrides)
    }

    /// Undo every Completed step in `execution`, most-recent-first. `invoke`
    /// performs one undo call through the target's executor; it is not run
    /// through the retry/circuit stack -- an undo either lands within
    /// `timeoutPerAction` or is reported as failed/manual.
    pub async fn rollback<F, Fut>(
        &self,
        def: &WorkflowDefinition,
        execution: &WorkflowExecution,
        invoke: F,
    ) -> RollbackResult
    where
        F: Fn(&str, &str, &Value) -> Fut,
        Fut: Future<Output = Result<Value, String>>,
    {
        let start = Instant::now();
        let mut rolled_back = Vec::new();
        let mut failed = Vec::new();
        let mut manual_intervention_actions = Vec::new();
        let mut manual_steps = Vec::new();

        let completed: Vec<&StepResult> = execution
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .collect();

        for step_result in completed.into_iter().rev() {
            let Some(step) = def.steps.iter().find(|s| s.id == step_result.step_id) else {
                continue;
            };

            match self.rollback_step(step, step_result, &invoke).await {
                StepOutcome::RolledBack => rolled_back.push(step.id.clone()),
                StepOutcome::Skipped => {}
                StepOutcome::Manual(manual) => {
                    manual_intervention_actions.push(step.action.clone());
                    manual_steps.push(manual);
                }
                StepOutcome::Failed(error) => {
                    warn!(step = step.id, error, "rollback step failed");
                    failed.push(step.id.clone());
                    if self.config.stop_on_failure {
                        break;
                    }
                }
            }
        }

        RollbackResult {
            success: failed.is_empty(),
            rolled_back,
            failed,
            manual_intervention_actions,
            manual_steps,
            duration: start.elapsed().as_millis() as u64,
        }
    }

    async fn rollback_step<F, Fut>(&self, step: &WorkflowStep, step_result: &StepResult, invoke: &F) -> StepOutcome
    where
        F: Fn(&str, &str, &Value) -> Fut,
        Fut: Future<Output = Result<Value, String>>,
    {
        if let Some(spec) = &step.rollback {
            return self.run_undo(&step.id, &spec.target, &spec.action, &spec.params, invoke).await;
        }

        match classify(&step.action, &self.config.overrides) {
            RollbackClass::NonReversible => {
                if self.config.skip_non_reversible {
                    StepOutcome::Skipped
                } else {
                    StepOutcome::Manual(self.manual_step(step, "this action cannot be automatically undone"))
                }
            }
            RollbackClass::ConfirmationRequired if self.config.require_confirmation => {
                StepOutcome::Manual(self.manual_step(step, "undo requires operator confirmation before proceeding"))
            }
            RollbackClass::Reversible | RollbackClass::ConfirmationRequired => match extract_id(step_result) {
                Some(id) => {
                    self.run_undo(&step.id, &step.target, "delete", &serde_json::json!({ "id": id }), invoke)
                        .await
                }
                None => StepOutcome::Manual(self.manual_step(step, "no id was captured to delete")),
            },
            RollbackClass::PartiallyReversible => match &step_result.previous_value {
                Some(previous) => {
                    self.run_undo(&step.id, &step.target, "restore", previous, invoke).await
                }
                None => StepOutcome::Manual(self.manual_step(
                    step,
                    "partial undo requires the previous value, which was not captured",
                )),
            },
        }
    }

    async fn run_undo<F, Fut>(
        &self,
        step_id: &str,
        target: &str,
        action: &str,
        params: &Value,
        invoke: &F,
    ) -> StepOutcome
    where
        F: Fn(&str, &str, &Value) -> Fut,
        Fut: Future<Output = Result<Value, String>>,
    {
        match tokio::time::timeout(self.config.timeout_per_action, invoke(target, action, params)).await {
            Ok(Ok(_)) => StepOutcome::RolledBack,
            Ok(Err(message)) => {
                StepOutcome::Failed(RollbackError::UndoFailed { step: step_id.to_string(), message }.to_string())
            }
            Err(_) => StepOutcome::Failed(RollbackError::UndoTimeout(step_id.to_string()).to_string()),
        }
    }

    fn manual_step(&self, step: &WorkflowStep, advisory: &str) -> ManualInterventionStep {
        let get_str = |k: &str| step.params.get(k).and_then(Value::as_str).map(String::from);
        ManualInterventionStep {
            step_id: step.id.clone(),
            action: step.action.clone(),
            advisory: advisory.to_string(),
            channel: get_str("channel"),
            recipient: get_str("recipient"),
            message_excerpt: get_str("message").map(|s| s.chars().take(200).collect()),
            webhook_url: get_str("webhookUrl"),
        }
    }
}

fn extract_id(step_result: &StepResult) -> Option<String> {
    step_result.result.as_ref()?.as_object()?.get("id")?.as_str().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actioncore_types::{RollbackSpec, StepStatus, WorkflowContext};
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    fn def_with(steps: Vec<WorkflowStep>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::nil(),
            name: "w".into(),
            steps,
            rollback_on_failure: true,
            continue_on_optional_failure: false,
        }
    }

    fn completed_result(step_id: &str, result: Value) -> StepResult {
        completed_result_with_previous(step_id, result, None)
    }

    fn completed_result_with_previous(step_id: &str, result: Value, previous_value: Option<Value>) -> StepResult {
        StepResult {
            step_id: step_id.into(),
            status: StepStatus::Completed,
            start_time: Some(Utc::now()),
            end_time: Some(Utc::now()),
            result: Some(result),
            error: None,
            rolled_back: None,
            previous_value,
        }
    }

    fn step(id: &str, action: &str, rollback: Option<RollbackSpec>) -> WorkflowStep {
        WorkflowStep {
            id: id.into(),
            name: id.into(),
            action: action.into(),
            target: "trello".into(),
            params: serde_json::json!({}),
            optional: None,
            retry_count: None,
            timeout: None,
            depends_on: None,
            rollback,
        }
    }

    #[tokio::test]
    async fn scenario_s5_rollback_undoes_completed_steps_in_reverse() {
        let steps = vec![
            step("create_card", "trello:create_card", None),
            step("notify", "slack:send_message", None),
        ];
        let def = def_with(steps);
        let execution = WorkflowExecution {
            workflow_id: def.id,
            status: actioncore_types::WorkflowRunStatus::Failed,
            steps: vec![
                completed_result("create_card", serde_json::json!({"id": "card1"})),
                completed_result("notify", serde_json::json!({"ok": true})),
            ],
            context: WorkflowContext::default(),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
        };

        let undo_calls: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let calls = undo_calls.clone();
        let executor = RollbackExecutor::new(RollbackConfig::default(), EventBus::new(16));

        let result = executor
            .rollback(&def, &execution, |target, action, _params| {
                calls.lock().unwrap().push(format!("{target}:{action}"));
                async move { Ok(Value::Null) }
            })
            .await;

        assert_eq!(*undo_calls.lock().unwrap(), vec!["trello:delete".to_string()]);
        assert_eq!(result.rolled_back, vec!["create_card".to_string()]);
        assert_eq!(result.manual_intervention_actions, vec!["slack:send_message".to_string()]);
        assert_eq!(result.manual_steps.len(), 1);
    }

    #[tokio::test]
    async fn declared_rollback_spec_is_used_over_classifier() {
        let spec = RollbackSpec {
            action: "trello:delete_card".into(),
            target: "trello".into(),
            params: serde_json::json!({"cardId": "card1"}),
        };
        let steps = vec![step("create_card", "trello:create_card", Some(spec))];
        let def = def_with(steps);
        let execution = WorkflowExecution {
            workflow_id: def.id,
            status: actioncore_types::WorkflowRunStatus::Failed,
            steps: vec![completed_result("create_card", serde_json::json!({"id": "card1"}))],
            context: WorkflowContext::default(),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
        };

        let called = Arc::new(AtomicU32::new(0));
        let called_clone = called.clone();
        let executor = RollbackExecutor::new(RollbackConfig::default(), EventBus::new(16));

        let result = executor
            .rollback(&def, &execution, move |_target, action, _params| {
                assert_eq!(action, "trello:delete_card");
                called_clone.fetch_add(1, Ordering::SeqCst);
                async move { Ok(Value::Null) }
            })
            .await;

        assert_eq!(called.load(Ordering::SeqCst), 1);
        assert_eq!(result.rolled_back, vec!["create_card".to_string()]);
    }

    #[tokio::test]
    async fn partially_reversible_step_restores_captured_previous_value() {
        let steps = vec![step("append_row", "sheets:append_row", None)];
        let def = def_with(steps);
        let execution = WorkflowExecution {
            workflow_id: def.id,
            status: actioncore_types::WorkflowRunStatus::Failed,
            steps: vec![completed_result_with_previous(
                "append_row",
                serde_json::json!({"ok": true}),
                Some(serde_json::json!({"rows": ["a", "b"]})),
            )],
            context: WorkflowContext::default(),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
        };

        let undo_calls: Arc<std::sync::Mutex<Vec<(String, String, Value)>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let calls = undo_calls.clone();
        let executor = RollbackExecutor::new(RollbackConfig::default(), EventBus::new(16));

        let result = executor
            .rollback(&def, &execution, |target, action, params| {
                calls.lock().unwrap().push((target.to_string(), action.to_string(), params.clone()));
                async move { Ok(Value::Null) }
            })
            .await;

        let recorded = undo_calls.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "trello");
        assert_eq!(recorded[0].1, "restore");
        assert_eq!(recorded[0].2, serde_json::json!({"rows": ["a", "b"]}));
        assert_eq!(result.rolled_back, vec!["append_row".to_string()]);
    }

    #[tokio::test]
    async fn partially_reversible_step_without_previous_value_goes_manual() {
        let steps = vec![step("append_row", "sheets:append_row", None)];
        let def = def_with(steps);
        let execution = WorkflowExecution {
            workflow_id: def.id,
            status: actioncore_types::WorkflowRunStatus::Failed,
            steps: vec![completed_result("append_row", serde_json::json!({"ok": true}))],
            context: WorkflowContext::default(),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
        };

        let executor = RollbackExecutor::new(RollbackConfig::default(), EventBus::new(16));
        let result = executor
            .rollback(&def, &execution, |_target, _action, _params| async move { Ok(Value::Null) })
            .await;

        assert_eq!(result.manual_intervention_actions, vec!["sheets:append_row".to_string()]);
        assert_eq!(result.manual_steps.len(), 1);
    }

    #[test]
    fn classify_matches_defaults() {
        let overrides = HashMap::new();
        assert_eq!(classify("trello:create_card", &overrides), RollbackClass::Reversible);
        assert_eq!(classify("s3:upload_file", &overrides), RollbackClass::ConfirmationRequired);
        assert_eq!(classify("sheets:append_row", &overrides), RollbackClass::PartiallyReversible);
        assert_eq!(classify("slack:send_message", &overrides), RollbackClass::NonReversible);
    }
}
