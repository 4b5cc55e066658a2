//! Workflow runner (C7): strictly sequential step execution over a
//! dependency-validated definition, with `$ref` parameter resolution and
//! rollback hand-off on failure (spec §4.7).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actioncore_types::{
    ActionRequest, CoreEvent, Policy, RollbackClass, StepResult, StepStatus, WorkflowContext,
    WorkflowDefinition, WorkflowError, WorkflowExecution, WorkflowProgress, WorkflowRunStatus,
};
use chrono::Utc;
use dashmap::DashMap;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::circuit::CircuitBreaker;
use crate::event::EventBus;
use crate::executor::{DynCredentialRefresh, DynExecutor};
use crate::idempotency::IdempotencyCache;
use crate::retry::{retry, NoopHooks, RetryCall};
use crate::rollback::{RollbackConfig, RollbackExecutor};

/// How long a step's result is remembered by the idempotency cache once it
/// succeeds. Workflows are short-lived compared to signal-triggered single
/// actions, so a conservative fixed TTL (rather than a per-step override) is
/// enough to cover re-delivery of the same workflow run.
const STEP_IDEMPOTENCY_TTL: Duration = Duration::from_secs(3600);

/// Validate step-id uniqueness, unknown dependency references, and dependency
/// cycles (spec §4.7 invariant: `dependsOn` ids must be earlier in order and
/// all Completed before a dependent step begins -- this checks the static
/// half of that; the runtime half is enforced during execution).
pub fn validate(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.steps.is_empty() {
        return Err(WorkflowError::Empty);
    }

    let mut seen = std::collections::HashSet::new();
    for step in &def.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(WorkflowError::DuplicateStepId(step.id.clone()));
        }
    }

    let mut graph = DiGraph::<&str, ()>::new();
    let mut indices = HashMap::new();
    for step in &def.steps {
        indices.insert(step.id.as_str(), graph.add_node(step.id.as_str()));
    }
    for step in &def.steps {
        if let Some(deps) = &step.depends_on {
            for dep in deps {
                let Some(&dep_idx) = indices.get(dep.as_str()) else {
                    return Err(WorkflowError::UnknownDependency(step.id.clone(), dep.clone()));
                };
                graph.add_edge(dep_idx, indices[step.id.as_str()], ());
            }
        }
    }

    if let Err(cycle) = toposort(&graph, None) {
        let node = graph[cycle.node_id()];
        return Err(WorkflowError::CycleDetected(node.to_string()));
    }

    Ok(())
}

/// Resolve `$X` / `$step.path.to.field` references against the running
/// context (spec §4.7c). Unresolvable references are left as the literal
/// string.
pub fn resolve_params(params: &Value, context: &WorkflowContext) -> Value {
    match params {
        Value::String(s) => {
            if let Some(rest) = s.strip_prefix('$') {
                resolve_reference(rest, context).unwrap_or_else(|| params.clone())
            } else {
                params.clone()
            }
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_params(v, context)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_params(v, context)).collect()),
        other => other.clone(),
    }
}

fn resolve_reference(path: &str, context: &WorkflowContext) -> Option<Value> {
    if let Some((step_id, rest)) = path.split_once('.') {
        if let Some(root) = context.results.get(step_id) {
            if let Some(value) = descend(root, rest) {
                return Some(value);
            }
        }
    }
    if let Some(value) = context.results.get(path) {
        return Some(value.clone());
    }
    context.metadata.as_object().and_then(|m| m.get(path)).cloned()
}

fn descend(value: &Value, dotted_path: &str) -> Option<Value> {
    let mut current = value;
    for segment in dotted_path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

fn find_status(steps: &[StepResult], step_id: &str) -> Option<StepStatus> {
    steps.iter().find(|s| s.step_id == step_id).map(|s| s.status)
}

pub struct WorkflowRunner {
    executors: DashMap<String, Arc<dyn DynExecutor>>,
    credential_refreshes: DashMap<String, Arc<dyn DynCredentialRefresh>>,
    circuit: Arc<CircuitBreaker>,
    idempotency: Arc<IdempotencyCache>,
    default_policy: Policy,
    policies: DashMap<String, Policy>,
    events: EventBus,
    rollback: RollbackExecutor,
    rate_limit_buffer_ms: u64,
}

impl WorkflowRunner {
    pub fn new(
        circuit: Arc<CircuitBreaker>,
        idempotency: Arc<IdempotencyCache>,
        default_policy: Policy,
        events: EventBus,
        rollback_config: RollbackConfig,
    ) -> Self {
        Self {
            executors: DashMap::new(),
            credential_refreshes: DashMap::new(),
            circuit,
            idempotency,
            default_policy,
            policies: DashMap::new(),
            events: events.clone(),
            rollback: RollbackExecutor::new(rollback_config, events),
            rate_limit_buffer_ms: crate::retry::DEFAULT_RATE_LIMIT_BUFFER_MS,
        }
    }

    /// Overrides the rate-limit delay buffer (spec §9), normally sourced from
    /// `CoreConfig::rate_limit_buffer_sec`.
    pub fn with_rate_limit_buffer_ms(mut self, rate_limit_buffer_ms: u64) -> Self {
        self.rate_limit_buffer_ms = rate_limit_buffer_ms;
        self
    }

    pub fn register_executor(&self, target: impl Into<String>, executor: Arc<dyn DynExecutor>) {
        self.executors.insert(target.into(), executor);
    }

    pub fn register_credential_refresh(&self, target: impl Into<String>, refresher: Arc<dyn DynCredentialRefresh>) {
        self.credential_refreshes.insert(target.into(), refresher);
    }

    pub fn configure_policy(&self, target: impl Into<String>, policy: Policy) {
        self.policies.insert(target.into(), policy);
    }

    async fn invoke(&self, target: &str, action: &str, params: &Value) -> Result<Value, String> {
        let executor = self
            .executors
            .get(target)
            .map(|e| e.clone())
            .ok_or_else(|| format!("no executor registered for target '{target}'"))?;
        executor
            .execute(action, params)
            .await
            .map_err(|failure| failure.message)
    }

    /// Runs one step through `idempotency -> circuit breaker -> retry ->
    /// executor`, the stacking order spec §4.7d mandates, racing the whole
    /// chain against `step_timeout_ms` as a single unit (spec §4.7 step 4d:
    /// the step timer bounds the full call, not one retry attempt). When
    /// `capture_previous` is set, reads the target's current state before
    /// the step runs so a later partial rollback has something to restore.
    async fn execute_step_once(
        &self,
        req: &ActionRequest,
        step_timeout_ms: Option<u64>,
        capture_previous: bool,
        cancel: &CancellationToken,
    ) -> Result<(Value, Option<Value>), String> {
        let target = req.target.clone();
        let action = req.action.clone();
        let policy = self
            .policies
            .get(&target)
            .map(|p| p.clone())
            .unwrap_or_else(|| self.default_policy.clone());
        let refresher = self.credential_refreshes.get(&target).map(|r| r.clone());

        let previous_value = if capture_previous {
            self.invoke(&target, "read", &req.params).await.ok()
        } else {
            None
        };

        let attempt = self.idempotency.execute_once(req, STEP_IDEMPOTENCY_TTL, || async {
            let outcome = self
                .circuit
                .call(&target, || async {
                    let executor = self
                        .executors
                        .get(&target)
                        .map(|e| e.clone())
                        .ok_or_else(|| format!("no executor registered for target '{target}'"))?;

                    let call = RetryCall {
                        platform: &target,
                        operation: &action,
                        policy: &policy,
                        credential_refresh: refresher.as_deref(),
                        hooks: &NoopHooks,
                        cancel,
                        rate_limit_buffer_ms: self.rate_limit_buffer_ms,
                    };

                    retry(&call, || executor.execute(&action, &req.params))
                        .await
                        .map_err(|e| e.to_string())
                })
                .await
                .map_err(|e| e.to_string())?;
            Ok(outcome.value)
        });

        let result = match step_timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), attempt).await {
                Ok(inner) => inner.map_err(|e| e.to_string()),
                Err(_) => Err("step timed out".to_string()),
            },
            None => attempt.await.map_err(|e| e.to_string()),
        };

        result.map(|value| (value, previous_value))
    }

    /// Run `def` to completion, driving rollback on failure when
    /// `rollback_on_failure` is set. Returns the execution record and, if a
    /// rollback was attempted, its result.
    pub async fn run(
        &self,
        def: &WorkflowDefinition,
        initial_metadata: Value,
        cancel: &CancellationToken,
    ) -> Result<(WorkflowExecution, Option<actioncore_types::RollbackResult>), WorkflowError> {
        validate(def)?;

        let mut context = WorkflowContext {
            results: HashMap::new(),
            metadata: initial_metadata,
        };
        let mut steps: Vec<StepResult> = def.steps.iter().map(|s| StepResult::pending(&s.id)).collect();
        let started_at = Utc::now();
        self.events.publish(CoreEvent::WorkflowStarted { workflow_id: def.id });

        let mut failure_reason: Option<String> = None;

        for (idx, step) in def.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                steps[idx].status = StepStatus::Failed;
                steps[idx].error = Some("canceled".to_string());
                failure_reason = Some("canceled".to_string());
                break;
            }

            if let Some(deps) = &step.depends_on {
                let unmet = deps
                    .iter()
                    .find(|d| !matches!(find_status(&steps, d), Some(StepStatus::Completed)));
                if let Some(dep) = unmet {
                    if step.is_optional() {
                        steps[idx].status = StepStatus::Skipped;
                        continue;
                    }
                    steps[idx].status = StepStatus::Failed;
                    steps[idx].error = Some(format!("unmet dependency '{dep}'"));
                    failure_reason = Some(format!("step '{}' has unmet dependency '{dep}'", step.id));
                    break;
                }
            }

            self.events.publish(CoreEvent::StepStarted {
                workflow_id: def.id,
                step_id: step.id.clone(),
            });
            steps[idx].status = StepStatus::Executing;
            steps[idx].start_time = Some(Utc::now());

            let resolved = resolve_params(&step.params, &context);
            let req = ActionRequest {
                action: step.action.clone(),
                target: step.target.clone(),
                params: resolved,
                correlation_id: def.id.to_string(),
                signal_id: None,
            };
            let capture_previous = step.rollback.is_none()
                && self.rollback.classify_action(&step.action) == RollbackClass::PartiallyReversible;
            let mut remaining_retries = step.retry_count.unwrap_or(0);
            let mut previous_value = None;
            let outcome = loop {
                let result = self.execute_step_once(&req, step.timeout, capture_previous, cancel).await;
                match result {
                    Ok((value, prev)) => {
                        previous_value = prev;
                        break Ok(value);
                    }
                    Err(message) => {
                        if remaining_retries > 0 {
                            remaining_retries -= 1;
                            warn!(step = step.id, "step failed, retrying");
                            continue;
                        }
                        break Err(message);
                    }
                }
            };

            steps[idx].previous_value = previous_value;
            steps[idx].end_time = Some(Utc::now());
            match outcome {
                Ok(value) => {
                    steps[idx].status = StepStatus::Completed;
                    steps[idx].result = Some(value.clone());
                    context.results.insert(step.id.clone(), value);
                    self.events.publish(CoreEvent::StepCompleted {
                        workflow_id: def.id,
                        step_id: step.id.clone(),
                        latency_ms: (Utc::now() - steps[idx].start_time.unwrap()).num_milliseconds().max(0) as u64,
                    });
                }
                Err(message) => {
                    if step.is_optional() && def.continue_on_optional_failure {
                        steps[idx].status = StepStatus::Failed;
                        steps[idx].error = Some(message.clone());
                        self.events.publish(CoreEvent::StepFailed {
                            workflow_id: def.id,
                            step_id: step.id.clone(),
                            error: message,
                        });
                    } else {
                        steps[idx].status = StepStatus::Failed;
                        steps[idx].error = Some(message.clone());
                        self.events.publish(CoreEvent::StepFailed {
                            workflow_id: def.id,
                            step_id: step.id.clone(),
                            error: message.clone(),
                        });
                        failure_reason = Some(format!("step '{}' failed: {message}", step.id));
                        break;
                    }
                }
            }

            let completed = steps.iter().filter(|s| s.status == StepStatus::Completed).count();
            let failed = steps.iter().filter(|s| s.status == StepStatus::Failed).count();
            self.events.publish(CoreEvent::WorkflowProgressed {
                workflow_id: def.id,
                progress: WorkflowProgress {
                    current_step: idx + 1,
                    total_steps: def.steps.len(),
                    completed_steps: completed,
                    failed_steps: failed,
                    percent_complete: ((idx + 1) as f64 / def.steps.len() as f64) * 100.0,
                },
            });
        }

        let failed = failure_reason.is_some();
        let execution = WorkflowExecution {
            workflow_id: def.id,
            status: if failed { WorkflowRunStatus::Failed } else { WorkflowRunStatus::Completed },
            steps,
            context,
            started_at,
            ended_at: Some(Utc::now()),
        };

        let rollback_result = if failed && def.rollback_on_failure {
            self.events.publish(CoreEvent::RollbackStarted { workflow_id: def.id });
            let result = self
                .rollback
                .rollback(def, &execution, |target, action, params| self.invoke(target, action, params))
                .await;
            self.events.publish(CoreEvent::RollbackCompleted {
                workflow_id: def.id,
                success: result.success,
            });
            Some(result)
        } else {
            None
        };

        if failed {
            info!(workflow_id = %def.id, "workflow failed");
            self.events.publish(CoreEvent::WorkflowFailed {
                workflow_id: def.id,
                error: failure_reason.unwrap_or_default(),
            });
        } else {
            info!(workflow_id = %def.id, "workflow completed");
            self.events.publish(CoreEvent::WorkflowCompleted { workflow_id: def.id });
        }

        Ok((execution, rollback_result))
    }
}
