//! Approval queue (C6): enqueue/decide/auto-expire lifecycle over a pending
//! request table, with a decision-latency moving average and learning
//! feedback on every terminal outcome (spec §4.6).

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use actioncore_types::{
    ApprovalDecision, ApprovalError, ApprovalFeedback, ApprovalRequest, ApprovalStatus,
    ApprovalStatusKind, CoreEvent, Priority, ReasoningResult, RiskLevel,
};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::event::EventBus;

pub type ApprovalExecFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;
/// The function bound at enqueue time and invoked on Approve/Modify, given
/// `params ∪ modifications` (spec §4.6).
pub type ApprovalExecutor = Arc<dyn Fn(Value) -> ApprovalExecFuture + Send + Sync>;

pub trait ApprovalFeedbackSink: Send + Sync {
    fn on_feedback(&self, feedback: ApprovalFeedback);
}

pub struct NoopFeedbackSink;
impl ApprovalFeedbackSink for NoopFeedbackSink {
    fn on_feedback(&self, _feedback: ApprovalFeedback) {}
}

#[derive(Debug, Clone, Copy)]
pub struct ApprovalTimeouts {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
    pub critical: u64,
}

impl ApprovalTimeouts {
    fn for_priority(&self, priority: Priority) -> u64 {
        match priority {
            Priority::Low => self.low,
            Priority::Medium => self.medium,
            Priority::High => self.high,
            Priority::Critical => self.critical,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ApprovalPolicy {
    pub timeouts: ApprovalTimeouts,
    pub auto_approve_low_risk: bool,
    pub auto_reject_high_risk: bool,
}

fn to_kind(status: ApprovalStatus) -> ApprovalStatusKind {
    match status {
        ApprovalStatus::Pending => ApprovalStatusKind::Pending,
        ApprovalStatus::Approved => ApprovalStatusKind::Approved,
        ApprovalStatus::Rejected => ApprovalStatusKind::Rejected,
        ApprovalStatus::Expired => ApprovalStatusKind::Expired,
        ApprovalStatus::Executing => ApprovalStatusKind::Executing,
        ApprovalStatus::Completed => ApprovalStatusKind::Completed,
        ApprovalStatus::Failed => ApprovalStatusKind::Failed,
    }
}

fn merge_params(metadata: &Value, modifications: Option<&Value>) -> Value {
    match (metadata.as_object(), modifications.and_then(Value::as_object)) {
        (Some(base), Some(over)) => {
            let mut merged = base.clone();
            for (k, v) in over {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => metadata.clone(),
    }
}

pub struct ApprovalQueue {
    requests: DashMap<Uuid, ApprovalRequest>,
    executors: DashMap<Uuid, ApprovalExecutor>,
    timers: DashMap<Uuid, CancellationToken>,
    decision_times_ms: Mutex<VecDeque<i64>>,
    policy: ApprovalPolicy,
    events: EventBus,
    feedback: Arc<dyn ApprovalFeedbackSink>,
}

impl ApprovalQueue {
    pub fn new(policy: ApprovalPolicy, events: EventBus, feedback: Arc<dyn ApprovalFeedbackSink>) -> Arc<Self> {
        Arc::new(Self {
            requests: DashMap::new(),
            executors: DashMap::new(),
            timers: DashMap::new(),
            decision_times_ms: Mutex::new(VecDeque::with_capacity(100)),
            policy,
            events,
            feedback,
        })
    }

    /// Create a pending request, bind its execution function, and (if the
    /// resolved timeout is nonzero) spawn a cancellable expiry timer.
    pub fn enqueue(
        self: &Arc<Self>,
        reasoning: ReasoningResult,
        reason: impl Into<String>,
        priority: Priority,
        risk_level: RiskLevel,
        metadata: Value,
        executor: ApprovalExecutor,
    ) -> Uuid {
        let id = Uuid::now_v7();
        let timeout = self.policy.timeouts.for_priority(priority);
        let effective_timeout_ms = if timeout == 0 { 24 * 3600 * 1000 } else { timeout };
        let now = Utc::now();
        let expires_at = now + chrono::Duration::milliseconds(effective_timeout_ms as i64);

        let request = ApprovalRequest {
            id,
            reasoning,
            reason: reason.into(),
            status: ApprovalStatus::Pending,
            priority,
            risk_level,
            created_at: now,
            expires_at,
            timeout,
            slack_message_ts: None,
            decision: None,
            decided_by: None,
            decided_at: None,
            modifications: None,
            rejection_reason: None,
            execution_result: None,
            metadata,
        };

        self.requests.insert(id, request.clone());
        self.executors.insert(id, executor);

        self.events.publish(CoreEvent::ActionRequiresApproval {
            request: request.clone(),
        });
        self.events.publish(CoreEvent::ApprovalQueued { request });

        if timeout > 0 {
            let cancel = CancellationToken::new();
            self.timers.insert(id, cancel.clone());
            let queue = self.clone();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_millis(effective_timeout_ms)) => {
                        queue.auto_expire(id).await;
                    }
                }
            });
        }

        id
    }

    pub fn get(&self, id: Uuid) -> Option<ApprovalRequest> {
        self.requests.get(&id).map(|r| r.clone())
    }

    async fn record_decision_latency(&self, created_at: chrono::DateTime<Utc>) {
        let elapsed_ms = (Utc::now() - created_at).num_milliseconds();
        let mut times = self.decision_times_ms.lock().await;
        times.push_back(elapsed_ms);
        if times.len() > 100 {
            times.pop_front();
        }
    }

    pub async fn decision_moving_average_ms(&self) -> f64 {
        let times = self.decision_times_ms.lock().await;
        if times.is_empty() {
            return 0.0;
        }
        times.iter().sum::<i64>() as f64 / times.len() as f64
    }

    /// Resolve a pending request. Idempotent against non-Pending states
    /// (returns `NotPending`).
    pub async fn decide(
        self: &Arc<Self>,
        id: Uuid,
        decision: ApprovalDecision,
        decided_by: impl Into<String>,
        modifications: Option<Value>,
        rejection_reason: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        if let Some((_, token)) = self.timers.remove(&id) {
            token.cancel();
        }

        let created_at = {
            let entry = self
                .requests
                .get(&id)
                .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
            if entry.status != ApprovalStatus::Pending {
                return Err(ApprovalError::NotPending(id.to_string(), to_kind(entry.status)));
            }
            entry.created_at
        };

        self.record_decision_latency(created_at).await;
        Ok(self
            .execute_decision(id, decision, decided_by.into(), modifications, rejection_reason)
            .await)
    }

    /// Fired by the expiry timer. A no-op if a decision already landed
    /// first (the timer's cancellation usually prevents this race, but a
    /// late-firing timer must still be safe).
    pub async fn auto_expire(self: &Arc<Self>, id: Uuid) {
        {
            let mut entry = match self.requests.get_mut(&id) {
                Some(e) => e,
                None => return,
            };
            if entry.status != ApprovalStatus::Pending {
                return;
            }
            entry.status = ApprovalStatus::Expired;
        }

        let snapshot = self.requests.get(&id).unwrap().clone();
        info!(approval_id = %id, "approval request expired");
        self.events.publish(CoreEvent::ApprovalExpired { request: snapshot.clone() });

        let policy_decision = match snapshot.risk_level {
            RiskLevel::Low if self.policy.auto_approve_low_risk => Some(ApprovalDecision::Approve),
            RiskLevel::High | RiskLevel::Critical if self.policy.auto_reject_high_risk => {
                Some(ApprovalDecision::Reject)
            }
            _ => None,
        };

        if let Some(decision) = policy_decision {
            let rejection_reason = matches!(decision, ApprovalDecision::Reject)
                .then(|| "auto-rejected due to timeout and high risk".to_string());
            self.execute_decision(id, decision, "system-auto-approve".to_string(), None, rejection_reason)
                .await;
        }
    }

    async fn execute_decision(
        self: &Arc<Self>,
        id: Uuid,
        decision: ApprovalDecision,
        decided_by: String,
        modifications: Option<Value>,
        rejection_reason: Option<String>,
    ) -> ApprovalRequest {
        let metadata = {
            let mut entry = self.requests.get_mut(&id).unwrap();
            entry.decision = Some(decision);
            entry.decided_by = Some(decided_by);
            entry.decided_at = Some(Utc::now());
            entry.modifications = modifications.clone();
            entry.rejection_reason = rejection_reason.clone();
            entry.status = if decision == ApprovalDecision::Reject {
                ApprovalStatus::Rejected
            } else {
                ApprovalStatus::Approved
            };
            entry.metadata.clone()
        };

        let decided_snapshot = self.requests.get(&id).unwrap().clone();
        self.events.publish(CoreEvent::ApprovalDecided {
            request: decided_snapshot.clone(),
        });

        if decision == ApprovalDecision::Reject {
            self.emit_feedback(id, false, rejection_reason);
            self.events.publish(CoreEvent::ApprovalFailed {
                request: decided_snapshot.clone(),
            });
            return decided_snapshot;
        }

        {
            let mut entry = self.requests.get_mut(&id).unwrap();
            entry.status = ApprovalStatus::Executing;
        }
        let executing_snapshot = self.requests.get(&id).unwrap().clone();
        self.events.publish(CoreEvent::ApprovalExecuting {
            request: executing_snapshot,
        });

        let executor = self.executors.get(&id).map(|e| e.clone());
        let params = merge_params(&metadata, modifications.as_ref());

        let outcome = match executor {
            Some(exec) => exec(params).await,
            None => Err("no execution function registered for this approval".to_string()),
        };

        match outcome {
            Ok(result) => {
                let mut entry = self.requests.get_mut(&id).unwrap();
                entry.status = ApprovalStatus::Completed;
                entry.execution_result = Some(result);
                drop(entry);
                let snapshot = self.requests.get(&id).unwrap().clone();
                self.events.publish(CoreEvent::ApprovalCompleted {
                    request: snapshot.clone(),
                });
                self.emit_feedback(id, true, None);
                snapshot
            }
            Err(error) => {
                warn!(approval_id = %id, error, "approval execution failed");
                let mut entry = self.requests.get_mut(&id).unwrap();
                entry.status = ApprovalStatus::Failed;
                drop(entry);
                let snapshot = self.requests.get(&id).unwrap().clone();
                self.events.publish(CoreEvent::ApprovalFailed {
                    request: snapshot.clone(),
                });
                self.emit_feedback(id, false, Some(error));
                snapshot
            }
        }
    }

    /// Feedback callback exceptions are caught and logged (spec §4.6); since
    /// `ApprovalFeedbackSink::on_feedback` is infallible here, a panicking
    /// sink is the only failure mode and is intentionally not caught --
    /// sinks are expected to handle their own errors internally.
    fn emit_feedback(&self, id: Uuid, was_correct: bool, notes: Option<String>) {
        let feedback = ApprovalFeedback {
            approval_id: id,
            was_correct,
            notes,
        };
        self.feedback.on_feedback(feedback.clone());
        self.events.publish(CoreEvent::LearningFeedback { feedback });
    }
}
