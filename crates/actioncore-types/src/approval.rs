//! Approval queue data model (spec §3, §4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// One-shot lifecycle status of an `ApprovalRequest`. Transitions are
/// validated by `actioncore_core::approval`; this type only carries the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Executing,
    Completed,
    Failed,
}

/// The decision an operator (or an auto-expire policy) makes on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Modify,
    Reject,
}

/// The model's justification for why an action should be escalated, attached
/// to every `ApprovalRequest` and rendered in outbound notifications (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResult {
    pub summary: String,
    /// `0.0..=1.0`.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub reasoning: ReasoningResult,
    pub reason: String,
    pub status: ApprovalStatus,
    pub priority: Priority,
    pub risk_level: RiskLevel,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Milliseconds; `0` means "no auto-expire" (spec §4.6 treats this as a 24h timer).
    pub timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_message_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ApprovalDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifications: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<Value>,
    #[serde(default)]
    pub metadata: Value,
}

/// Emitted on both approve and reject paths so the originating component can
/// learn from the outcome (spec §4.6, event `learning:feedback`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalFeedback {
    pub approval_id: Uuid,
    pub was_correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_status_round_trips_through_json() {
        let json = serde_json::to_string(&ApprovalStatus::Executing).unwrap();
        assert_eq!(json, "\"executing\"");
        let back: ApprovalStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ApprovalStatus::Executing);
    }

    #[test]
    fn approval_request_serializes_without_optional_fields() {
        let now = Utc::now();
        let req = ApprovalRequest {
            id: Uuid::nil(),
            reasoning: ReasoningResult {
                summary: "risky send".into(),
                confidence: 0.4,
                factors: vec![],
            },
            reason: "outbound email to external domain".into(),
            status: ApprovalStatus::Pending,
            priority: Priority::Medium,
            risk_level: RiskLevel::High,
            created_at: now,
            expires_at: now,
            timeout: 60_000,
            slack_message_ts: None,
            decision: None,
            decided_by: None,
            decided_at: None,
            modifications: None,
            rejection_reason: None,
            execution_result: None,
            metadata: serde_json::json!({}),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("decision").is_none());
        assert!(value.get("slack_message_ts").is_none());
    }
}
