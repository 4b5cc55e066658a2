//! Outbound notification sink (spec §6 "Outbound notification payloads"): a
//! thin `reqwest` POST wrapper shared by the approval queue's interactive
//! messages and the fallback engine's team notifications.

use actioncore_types::ApprovalRequest;
use serde_json::json;

use crate::error::InfraError;

/// Structured interactive message for a pending approval: approvalId,
/// action, priority, risk, confidence, reasoning, parameters, and the three
/// buttons spec §6 requires.
pub fn approval_payload(request: &ApprovalRequest, action: &str, params: &serde_json::Value) -> serde_json::Value {
    json!({
        "approvalId": request.id,
        "action": action,
        "priority": request.priority,
        "riskLevel": request.risk_level,
        "confidence": request.reasoning.confidence,
        "reasoning": request.reasoning.summary,
        "parameters": params,
        "buttons": ["approve", "modify", "reject"],
    })
}

/// The terminal-state block that replaces the interactive block once a
/// request leaves Pending (spec §6).
pub fn status_update_payload(request: &ApprovalRequest) -> serde_json::Value {
    json!({
        "approvalId": request.id,
        "status": request.status,
        "decidedBy": request.decided_by,
        "executionResult": request.execution_result,
    })
}

pub struct WebhookSink {
    client: reqwest::Client,
}

impl Default for WebhookSink {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookSink {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<(), InfraError> {
        self.client
            .post(url)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actioncore_types::{Priority, ReasoningResult, RiskLevel};
    use chrono::Utc;
    use uuid::Uuid;

    fn request() -> ApprovalRequest {
        let now = Utc::now();
        ApprovalRequest {
            id: Uuid::nil(),
            reasoning: ReasoningResult {
                summary: "unusual recipient".into(),
                confidence: 0.6,
                factors: vec![],
            },
            reason: "send external email".into(),
            status: actioncore_types::ApprovalStatus::Pending,
            priority: Priority::High,
            risk_level: RiskLevel::Medium,
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
            metadata: json!({}),
        }
    }

    #[test]
    fn approval_payload_carries_three_buttons() {
        let payload = approval_payload(&request(), "gmail:send", &json!({"to": "x@example.com"}));
        assert_eq!(payload["buttons"], json!(["approve", "modify", "reject"]));
        assert_eq!(payload["confidence"], 0.6);
    }

    #[test]
    fn status_update_payload_carries_decision_state() {
        let mut req = request();
        req.status = actioncore_types::ApprovalStatus::Completed;
        req.decided_by = Some("operator-1".into());
        let payload = status_update_payload(&req);
        assert_eq!(payload["decidedBy"], json!("operator-1"));
    }
}
