//! Metrics record shape (spec §3, §4.9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One append-only observation. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action_type: String,
    pub platform: String,
    pub status: String,
    /// Milliseconds.
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_tripped: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_approval: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub was_approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<u32>,
}

/// Per-group rollup shared by the platform and action-type groupings in the
/// aggregate view (spec §4.9).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubAggregate {
    pub total_executions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub avg_duration: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsAggregate {
    pub total_executed: u64,
    pub success_rate: f64,
    pub avg_duration: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub total_retries: u64,
    pub circuit_breaker_trips: u64,
    pub approval_required_count: u64,
    pub approval_rate: f64,
    pub avg_queue_depth: f64,
    pub max_queue_depth: u32,
    pub by_platform: std::collections::HashMap<String, SubAggregate>,
    pub by_action_type: std::collections::HashMap<String, SubAggregate>,
}

/// Supplement over `MetricsAggregate` for the rolling last-hour view
/// (spec §4.9: "additionally yields actions-per-minute... and the latest 10 failures").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealtimeView {
    pub aggregate: MetricsAggregate,
    pub actions_per_minute: Vec<u64>,
    pub latest_failures: Vec<MetricEntry>,
}
