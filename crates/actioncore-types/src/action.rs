//! Action requests and the idempotency records keyed off them (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request to invoke a single opaque operation on a target executor.
///
/// Immutable once constructed; it is the sole input to idempotency key
/// generation (see `actioncore_core::idempotency`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Namespaced "target:op", e.g. `"trello:create_card"`.
    pub action: String,
    /// Name of the executor that owns this action.
    pub target: String,
    /// Opaque parameter bag handed to the executor verbatim.
    pub params: Value,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<String>,
}

/// Deterministic idempotency key: `signalId:action:target:hash(sorted(params))`.
///
/// Construction (the canonicalization + hashing) lives in
/// `actioncore_core::idempotency` since it needs `sha2`; this type is a thin,
/// comparable, hashable wrapper so the cache and its callers share one type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A completed execution remembered so a repeated request can be answered
/// without re-invoking the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub action: String,
    pub target: String,
    pub params: Value,
    pub result: Value,
    pub executed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<String>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_display_matches_inner() {
        let key = IdempotencyKey::new("s1:trello:create_card:abcd1234");
        assert_eq!(key.to_string(), "s1:trello:create_card:abcd1234");
        assert_eq!(key.as_str(), "s1:trello:create_card:abcd1234");
    }

    #[test]
    fn record_expiry() {
        let now = Utc::now();
        let record = IdempotencyRecord {
            key: IdempotencyKey::new("k"),
            action: "trello:create_card".into(),
            target: "trello".into(),
            params: serde_json::json!({}),
            result: serde_json::json!({"ok": true}),
            executed_at: now - chrono::Duration::seconds(10),
            expires_at: now - chrono::Duration::seconds(1),
            attempt_count: 1,
            signal_id: None,
        };
        assert!(record.is_expired(now));
    }
}
