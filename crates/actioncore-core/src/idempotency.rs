//! Idempotency cache (C5): deterministic key generation, a single-flight
//! latch per key, and a bounded record store with LRU-by-age eviction
//! (spec §3, §4.5).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use actioncore_types::{ActionRequest, IdempotencyError, IdempotencyKey, IdempotencyRecord};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

/// Recursively sorts object keys (arrays keep their element order) so two
/// deeply-equal parameter maps always produce the same string, independent
/// of insertion order at any nesting depth (spec §3's key invariant).
fn canonical_string(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap(), canonical_string(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_string).collect();
            format!("[{}]", parts.join(","))
        }
        other => serde_json::to_string(other).unwrap(),
    }
}

/// Deterministic key: `signalId:action:target:hash(sorted(params))`, where
/// the hash is the first 16 hex characters (8 bytes) of SHA-256 over the
/// canonical JSON encoding of `params`.
pub fn generate_key(req: &ActionRequest) -> IdempotencyKey {
    let canon = canonical_string(&req.params);
    let digest = Sha256::digest(canon.as_bytes());
    let hash: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    let signal = req.signal_id.as_deref().unwrap_or("");
    IdempotencyKey::new(format!("{signal}:{}:{}:{hash}", req.action, req.target))
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub executed: bool,
    pub cached_result: Option<Value>,
    pub executed_at: Option<DateTime<Utc>>,
    pub ttl: Option<Duration>,
}

pub struct IdempotencyCache {
    records: DashMap<IdempotencyKey, IdempotencyRecord>,
    inflight: DashMap<IdempotencyKey, Arc<Mutex<()>>>,
    capacity: usize,
}

impl IdempotencyCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: DashMap::new(),
            inflight: DashMap::new(),
            capacity,
        }
    }

    /// Returns `executed = true` iff a non-expired record exists; a hit also
    /// increments `attemptCount` (spec §4.5).
    pub fn check(&self, key: &IdempotencyKey) -> CheckResult {
        let now = Utc::now();
        if let Some(mut entry) = self.records.get_mut(key) {
            if !entry.is_expired(now) {
                entry.attempt_count += 1;
                return CheckResult {
                    executed: true,
                    cached_result: Some(entry.result.clone()),
                    executed_at: Some(entry.executed_at),
                    ttl: Some((entry.expires_at - now).to_std().unwrap_or(Duration::ZERO)),
                };
            }
        }
        CheckResult {
            executed: false,
            cached_result: None,
            executed_at: None,
            ttl: None,
        }
    }

    /// Insert or replace a record, evicting the oldest 20% by `executedAt`
    /// first if this insert would put the cache at or over capacity.
    pub fn mark(&self, req: &ActionRequest, key: IdempotencyKey, result: Value, ttl: Duration) {
        if self.records.len() >= self.capacity && !self.records.contains_key(&key) {
            self.evict_oldest_fraction(0.2);
        }
        let now = Utc::now();
        let record = IdempotencyRecord {
            key: key.clone(),
            action: req.action.clone(),
            target: req.target.clone(),
            params: req.params.clone(),
            result,
            executed_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
            attempt_count: 1,
            signal_id: req.signal_id.clone(),
        };
        self.records.insert(key, record);
    }

    fn evict_oldest_fraction(&self, fraction: f64) {
        let mut entries: Vec<(IdempotencyKey, DateTime<Utc>)> = self
            .records
            .iter()
            .map(|e| (e.key().clone(), e.value().executed_at))
            .collect();
        entries.sort_by_key(|(_, executed_at)| *executed_at);
        let to_remove = ((entries.len() as f64) * fraction).ceil() as usize;
        for (key, _) in entries.into_iter().take(to_remove) {
            self.records.remove(&key);
        }
    }

    /// `check`; if already executed, return the cached result; otherwise
    /// invoke `f` once, `mark` the outcome, and return it. Concurrent callers
    /// for the same key serialize on a per-key latch so `f` runs at most once
    /// while a call is in flight (spec §5's per-key-at-most-once guarantee).
    pub async fn execute_once<F, Fut>(
        &self,
        req: &ActionRequest,
        ttl: Duration,
        f: F,
    ) -> Result<Value, IdempotencyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, String>>,
    {
        let key = generate_key(req);
        let latch = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = latch.lock().await;

        let check = self.check(&key);
        if check.executed {
            return Ok(check.cached_result.unwrap());
        }

        let result = f().await.map_err(|message| IdempotencyError::InFlightFailed(format!("{key}: {message}")))?;
        self.mark(req, key, result.clone(), ttl);
        Ok(result)
    }

    /// Remove every record whose `expiresAt` has passed. Intended to be
    /// driven by a periodic timer (`cleanupInterval`, default 1h).
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<IdempotencyKey> = self
            .records
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        let count = expired.len();
        for key in expired {
            self.records.remove(&key);
        }
        count
    }

    pub fn purge(&self, key: &IdempotencyKey) -> bool {
        self.records.remove(key).is_some()
    }

    pub fn by_action(&self, action: &str) -> Vec<IdempotencyRecord> {
        self.records
            .iter()
            .filter(|e| e.value().action == action)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn by_target(&self, target: &str) -> Vec<IdempotencyRecord> {
        self.records
            .iter()
            .filter(|e| e.value().target == target)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn by_signal_id(&self, signal_id: &str) -> Vec<IdempotencyRecord> {
        self.records
            .iter()
            .filter(|e| e.value().signal_id.as_deref() == Some(signal_id))
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn expiring_within(&self, delta: Duration) -> Vec<IdempotencyRecord> {
        let now = Utc::now();
        let horizon = now + chrono::Duration::from_std(delta).unwrap_or(chrono::Duration::zero());
        self.records
            .iter()
            .filter(|e| e.value().expires_at <= horizon && e.value().expires_at > now)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn sample_request() -> ActionRequest {
        ActionRequest {
            action: "create_task".into(),
            target: "trello".into(),
            params: serde_json::json!({"name": "Review", "boardId": "b1"}),
            correlation_id: "corr-1".into(),
            signal_id: Some("s1".into()),
        }
    }

    #[test]
    fn key_generation_is_order_independent() {
        let mut a = sample_request();
        a.params = serde_json::json!({"name": "Review", "boardId": "b1"});
        let mut b = sample_request();
        b.params = serde_json::json!({"boardId": "b1", "name": "Review"});
        assert_eq!(generate_key(&a), generate_key(&b));
    }

    #[test]
    fn key_generation_respects_nested_order() {
        let mut a = sample_request();
        a.params = serde_json::json!({"outer": {"a": 1, "b": 2}});
        let mut b = sample_request();
        b.params = serde_json::json!({"outer": {"b": 2, "a": 1}});
        assert_eq!(generate_key(&a), generate_key(&b));
    }

    #[test]
    fn array_order_is_preserved_and_distinguishes_keys() {
        let mut a = sample_request();
        a.params = serde_json::json!({"items": [1, 2, 3]});
        let mut b = sample_request();
        b.params = serde_json::json!({"items": [3, 2, 1]});
        assert_ne!(generate_key(&a), generate_key(&b));
    }

    #[test]
    fn mark_then_check_returns_cached_result() {
        let cache = IdempotencyCache::new(100);
        let req = sample_request();
        let key = generate_key(&req);
        cache.mark(&req, key.clone(), serde_json::json!({"ok": true}), Duration::from_secs(60));

        let check = cache.check(&key);
        assert!(check.executed);
        assert_eq!(check.cached_result.unwrap(), serde_json::json!({"ok": true}));
    }

    #[test]
    fn expired_record_is_not_executed() {
        let cache = IdempotencyCache::new(100);
        let req = sample_request();
        let key = generate_key(&req);
        cache.mark(&req, key.clone(), serde_json::json!({"ok": true}), Duration::ZERO);

        std::thread::sleep(Duration::from_millis(5));
        let check = cache.check(&key);
        assert!(!check.executed);
    }

    #[tokio::test]
    async fn scenario_s3_concurrent_execute_once_invokes_fn_once() {
        let cache = Arc::new(IdempotencyCache::new(100));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                let req = sample_request();
                cache
                    .execute_once(&req, Duration::from_secs(60), || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(serde_json::json!({"id": "card1"}))
                        }
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results[0], results[1]);
    }

    #[test]
    fn eviction_removes_oldest_twenty_percent() {
        let cache = IdempotencyCache::new(5);
        for i in 0..5 {
            let mut req = sample_request();
            req.signal_id = Some(format!("s{i}"));
            let key = generate_key(&req);
            cache.mark(&req, key, serde_json::json!({"i": i}), Duration::from_secs(600));
        }
        assert_eq!(cache.len(), 5);

        let mut req = sample_request();
        req.signal_id = Some("s-new".into());
        let key = generate_key(&req);
        cache.mark(&req, key, serde_json::json!({"i": "new"}), Duration::from_secs(600));

        assert!(cache.len() <= 5);
    }
}
