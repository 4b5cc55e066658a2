//! Metrics collector (C9): an in-memory ring of observations plus a
//! drain-on-demand pending buffer for whatever sink flushes it to disk
//! (spec §4.9). This module never touches the filesystem -- persistence is
//! an infra concern, kept out of core the same way executors are.

use std::collections::{HashMap, VecDeque};

use actioncore_types::{MetricEntry, MetricsAggregate, RealtimeView, SubAggregate};
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct MetricsConfig {
    pub max_in_memory_entries: usize,
    pub retention_days: u32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_in_memory_entries: 10_000,
            retention_days: 30,
        }
    }
}

pub struct MetricsCollector {
    entries: Mutex<VecDeque<MetricEntry>>,
    pending: Mutex<Vec<MetricEntry>>,
    config: MetricsConfig,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(config.max_in_memory_entries)),
            pending: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Append one observation, evicting the oldest if the in-memory ring is
    /// at capacity, and queue it for the next flush.
    pub async fn record(&self, entry: MetricEntry) {
        {
            let mut entries = self.entries.lock().await;
            if entries.len() >= self.config.max_in_memory_entries {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }
        self.pending.lock().await.push(entry);
    }

    /// Take everything accumulated since the last flush. Intended to be
    /// driven by a periodic timer (`flushInterval`, default 5s) that appends
    /// the result to a JSON-lines journal.
    pub async fn drain_pending(&self) -> Vec<MetricEntry> {
        std::mem::take(&mut *self.pending.lock().await)
    }

    /// Hydrate the in-memory ring from a journal read at startup, dropping
    /// anything older than `retentionDays` and anything over capacity.
    pub async fn load_from_journal(&self, loaded: impl IntoIterator<Item = MetricEntry>) {
        let cutoff = Utc::now() - ChronoDuration::days(self.config.retention_days as i64);
        let mut entries = self.entries.lock().await;
        entries.clear();
        for entry in loaded {
            if entry.timestamp < cutoff {
                continue;
            }
            if entries.len() >= self.config.max_in_memory_entries {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    pub async fn aggregate(&self) -> MetricsAggregate {
        let entries = self.entries.lock().await;
        aggregate_over(entries.iter())
    }

    /// Last-hour aggregate, actions-per-minute for the last 5 minutes, and
    /// the 10 most recent failures (spec §4.9's real-time view).
    pub async fn realtime_view(&self) -> RealtimeView {
        let entries = self.entries.lock().await;
        let hour_ago = Utc::now() - ChronoDuration::hours(1);
        let recent: Vec<&MetricEntry> = entries.iter().filter(|e| e.timestamp >= hour_ago).collect();

        let aggregate = aggregate_over(recent.iter().copied());

        let five_min_ago = Utc::now() - ChronoDuration::minutes(5);
        let mut per_minute = vec![0u64; 5];
        for entry in recent.iter().filter(|e| e.timestamp >= five_min_ago) {
            let minutes_ago = (Utc::now() - entry.timestamp).num_minutes().clamp(0, 4) as usize;
            per_minute[minutes_ago] += 1;
        }
        per_minute.reverse();

        let mut latest_failures: Vec<MetricEntry> = recent
            .iter()
            .filter(|e| e.status != "success")
            .map(|e| (*e).clone())
            .collect();
        latest_failures.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
        latest_failures.truncate(10);

        RealtimeView {
            aggregate,
            actions_per_minute: per_minute,
            latest_failures,
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * p).ceil() as usize;
    let idx = idx.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx] as f64
}

fn aggregate_over<'a>(entries: impl Iterator<Item = &'a MetricEntry> + Clone) -> MetricsAggregate {
    let total = entries.clone().count() as u64;
    if total == 0 {
        return MetricsAggregate::default();
    }

    let success_count = entries.clone().filter(|e| e.status == "success").count() as u64;
    let total_duration: u64 = entries.clone().map(|e| e.duration).sum();
    let mut durations: Vec<u64> = entries.clone().map(|e| e.duration).collect();
    durations.sort_unstable();

    let total_retries: u64 = entries.clone().filter_map(|e| e.retry_count).map(|c| c as u64).sum();
    let circuit_breaker_trips = entries
        .clone()
        .filter(|e| e.circuit_breaker_tripped == Some(true))
        .count() as u64;
    let approval_required_count = entries.clone().filter(|e| e.required_approval == Some(true)).count() as u64;
    let approved_count = entries
        .clone()
        .filter(|e| e.required_approval == Some(true) && e.was_approved == Some(true))
        .count() as u64;
    let approval_rate = if approval_required_count > 0 {
        approved_count as f64 / approval_required_count as f64
    } else {
        0.0
    };

    let queue_depths: Vec<u32> = entries.clone().filter_map(|e| e.queue_depth).collect();
    let avg_queue_depth = if queue_depths.is_empty() {
        0.0
    } else {
        queue_depths.iter().map(|&d| d as f64).sum::<f64>() / queue_depths.len() as f64
    };
    let max_queue_depth = queue_depths.into_iter().max().unwrap_or(0);

    let by_platform = group_by(entries.clone(), |e| e.platform.clone());
    let by_action_type = group_by(entries, |e| e.action_type.clone());

    MetricsAggregate {
        total_executed: total,
        success_rate: success_count as f64 / total as f64,
        avg_duration: total_duration as f64 / total as f64,
        p50: percentile(&durations, 0.50),
        p95: percentile(&durations, 0.95),
        p99: percentile(&durations, 0.99),
        total_retries,
        circuit_breaker_trips,
        approval_required_count,
        approval_rate,
        avg_queue_depth,
        max_queue_depth,
        by_platform,
        by_action_type,
    }
}

fn group_by<'a>(
    entries: impl Iterator<Item = &'a MetricEntry>,
    key: impl Fn(&MetricEntry) -> String,
) -> HashMap<String, SubAggregate> {
    let mut groups: HashMap<String, (u64, u64, u64, u64)> = HashMap::new();
    for entry in entries {
        let slot = groups.entry(key(entry)).or_insert((0, 0, 0, 0));
        slot.0 += 1;
        if entry.status == "success" {
            slot.1 += 1;
        } else {
            slot.2 += 1;
        }
        slot.3 += entry.duration;
    }
    groups
        .into_iter()
        .map(|(k, (total, success, failure, duration_sum))| {
            (
                k,
                SubAggregate {
                    total_executions: total,
                    success_count: success,
                    failure_count: failure,
                    success_rate: if total > 0 { success as f64 / total as f64 } else { 0.0 },
                    avg_duration: if total > 0 { duration_sum as f64 / total as f64 } else { 0.0 },
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(platform: &str, action: &str, status: &str, duration: u64) -> MetricEntry {
        MetricEntry {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            action_type: action.to_string(),
            platform: platform.to_string(),
            status: status.to_string(),
            duration,
            retry_count: None,
            retry_reason: None,
            circuit_breaker_tripped: None,
            required_approval: None,
            was_approved: None,
            queue_depth: None,
        }
    }

    #[tokio::test]
    async fn record_then_aggregate_computes_success_rate_and_percentiles() {
        let collector = MetricsCollector::new(MetricsConfig::default());
        for duration in [100, 200, 300, 400, 500] {
            collector.record(entry("trello", "create_task", "success", duration)).await;
        }
        collector.record(entry("trello", "create_task", "failure", 9000)).await;

        let aggregate = collector.aggregate().await;
        assert_eq!(aggregate.total_executed, 6);
        assert!((aggregate.success_rate - (5.0 / 6.0)).abs() < 1e-9);
        assert_eq!(aggregate.p50, 300.0);
        assert_eq!(aggregate.by_platform["trello"].total_executions, 6);
    }

    #[tokio::test]
    async fn ring_evicts_oldest_past_capacity() {
        let collector = MetricsCollector::new(MetricsConfig {
            max_in_memory_entries: 3,
            retention_days: 30,
        });
        for i in 0..5 {
            collector.record(entry("trello", "create_task", "success", i)).await;
        }
        let aggregate = collector.aggregate().await;
        assert_eq!(aggregate.total_executed, 3);
    }

    #[tokio::test]
    async fn drain_pending_empties_after_take() {
        let collector = MetricsCollector::new(MetricsConfig::default());
        collector.record(entry("trello", "create_task", "success", 10)).await;
        let drained = collector.drain_pending().await;
        assert_eq!(drained.len(), 1);
        assert!(collector.drain_pending().await.is_empty());
    }

    #[tokio::test]
    async fn approval_rate_only_counts_required_approvals() {
        let collector = MetricsCollector::new(MetricsConfig::default());
        let mut approved = entry("notion", "create_page", "success", 50);
        approved.required_approval = Some(true);
        approved.was_approved = Some(true);
        let mut not_required = entry("notion", "create_page", "success", 40);
        not_required.required_approval = Some(false);

        collector.record(approved).await;
        collector.record(not_required).await;

        let aggregate = collector.aggregate().await;
        assert_eq!(aggregate.approval_required_count, 1);
        assert_eq!(aggregate.approval_rate, 1.0);
    }
}
