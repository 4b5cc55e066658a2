//! Global configuration shape loaded from `config.toml` (spec §6 "Environment
//! inputs"). Loading itself is an infra concern; this crate only owns the
//! deserialized shape so both `actioncore-core` callers and `actioncore-cli`
//! can share it without a dependency on `actioncore-infra`.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "logs/metrics.jsonl".to_string()
}

fn default_summaries_dir() -> String {
    "logs/summaries".to_string()
}

fn default_retention_days() -> u32 {
    30
}

fn default_rate_limit_buffer_sec() -> u64 {
    5
}

/// Feature flags gating the optional subsystems named in spec §6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub approvals_enabled: bool,
    #[serde(default = "default_true")]
    pub health_checks_enabled: bool,
    #[serde(default = "default_true")]
    pub fallbacks_enabled: bool,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            approvals_enabled: true,
            health_checks_enabled: true,
            fallbacks_enabled: true,
            metrics_enabled: true,
        }
    }
}

/// Channel names and user id lists consulted by approval/rollback
/// notifications (spec §6's "channel names and user id lists for
/// notifications").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationTargets {
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Top-level configuration, deserialized from `config.toml` at the data
/// directory root (mirrors the teacher's `GlobalConfig` load path).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub notifications: NotificationTargets,
    /// Path to the append-only metrics journal (spec §6).
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
    /// Path to the optional executions journal; `None` disables it.
    #[serde(default)]
    pub executions_journal_path: Option<String>,
    /// Directory holding one daily summary JSON file per UTC day.
    #[serde(default = "default_summaries_dir")]
    pub summaries_dir: String,
    /// Directory for fallback CSV-log output.
    #[serde(default)]
    pub csv_backup_dir: Option<String>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// The rate-limit buffer the Design Notes call out as "configurable in
    /// spirit but hardcoded in source": seconds added to a server's
    /// `Retry-After` hint before computing the capped delay.
    #[serde(default = "default_rate_limit_buffer_sec")]
    pub rate_limit_buffer_sec: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            features: FeatureFlags::default(),
            notifications: NotificationTargets::default(),
            metrics_path: default_metrics_path(),
            executions_journal_path: None,
            summaries_dir: default_summaries_dir(),
            csv_backup_dir: None,
            retention_days: default_retention_days(),
            rate_limit_buffer_sec: default_rate_limit_buffer_sec(),
        }
    }
}
