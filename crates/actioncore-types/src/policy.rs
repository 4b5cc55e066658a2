//! Retry policy composition (spec §3, §4.2).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exp,
    Lin,
    Fixed,
    Fib,
}

/// A fully-resolved retry policy for one (platform, operation) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub max_attempts: u32,
    /// Milliseconds.
    pub initial_delay: u64,
    /// Milliseconds.
    pub max_delay: u64,
    pub backoff: BackoffStrategy,
    pub multiplier: f64,
    /// In `[0, 1]`; fraction of the base delay to jitter by, uniformly.
    pub jitter: f64,
    pub retryable: HashSet<ErrorKind>,
    pub refresh_auth_on_error: bool,
    /// Milliseconds; `None` means unbounded.
    pub timeout_per_attempt: Option<u64>,
}

impl Default for Policy {
    /// The generic default: the innermost layer of the three-way merge.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: 1000,
            max_delay: 30_000,
            backoff: BackoffStrategy::Exp,
            multiplier: 2.0,
            jitter: 0.1,
            retryable: HashSet::from([
                ErrorKind::Api,
                ErrorKind::RateLimit,
                ErrorKind::Network,
                ErrorKind::Timeout,
            ]),
            refresh_auth_on_error: true,
            timeout_per_attempt: None,
        }
    }
}

/// A sparse set of overrides, applied over a base `Policy` field by field.
///
/// Used for both the per-platform default layer and the per-target override
/// layer described in spec §3 ("Policies are composed by merging a
/// per-target override over the platform default over a generic default").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<HashSet<ErrorKind>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_auth_on_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_per_attempt: Option<Option<u64>>,
}

impl Policy {
    /// Apply `over` on top of `self`, field by field, returning the merged policy.
    pub fn merged_with(&self, over: &PolicyOverride) -> Policy {
        Policy {
            max_attempts: over.max_attempts.unwrap_or(self.max_attempts),
            initial_delay: over.initial_delay.unwrap_or(self.initial_delay),
            max_delay: over.max_delay.unwrap_or(self.max_delay),
            backoff: over.backoff.unwrap_or(self.backoff),
            multiplier: over.multiplier.unwrap_or(self.multiplier),
            jitter: over.jitter.unwrap_or(self.jitter),
            retryable: over
                .retryable
                .clone()
                .unwrap_or_else(|| self.retryable.clone()),
            refresh_auth_on_error: over
                .refresh_auth_on_error
                .unwrap_or(self.refresh_auth_on_error),
            timeout_per_attempt: over
                .timeout_per_attempt
                .clone()
                .unwrap_or(self.timeout_per_attempt),
        }
    }

    /// Compose generic default → platform override → target override, as
    /// required by spec §3.
    pub fn compose(
        generic: &Policy,
        platform: Option<&PolicyOverride>,
        target: Option<&PolicyOverride>,
    ) -> Policy {
        let mut resolved = generic.clone();
        if let Some(p) = platform {
            resolved = resolved.merged_with(p);
        }
        if let Some(t) = target {
            resolved = resolved.merged_with(t);
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_spec_defaults() {
        let policy = Policy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff, BackoffStrategy::Exp);
        assert!(policy.retryable.contains(&ErrorKind::RateLimit));
        assert!(!policy.retryable.contains(&ErrorKind::Validation));
    }

    #[test]
    fn three_way_compose_prefers_target_over_platform_over_generic() {
        let generic = Policy::default();
        let platform = PolicyOverride {
            max_attempts: Some(5),
            initial_delay: Some(500),
            ..Default::default()
        };
        let target = PolicyOverride {
            initial_delay: Some(200),
            ..Default::default()
        };
        let resolved = Policy::compose(&generic, Some(&platform), Some(&target));
        assert_eq!(resolved.max_attempts, 5);
        assert_eq!(resolved.initial_delay, 200);
        assert_eq!(resolved.backoff, BackoffStrategy::Exp);
    }

    #[test]
    fn compose_with_no_overrides_returns_generic() {
        let generic = Policy::default();
        let resolved = Policy::compose(&generic, None, None);
        assert_eq!(resolved, generic);
    }
}
