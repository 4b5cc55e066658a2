//! Fallback engine (C4): walks an ordered chain of alternate executors after
//! a primary action fails, with throttled team notifications (spec §4.4).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actioncore_types::{CoreEvent, FallbackError};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::event::EventBus;

/// One candidate in a fallback chain: an executor name plus the operation to
/// invoke on it (spec §4.4's built-in operations, e.g. `write_local_file`,
/// `append_csv_row`, `console_print`, `enqueue_retry`, `post_webhook`,
/// `send_email`, or `route:<executor>` to hand off to another platform).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackStep {
    pub action: String,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct FallbackStrategy {
    pub steps: Vec<FallbackStep>,
    pub notify_team: bool,
}

#[derive(Debug, Clone)]
pub struct FallbackResult {
    pub value: Value,
    pub executed_via_fallback: bool,
    pub primary_action: String,
    pub fallback_action: Option<String>,
    pub original_error: String,
}

/// Resolves and walks fallback chains. Disabled globally by `enabled = false`
/// (the feature flag spec §4.4 requires for every built-in operation).
pub struct FallbackEngine {
    enabled: bool,
    max_fallback_attempts: usize,
    notify_throttle: Duration,
    strategies: DashMap<String, FallbackStrategy>,
    default_strategy: Option<FallbackStrategy>,
    last_notified: DashMap<String, Instant>,
    events: EventBus,
}

impl FallbackEngine {
    pub fn new(enabled: bool, max_fallback_attempts: usize, notify_throttle: Duration, events: EventBus) -> Self {
        Self {
            enabled,
            max_fallback_attempts,
            notify_throttle,
            strategies: DashMap::new(),
            default_strategy: None,
            last_notified: DashMap::new(),
            events,
        }
    }

    pub fn register_strategy(&self, primary_action: impl Into<String>, strategy: FallbackStrategy) {
        self.strategies.insert(primary_action.into(), strategy);
    }

    pub fn set_default_strategy(&mut self, strategy: FallbackStrategy) {
        self.default_strategy = Some(strategy);
    }

    fn resolve(&self, primary_action: &str) -> Option<FallbackStrategy> {
        self.strategies
            .get(primary_action)
            .map(|s| s.clone())
            .or_else(|| self.default_strategy.clone())
    }

    /// `invoke` runs one fallback step; it is given the step and must return
    /// the opaque result on success.
    pub async fn run<F, Fut>(
        &self,
        primary_action: &str,
        primary_error: &str,
        mut invoke: F,
    ) -> Result<FallbackResult, FallbackError>
    where
        F: FnMut(&FallbackStep) -> Fut,
        Fut: Future<Output = Result<Value, String>>,
    {
        if !self.enabled {
            return Err(FallbackError::NoStrategy(primary_action.to_string()));
        }

        let strategy = self
            .resolve(primary_action)
            .ok_or_else(|| FallbackError::NoStrategy(primary_action.to_string()))?;

        let mut last_err = primary_error.to_string();
        let mut attempted = 0u32;

        for step in strategy.steps.iter().take(self.max_fallback_attempts) {
            attempted += 1;
            match invoke(step).await {
                Ok(value) => {
                    self.events.publish(CoreEvent::FallbackUsed {
                        executor: step.target.clone(),
                    });
                    if strategy.notify_team {
                        self.maybe_notify(primary_action, &step.action).await;
                    }
                    return Ok(FallbackResult {
                        value,
                        executed_via_fallback: true,
                        primary_action: primary_action.to_string(),
                        fallback_action: Some(step.action.clone()),
                        original_error: primary_error.to_string(),
                    });
                }
                Err(message) => {
                    warn!(primary_action, fallback = %step.action, "fallback step failed");
                    last_err = message;
                }
            }
        }

        Err(FallbackError::ChainExhausted {
            primary: primary_action.to_string(),
            attempted,
            last: last_err,
        })
    }

    async fn maybe_notify(&self, primary_action: &str, fallback_action: &str) {
        let now = Instant::now();
        let should_notify = match self.last_notified.get(primary_action) {
            Some(last) if now.duration_since(*last) < self.notify_throttle => false,
            _ => true,
        };
        if should_notify {
            self.last_notified.insert(primary_action.to_string(), now);
            warn!(primary_action, fallback_action, "notifying team of fallback activation");
        }
    }
}

/// Built-in fallback operation names (spec §4.4's "must include at minimum" list).
pub mod builtin {
    pub const ROUTE_TO_ALTERNATE: &str = "route_to_alternate_executor";
    pub const WRITE_LOCAL_FILE: &str = "write_local_file";
    pub const APPEND_CSV_ROW: &str = "append_csv_row";
    pub const CONSOLE_PRINT: &str = "console_print";
    pub const ENQUEUE_RETRY: &str = "enqueue_for_later_retry";
    pub const POST_WEBHOOK: &str = "post_webhook";
    pub const SEND_EMAIL: &str = "send_email";
}
