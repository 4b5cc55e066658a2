//! Circuit breaker (C3): one breaker per executor name, lazily created,
//! guarding calls with a Closed/Open/HalfOpen state machine and an optional
//! stale-cache fallback while Open (spec §4.3).

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actioncore_types::{CircuitError, CircuitStatsSnapshot, CoreEvent};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::event::EventBus;

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub reset_timeout: Duration,
    pub success_threshold: u32,
    pub request_timeout: Option<Duration>,
    pub cache_fallback: bool,
    pub fallback_max_age: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
            request_timeout: None,
            cache_fallback: false,
            fallback_max_age: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerState {
    state: State,
    consecutive_failures: u32,
    consecutive_successes: u32,
    failure_ring: VecDeque<Instant>,
    next_attempt_at: Option<Instant>,
    stale_cache: Option<(Value, Instant)>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: State::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            failure_ring: VecDeque::new(),
            next_attempt_at: None,
            stale_cache: None,
        }
    }

    fn snapshot(&self, executor: &str) -> CircuitStatsSnapshot {
        CircuitStatsSnapshot {
            executor: executor.to_string(),
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub value: Value,
    pub from_cache: bool,
}

/// A snapshot suitable for a status dashboard or health-check endpoint.
#[derive(Debug, Clone)]
pub struct CircuitStatusInfo {
    pub executor: String,
    pub is_open: bool,
    pub is_half_open: bool,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

pub struct CircuitBreaker {
    breakers: DashMap<String, Arc<Mutex<BreakerState>>>,
    default_config: CircuitConfig,
    overrides: DashMap<String, CircuitConfig>,
    events: EventBus,
}

impl CircuitBreaker {
    pub fn new(default_config: CircuitConfig, events: EventBus) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
            overrides: DashMap::new(),
            events,
        }
    }

    /// Register a non-default config for one executor.
    pub fn configure(&self, executor: &str, config: CircuitConfig) {
        self.overrides.insert(executor.to_string(), config);
    }

    fn config_for(&self, executor: &str) -> CircuitConfig {
        self.overrides
            .get(executor)
            .map(|c| c.clone())
            .unwrap_or_else(|| self.default_config.clone())
    }

    fn get_or_create(&self, executor: &str) -> Arc<Mutex<BreakerState>> {
        self.breakers
            .entry(executor.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BreakerState::new())))
            .clone()
    }

    pub async fn status(&self, executor: &str) -> Option<CircuitStatusInfo> {
        let breaker = self.breakers.get(executor)?.clone();
        let state = breaker.lock().await;
        Some(CircuitStatusInfo {
            executor: executor.to_string(),
            is_open: state.state == State::Open,
            is_half_open: state.state == State::HalfOpen,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
        })
    }

    /// Execute `f` through the breaker for `executor`. `f` is typically the
    /// entire idempotency-free retry+executor call for one action, per the
    /// `idempotency -> circuit breaker -> retry -> executor` stacking order
    /// in spec §4.7d.
    pub async fn call<F, Fut>(&self, executor: &str, f: F) -> Result<CallOutcome, CircuitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, String>>,
    {
        let config = self.config_for(executor);
        let breaker = self.get_or_create(executor);

        enum Decision {
            Proceed { is_half_open: bool },
            RejectStale(Value),
            RejectOpen,
        }

        let decision = {
            let mut state = breaker.lock().await;
            match state.state {
                State::Closed => Decision::Proceed { is_half_open: false },
                State::HalfOpen => Decision::Proceed { is_half_open: true },
                State::Open => {
                    let now = Instant::now();
                    let due = state.next_attempt_at.map(|t| now >= t).unwrap_or(true);
                    if due {
                        state.state = State::HalfOpen;
                        state.consecutive_successes = 0;
                        self.events.publish(CoreEvent::CircuitHalfOpen {
                            executor: executor.to_string(),
                            stats: state.snapshot(executor),
                        });
                        Decision::Proceed { is_half_open: true }
                    } else if config.cache_fallback {
                        match &state.stale_cache {
                            Some((value, at)) if now.duration_since(*at) <= config.fallback_max_age => {
                                Decision::RejectStale(value.clone())
                            }
                            _ => Decision::RejectOpen,
                        }
                    } else {
                        Decision::RejectOpen
                    }
                }
            }
        };

        match decision {
            Decision::RejectOpen => {
                self.events.publish(CoreEvent::RequestRejected {
                    executor: executor.to_string(),
                    reason: "circuit_open".to_string(),
                });
                Err(CircuitError::Open {
                    executor: executor.to_string(),
                })
            }
            Decision::RejectStale(value) => Ok(CallOutcome {
                value,
                from_cache: true,
            }),
            Decision::Proceed { is_half_open } => {
                self.execute_and_record(executor, &config, breaker, is_half_open, f)
                    .await
            }
        }
    }

    async fn execute_and_record<F, Fut>(
        &self,
        executor: &str,
        config: &CircuitConfig,
        breaker: Arc<Mutex<BreakerState>>,
        is_half_open: bool,
        f: F,
    ) -> Result<CallOutcome, CircuitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, String>>,
    {
        let started = Instant::now();
        let (result, timed_out) = match config.request_timeout {
            Some(d) => match tokio::time::timeout(d, f()).await {
                Ok(r) => (r, false),
                Err(_) => (Err("request timed out".to_string()), true),
            },
            None => (f().await, false),
        };

        let mut state = breaker.lock().await;
        match result {
            Ok(value) => {
                state.consecutive_failures = 0;
                if is_half_open {
                    state.consecutive_successes += 1;
                    if state.consecutive_successes >= config.success_threshold {
                        state.state = State::Closed;
                        state.failure_ring.clear();
                        state.consecutive_successes = 0;
                        self.events.publish(CoreEvent::CircuitClosed {
                            executor: executor.to_string(),
                            stats: state.snapshot(executor),
                        });
                    }
                } else if config.cache_fallback {
                    state.stale_cache = Some((value.clone(), Instant::now()));
                }
                self.events.publish(CoreEvent::RequestSuccess {
                    executor: executor.to_string(),
                    latency_ms: started.elapsed().as_millis() as u64,
                });
                Ok(CallOutcome {
                    value,
                    from_cache: false,
                })
            }
            Err(message) => {
                state.consecutive_successes = 0;
                state.consecutive_failures += 1;
                let now = Instant::now();
                state.failure_ring.push_back(now);
                while let Some(front) = state.failure_ring.front() {
                    if now.duration_since(*front) > config.failure_window {
                        state.failure_ring.pop_front();
                    } else {
                        break;
                    }
                }

                let should_open = is_half_open || state.failure_ring.len() as u32 >= config.failure_threshold;
                if should_open {
                    state.state = State::Open;
                    state.next_attempt_at = Some(now + config.reset_timeout);
                    warn!(executor, "circuit opened");
                    self.events.publish(CoreEvent::CircuitOpened {
                        executor: executor.to_string(),
                        stats: state.snapshot(executor),
                    });
                }

                self.events.publish(CoreEvent::RequestFailure {
                    executor: executor.to_string(),
                    error: message.clone(),
                });

                if timed_out {
                    Err(CircuitError::RequestTimeout {
                        executor: executor.to_string(),
                    })
                } else {
                    Err(CircuitError::CallFailed {
                        executor: executor.to_string(),
                        message,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitConfig {
                failure_threshold: 5,
                failure_window: Duration::from_secs(60),
                reset_timeout: Duration::from_millis(1000),
                success_threshold: 2,
                request_timeout: None,
                cache_fallback: false,
                fallback_max_age: Duration::from_secs(300),
            },
            EventBus::new(16),
        )
    }

    #[tokio::test]
    async fn scenario_s2_open_half_open_close() {
        let cb = breaker();

        for _ in 0..5 {
            let result = cb
                .call("trello", || async { Err::<Value, _>("boom".to_string()) })
                .await;
            assert!(result.is_err());
        }

        let rejected = cb.call("trello", || async { Ok(Value::Null) }).await;
        assert!(matches!(rejected, Err(CircuitError::Open { .. })));

        tokio::time::sleep(Duration::from_millis(1010)).await;

        let first_half_open = cb.call("trello", || async { Ok(Value::Bool(true)) }).await;
        assert!(first_half_open.is_ok());
        let second_half_open = cb.call("trello", || async { Ok(Value::Bool(true)) }).await;
        assert!(second_half_open.is_ok());

        let status = cb.status("trello").await.unwrap();
        assert!(!status.is_open);
        assert!(!status.is_half_open);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = breaker();
        for _ in 0..5 {
            let _ = cb
                .call("trello", || async { Err::<Value, _>("boom".to_string()) })
                .await;
        }
        tokio::time::sleep(Duration::from_millis(1010)).await;

        let result = cb
            .call("trello", || async { Err::<Value, _>("still broken".to_string()) })
            .await;
        assert!(result.is_err());

        let status = cb.status("trello").await.unwrap();
        assert!(status.is_open);
    }

    #[tokio::test]
    async fn stale_cache_served_while_open() {
        let cb = CircuitBreaker::new(
            CircuitConfig {
                failure_threshold: 1,
                failure_window: Duration::from_secs(60),
                reset_timeout: Duration::from_secs(3600),
                success_threshold: 1,
                request_timeout: None,
                cache_fallback: true,
                fallback_max_age: Duration::from_secs(300),
            },
            EventBus::new(16),
        );

        let ok = cb
            .call("notion", || async { Ok(serde_json::json!({"id": "p1"})) })
            .await
            .unwrap();
        assert!(!ok.from_cache);

        let failed = cb
            .call("notion", || async { Err::<Value, _>("down".to_string()) })
            .await;
        assert!(failed.is_err());

        let stale = cb.call("notion", || async { Ok(Value::Null) }).await.unwrap();
        assert!(stale.from_cache);
        assert_eq!(stale.value, serde_json::json!({"id": "p1"}));
    }

    #[tokio::test]
    async fn concurrent_calls_only_invoke_underlying_once_each() {
        let cb = Arc::new(breaker());
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let cb = cb.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                cb.call("trello", || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(Value::Null)
                    }
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
