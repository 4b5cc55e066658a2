//! Retry engine (C2): bounded-attempt execution with classify-aware backoff,
//! rate-limit-aware delay overrides, and a one-shot credential refresh path
//! (spec §4.2).

use std::future::Future;
use std::time::{Duration, Instant};

use actioncore_types::{BackoffStrategy, ErrorKind, Policy, RetryError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classify::{classify, extract_rate_limit, RawFailure};
use crate::executor::{CredentialRefresh, DynCredentialRefresh};

/// Hard ceiling on total wall-clock time spent retrying a single call,
/// regardless of `maxAttempts` (spec §4.2 step 1).
pub const GLOBAL_CAP: Duration = Duration::from_secs(300);

/// Notified once a call succeeds.
#[derive(Debug, Clone, Copy)]
pub struct SuccessInfo {
    pub attempts: u32,
    pub first_attempt: bool,
}

/// Notified before each retry sleep.
#[derive(Debug, Clone)]
pub struct RetryAttemptInfo {
    pub attempt: u32,
    pub kind: ErrorKind,
    pub delay_ms: u64,
}

/// Observer invoked at the points spec §4.2 calls out ("invoke success
/// hook" / "invoke retry hook"). Default methods are no-ops so callers only
/// implement what they need.
pub trait RetryHooks: Send + Sync {
    fn on_success(&self, _info: SuccessInfo) {}
    fn on_retry(&self, _info: RetryAttemptInfo) {}
}

/// A `RetryHooks` that does nothing, for callers with no observability needs.
pub struct NoopHooks;
impl RetryHooks for NoopHooks {}

/// Non-generic parameters bundled so the call site doesn't carry eight
/// positional arguments.
pub struct RetryCall<'a> {
    pub platform: &'a str,
    pub operation: &'a str,
    pub policy: &'a Policy,
    pub credential_refresh: Option<&'a dyn DynCredentialRefresh>,
    pub hooks: &'a dyn RetryHooks,
    pub cancel: &'a CancellationToken,
    /// Extra delay added on top of a platform's rate-limit hint, to absorb
    /// clock skew between us and the platform (spec §9, configurable rather
    /// than hardcoded). Defaults to 5s via `Default`.
    pub rate_limit_buffer_ms: u64,
}

/// Spec §9's default rate-limit buffer (5s) for call sites that don't read
/// it from `CoreConfig`.
pub const DEFAULT_RATE_LIMIT_BUFFER_MS: u64 = 5_000;

fn fib(n: u32) -> f64 {
    if n <= 1 {
        return 1.0;
    }
    let (mut a, mut b) = (1.0_f64, 1.0_f64);
    for _ in 2..=n {
        let next = a + b;
        a = b;
        b = next;
    }
    b
}

fn backoff_factor(strategy: BackoffStrategy, attempt: u32, multiplier: f64) -> f64 {
    match strategy {
        BackoffStrategy::Exp => multiplier.powi((attempt - 1) as i32),
        BackoffStrategy::Lin => attempt as f64,
        BackoffStrategy::Fixed => 1.0,
        BackoffStrategy::Fib => fib(attempt),
    }
}

/// Compute the delay before the next attempt per spec §4.2 step 7.
fn compute_delay(policy: &Policy, attempt: u32, kind: ErrorKind, failure: &RawFailure, rate_limit_buffer_ms: u64) -> u64 {
    if kind == ErrorKind::RateLimit {
        let hint = extract_rate_limit(failure);
        if let Some(reset_at_ms) = hint.reset_at_ms {
            let now_ms = chrono::Utc::now().timestamp_millis();
            let d = (reset_at_ms - now_ms + rate_limit_buffer_ms as i64).max(0) as u64;
            return d.min(policy.max_delay);
        }
        if let Some(retry_after_sec) = hint.retry_after_sec {
            let d = retry_after_sec * 1000 + rate_limit_buffer_ms;
            return d.min(policy.max_delay);
        }
    }

    let base = (policy.initial_delay as f64
        * backoff_factor(policy.backoff, attempt, policy.multiplier))
    .min(policy.max_delay as f64);
    let jitter_range = policy.jitter * base;
    let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
    let delay = (base + jitter).max(0.0).round() as u64;
    delay.min(policy.max_delay)
}

/// Run `attempt_fn` under the policy in `call`, retrying per spec §4.2.
///
/// `attempt_fn` is re-invoked for every attempt (including the one that
/// follows a credential refresh), so it must be idempotent on the caller's
/// side -- it is typically a closure capturing the executor call.
pub async fn retry<T, Fut, F>(call: &RetryCall<'_>, mut attempt_fn: F) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RawFailure>>,
{
    let start = Instant::now();
    let mut attempt: u32 = 1;
    let mut refreshed = false;
    let mut refresh_used_this_call = false;

    loop {
        if start.elapsed() > GLOBAL_CAP {
            warn!(platform = call.platform, operation = call.operation, "retry global cap exceeded");
            return Err(RetryError::GlobalCapExceeded);
        }
        if call.cancel.is_cancelled() {
            return Err(RetryError::Canceled);
        }

        let outcome = run_one_attempt(call, &mut attempt_fn).await?;

        match outcome {
            Ok(value) => {
                call.hooks.on_success(SuccessInfo {
                    attempts: attempt,
                    first_attempt: attempt == 1 && !refresh_used_this_call,
                });
                return Ok(value);
            }
            Err((kind, failure)) => {
                debug!(
                    platform = call.platform,
                    operation = call.operation,
                    attempt,
                    ?kind,
                    "attempt failed"
                );

                if kind == ErrorKind::Auth && call.policy.refresh_auth_on_error && !refreshed {
                    refreshed = true;
                    refresh_used_this_call = true;
                    match call.credential_refresh {
                        Some(refresher) => match refresher.refresh().await {
                            Ok(_) => continue,
                            Err(_) => return Err(RetryError::AuthFailed(failure.message)),
                        },
                        None => return Err(RetryError::AuthFailed(failure.message)),
                    }
                }

                if kind == ErrorKind::Auth && refreshed {
                    return Err(RetryError::AuthFailed(failure.message));
                }

                if kind == ErrorKind::Validation {
                    return Err(RetryError::Validation(failure.message));
                }
                if kind == ErrorKind::Canceled {
                    return Err(RetryError::Canceled);
                }

                if !call.policy.retryable.contains(&kind) {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        kind,
                        message: failure.message,
                    });
                }

                if attempt == call.policy.max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        kind,
                        message: failure.message,
                    });
                }

                let delay_ms = compute_delay(call.policy, attempt, kind, &failure, call.rate_limit_buffer_ms);
                call.hooks.on_retry(RetryAttemptInfo {
                    attempt,
                    kind,
                    delay_ms,
                });

                tokio::select! {
                    biased;
                    _ = call.cancel.cancelled() => return Err(RetryError::Canceled),
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }

                attempt += 1;
            }
        }
    }
}

/// Race one attempt against the per-attempt timeout (if any) and cancellation.
async fn run_one_attempt<T, Fut, F>(
    call: &RetryCall<'_>,
    attempt_fn: &mut F,
) -> Result<Result<T, (ErrorKind, RawFailure)>, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RawFailure>>,
{
    let fut = attempt_fn();

    let raw_result = if let Some(timeout_ms) = call.policy.timeout_per_attempt {
        tokio::select! {
            biased;
            _ = call.cancel.cancelled() => return Err(RetryError::Canceled),
            res = tokio::time::timeout(Duration::from_millis(timeout_ms), fut) => {
                match res {
                    Ok(inner) => inner,
                    Err(_) => return Ok(Err((ErrorKind::Timeout, RawFailure::new("attempt timed out")))),
                }
            }
        }
    } else {
        tokio::select! {
            biased;
            _ = call.cancel.cancelled() => return Err(RetryError::Canceled),
            res = fut => res,
        }
    };

    Ok(match raw_result {
        Ok(value) => Ok(value),
        Err(failure) => {
            let kind = classify(&failure);
            Err((kind, failure))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy_s1() -> Policy {
        Policy {
            max_attempts: 3,
            initial_delay: 1000,
            max_delay: 4000,
            backoff: BackoffStrategy::Exp,
            multiplier: 2.0,
            jitter: 0.0,
            retryable: [ErrorKind::Network, ErrorKind::RateLimit].into_iter().collect(),
            refresh_auth_on_error: false,
            timeout_per_attempt: None,
        }
    }

    #[test]
    fn delay_formula_matches_scenario_s1() {
        let policy = policy_s1();
        let first = compute_delay(&policy, 1, ErrorKind::Network, &RawFailure::new("x"), DEFAULT_RATE_LIMIT_BUFFER_MS);
        assert_eq!(first, 1000);

        let failure = RawFailure::new("rate limited").with_header("Retry-After", "1");
        let second = compute_delay(&policy, 2, ErrorKind::RateLimit, &failure, DEFAULT_RATE_LIMIT_BUFFER_MS);
        assert_eq!(second, 4000);
    }

    #[tokio::test]
    async fn scenario_s1_end_to_end() {
        let policy = policy_s1();
        let cancel = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let call = RetryCall {
            platform: "acme",
            operation: "create_task",
            policy: &policy,
            credential_refresh: None,
            hooks: &NoopHooks,
            cancel: &cancel,
            rate_limit_buffer_ms: DEFAULT_RATE_LIMIT_BUFFER_MS,
        };

        let result = retry(&call, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                match n {
                    1 => Err(RawFailure::new("connection refused")),
                    2 => Err(RawFailure::new("rate limited").with_header("Retry-After", "1")),
                    _ => Ok(42),
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn validation_errors_are_not_retried() {
        let policy = policy_s1();
        let cancel = CancellationToken::new();
        let call = RetryCall {
            platform: "acme",
            operation: "create_task",
            policy: &policy,
            credential_refresh: None,
            hooks: &NoopHooks,
            cancel: &cancel,
            rate_limit_buffer_ms: DEFAULT_RATE_LIMIT_BUFFER_MS,
        };
        let attempts = AtomicU32::new(0);

        let result: Result<(), RetryError> = retry(&call, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(RawFailure::new("validation failed: name is required").with_status(422)) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Validation(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_after_max_attempts() {
        let mut policy = policy_s1();
        policy.max_attempts = 2;
        let cancel = CancellationToken::new();
        let call = RetryCall {
            platform: "acme",
            operation: "create_task",
            policy: &policy,
            credential_refresh: None,
            hooks: &NoopHooks,
            cancel: &cancel,
            rate_limit_buffer_ms: DEFAULT_RATE_LIMIT_BUFFER_MS,
        };

        let result: Result<(), RetryError> =
            retry(&call, || async { Err(RawFailure::new("connection refused")) }).await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 2, kind: ErrorKind::Network, .. })
        ));
    }

    struct OkRefresher;
    impl CredentialRefresh for OkRefresher {
        async fn refresh(&self) -> Result<String, RawFailure> {
            Ok("new-token".to_string())
        }
    }

    #[tokio::test]
    async fn auth_refresh_does_not_consume_an_attempt() {
        let mut policy = policy_s1();
        policy.refresh_auth_on_error = true;
        policy.retryable = [ErrorKind::Network].into_iter().collect();
        let cancel = CancellationToken::new();
        let refresher = OkRefresher;
        let call = RetryCall {
            platform: "acme",
            operation: "create_task",
            policy: &policy,
            credential_refresh: Some(&refresher),
            hooks: &NoopHooks,
            cancel: &cancel,
            rate_limit_buffer_ms: DEFAULT_RATE_LIMIT_BUFFER_MS,
        };
        let attempts = AtomicU32::new(0);

        let result = retry(&call, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 1 {
                    Err(RawFailure::new("token expired").with_status(401))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn second_auth_failure_after_refresh_fails() {
        let mut policy = policy_s1();
        policy.refresh_auth_on_error = true;
        let cancel = CancellationToken::new();
        let refresher = OkRefresher;
        let call = RetryCall {
            platform: "acme",
            operation: "create_task",
            policy: &policy,
            credential_refresh: Some(&refresher),
            hooks: &NoopHooks,
            cancel: &cancel,
            rate_limit_buffer_ms: DEFAULT_RATE_LIMIT_BUFFER_MS,
        };

        let result: Result<(), RetryError> = retry(&call, || async {
            Err(RawFailure::new("token expired").with_status(401))
        })
        .await;

        assert!(matches!(result, Err(RetryError::AuthFailed(_))));
    }
}
