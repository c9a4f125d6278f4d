//! Retry with exponential backoff for transient failures

use std::fmt::Display;
use std::time::Duration;

/// Exponential backoff: `base * multiplier^(attempt-1)`, capped at `cap`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Retries after the first attempt (0 = fail on first error)
    pub max_retries: u32,
    pub base: Duration,
    pub multiplier: f64,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base: Duration::from_millis(100),
            multiplier: 2.0,
            cap: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.cap.as_secs_f64() {
            self.cap
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Retry a fallible operation with exponential backoff.
///
/// Errors for which `is_retryable` returns true are retried up to
/// `policy.max_retries` times, sleeping [`BackoffPolicy::delay`] in between.
/// Returns `Ok(T)` on first success, or the final `Err` on exhaustion / non-retryable error.
pub fn retry_with_backoff<T, E: Display>(
    label: &str,
    policy: &BackoffPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut attempt_fn: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let max_retries = policy.max_retries;
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && is_retryable(&e) => {
                attempt += 1;
                let delay = policy.delay(attempt);
                log::debug!(
                    "{label}: attempt {attempt}/{max_retries} failed: {e}, retrying in {delay:?}..."
                );
                std::thread::sleep(delay);
            }
            Err(e) => {
                log::error!("{label}: failed permanently: {e}");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_retries,
            base: Duration::from_millis(1),
            multiplier: 2.0,
            cap: Duration::from_millis(4),
        }
    }

    #[test]
    fn backoff_exponential() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base: Duration::from_secs(2),
            multiplier: 2.0,
            cap: Duration::from_secs(60),
        };
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_capped() {
        let policy = fast(10);
        assert_eq!(policy.delay(1), Duration::from_millis(1));
        assert_eq!(policy.delay(3), Duration::from_millis(4));
        assert_eq!(policy.delay(30), Duration::from_millis(4));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result: Result<u32, String> = retry_with_backoff(
            "test",
            &fast(3),
            |_| true,
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err("busy".to_string())
                } else {
                    Ok(7)
                }
            },
        );
        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhaustion_returns_last_error() {
        let calls = Cell::new(0);
        let result: Result<(), String> = retry_with_backoff(
            "test",
            &fast(2),
            |_| true,
            || {
                calls.set(calls.get() + 1);
                Err(format!("fail {}", calls.get()))
            },
        );
        assert_eq!(result, Err("fail 3".to_string()));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn non_retryable_fails_immediately() {
        let calls = Cell::new(0);
        let result: Result<(), String> = retry_with_backoff(
            "test",
            &fast(5),
            |_| false,
            || {
                calls.set(calls.get() + 1);
                Err("fatal".to_string())
            },
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn none_policy_never_retries() {
        assert_eq!(BackoffPolicy::none().max_retries, 0);
    }
}
