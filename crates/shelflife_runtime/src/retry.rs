//! Exponential backoff for failed stage attempts.

use rand::Rng;
use shelflife_core::{PipelineError, PipelineResult, RetryPolicy};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shortest delay ever slept between attempts
pub const MIN_DELAY: Duration = Duration::from_millis(100);

/// Jitter amplitude as a fraction of the delay
const JITTER: f64 = 0.1;

/// Delay before retry number `retry` (1-based)
///
/// `jitter` is a factor in `[-1, 1]` scaled to +/-10% of the delay; it is
/// ignored when the policy disables jitter.
#[must_use]
pub fn delay_for(policy: &RetryPolicy, retry: u32, jitter: f64) -> Duration {
    let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
    let mut secs = policy.base_delay_secs * policy.exponential_base.powi(exponent);
    if !secs.is_finite() || secs > policy.max_delay_secs {
        secs = policy.max_delay_secs;
    }
    if policy.jitter {
        secs *= 1.0 + JITTER * jitter.clamp(-1.0, 1.0);
    }
    Duration::from_secs_f64(secs.max(MIN_DELAY.as_secs_f64()))
}

/// Randomized delay before retry number `retry`
#[must_use]
pub fn backoff_delay(policy: &RetryPolicy, retry: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(-1.0..=1.0);
    delay_for(policy, retry, jitter)
}

/// Result of a retried operation
#[derive(Debug)]
pub struct Attempted<T> {
    /// Last attempt's result
    pub result: PipelineResult<T>,
    /// Attempts made, at least one
    pub attempts: u32,
}

impl<T> Attempted<T> {
    /// Retries beyond the first attempt
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted
///
/// Cancellation is observed while waiting between attempts; an attempt in
/// progress always completes.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PipelineResult<T>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = op().await;
        let err = match result {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts,
                }
            }
            Err(err) => err,
        };

        if !err.is_retryable() || attempts > policy.max_retries {
            return Attempted {
                result: Err(err),
                attempts,
            };
        }

        let delay = backoff_delay(policy, attempts);
        tracing::warn!(
            stage = label,
            attempt = attempts,
            delay_secs = delay.as_secs_f64(),
            error = %err,
            "attempt failed, retrying"
        );
        tokio::select! {
            () = cancel.cancelled() => {
                return Attempted {
                    result: Err(PipelineError::Cancelled { stage: label.to_string() }),
                    attempts,
                };
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    fn persistence() -> PipelineError {
        PipelineError::Persistence {
            reason: "disk full".to_string(),
        }
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let p = policy();
        assert_eq!(delay_for(&p, 1, 0.0), Duration::from_secs(60));
        assert_eq!(delay_for(&p, 2, 0.0), Duration::from_secs(120));
        assert_eq!(delay_for(&p, 3, 0.0), Duration::from_secs(240));
    }

    #[test]
    fn test_delay_capped() {
        let p = policy();
        assert_eq!(delay_for(&p, 20, 0.0), Duration::from_secs(3600));
        assert_eq!(delay_for(&p, u32::MAX, 0.0), Duration::from_secs(3600));
    }

    #[test]
    fn test_jitter_bounds() {
        let p = RetryPolicy::default();
        assert!((delay_for(&p, 1, 1.0).as_secs_f64() - 66.0).abs() < 1e-6);
        assert!((delay_for(&p, 1, -1.0).as_secs_f64() - 54.0).abs() < 1e-6);
        for _ in 0..100 {
            let d = backoff_delay(&p, 1).as_secs_f64();
            assert!((53.999..=66.001).contains(&d));
        }
    }

    #[test]
    fn test_delay_floor() {
        let p = RetryPolicy {
            base_delay_secs: 0.0,
            ..policy()
        };
        assert_eq!(delay_for(&p, 1, 0.0), MIN_DELAY);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let p = policy().with_base_delay(Duration::ZERO);
        let attempted = retry(&p, &CancellationToken::new(), "features", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(persistence())
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(attempted.result, Ok(7));
        assert_eq!(attempted.attempts, 3);
        assert_eq!(attempted.retries(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let p = policy().with_max_retries(2).with_base_delay(Duration::ZERO);
        let attempted: Attempted<()> =
            retry(&p, &CancellationToken::new(), "risk_scoring", || async {
                Err(persistence())
            })
            .await;
        assert_eq!(attempted.attempts, 3);
        assert_eq!(attempted.result, Err(persistence()));
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let attempted: Attempted<()> =
            retry(&policy(), &CancellationToken::new(), "features", || async {
                Err(PipelineError::ConcurrencyConflict {
                    job_name: "nightly".to_string(),
                })
            })
            .await;
        assert_eq!(attempted.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let token = CancellationToken::new();
        token.cancel();
        let attempted: Attempted<()> = retry(&policy(), &token, "features", || async {
            Err(persistence())
        })
        .await;
        assert_eq!(attempted.attempts, 1);
        assert_eq!(
            attempted.result,
            Err(PipelineError::Cancelled {
                stage: "features".to_string()
            })
        );
    }

    proptest! {
        #[test]
        fn test_delay_monotone_without_jitter(base in 0.0f64..120.0, a in 1u32..40, b in 1u32..40) {
            let p = RetryPolicy { base_delay_secs: base, ..policy() };
            let (lo, hi) = (a.min(b), a.max(b));
            prop_assert!(delay_for(&p, lo, 0.0) <= delay_for(&p, hi, 0.0));
        }

        #[test]
        fn test_delay_within_bounds(retry in 1u32..100, jitter in -1.0f64..=1.0) {
            let p = RetryPolicy::default();
            let secs = delay_for(&p, retry, jitter).as_secs_f64();
            prop_assert!(secs >= MIN_DELAY.as_secs_f64());
            prop_assert!(secs <= p.max_delay_secs * 1.1 + 1e-6);
        }
    }
}
