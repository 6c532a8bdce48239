//! Shared retry policy for stage attempts and evaluation scenarios.
//!
//! Transient errors (`ServiceUnavailable`, `RateLimited`, `Timeout`) are
//! retried with exponential backoff up to `max_attempts`. `InvalidOutput`
//! is retried at most once per call site, with a corrective hint appended
//! to the prompt, and is terminal after that. `Rejected` is never retried.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::domain::error::{RetryClass, StageError};
use crate::metrics::METRICS;

/// One attempt as seen by the operation being retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based
    pub number: u32,
    /// Set on the attempt that follows an `InvalidOutput`
    pub corrective_hint: Option<String>,
    corrective_used: bool,
}

impl Attempt {
    pub fn first() -> Self {
        Self {
            number: 1,
            corrective_hint: None,
            corrective_used: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after failed attempt `attempt`: `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Decide whether `err` on `current` earns another attempt.
    pub fn next_attempt(&self, current: &Attempt, err: &StageError) -> Option<(Attempt, Duration)> {
        if current.number >= self.max_attempts {
            return None;
        }
        match err.retry_class() {
            RetryClass::Transient => Some((
                Attempt {
                    number: current.number + 1,
                    corrective_hint: None,
                    corrective_used: current.corrective_used,
                },
                self.backoff(current.number),
            )),
            RetryClass::Structural if !current.corrective_used => Some((
                Attempt {
                    number: current.number + 1,
                    corrective_hint: Some(corrective_hint(err)),
                    corrective_used: true,
                },
                Duration::ZERO,
            )),
            RetryClass::Structural | RetryClass::Fatal => None,
        }
    }

    /// Drive `op` until it succeeds or the policy gives up.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, StageError>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let mut attempt = Attempt::first();
        loop {
            match op(attempt.clone()).await {
                Ok(v) => return Ok(v),
                Err(err) => match self.next_attempt(&attempt, &err) {
                    Some((next, delay)) => {
                        METRICS.inc_stage_retries();
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        attempt = next;
                    }
                    None => return Err(err),
                },
            }
        }
    }
}

fn corrective_hint(err: &StageError) -> String {
    format!(
        "Your previous response was rejected ({err}). \
         Respond again following the requested output format exactly."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(&RetryConfig {
            max_attempts: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 250,
        })
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(250));
    }

    #[test]
    fn invalid_output_gets_exactly_one_corrective_retry() {
        let p = policy();
        let err = StageError::InvalidOutput("not json".into());
        let (second, delay) = p.next_attempt(&Attempt::first(), &err).unwrap();
        assert_eq!(delay, Duration::ZERO);
        assert!(second.corrective_hint.is_some());
        assert!(p.next_attempt(&second, &err).is_none());
    }

    #[test]
    fn rejected_requests_are_not_retried() {
        let err = StageError::Rejected("HTTP 401 Unauthorized".into());
        assert_eq!(err.retry_class(), RetryClass::Fatal);
        assert!(policy().next_attempt(&Attempt::first(), &err).is_none());
    }

    #[test]
    fn corrective_budget_survives_intervening_transient_error() {
        let p = RetryPolicy::new(&RetryConfig {
            max_attempts: 5,
            ..RetryConfig::default()
        });
        let invalid = StageError::InvalidOutput("x".into());
        let (a2, _) = p.next_attempt(&Attempt::first(), &invalid).unwrap();
        let (a3, _) = p.next_attempt(&a2, &StageError::Timeout(5)).unwrap();
        assert!(a3.corrective_hint.is_none());
        assert!(p.next_attempt(&a3, &invalid).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_after_max_attempts_on_timeout() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StageError> = policy()
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StageError::Timeout(1)) }
            })
            .await;
        assert_eq!(result, Err(StageError::Timeout(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_recovers_from_rate_limit() {
        let calls = AtomicU32::new(0);
        let result = policy()
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt.number < 2 {
                        Err(StageError::RateLimited("429".into()))
                    } else {
                        Ok(attempt.number)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
