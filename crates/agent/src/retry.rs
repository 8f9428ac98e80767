//! Bounded retry with linear backoff for model calls.
//!
//! ```text
//! ATTEMPT(n) ── ok ──────────────────────────────▶ SUCCESS
//!     │
//!     ├── 503, n < max ──▶ WAIT(n × step) ──▶ ATTEMPT(n+1)
//!     ├── 503, n = max ──▶ REPORT (exhausted)
//!     └── anything else ─▶ REPORT
//! ```
//!
//! Rate limiting (429) is reported immediately: the delay the upstream asks
//! for usually exceeds what a chat turn can wait.

use sagebot_config::RetrySettings;
use sagebot_core::error::{ProviderError, TurnError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then make attempt `next_attempt`.
    Retry { next_attempt: u32, delay: Duration },
    /// Report the failure; `exhausted` when it was retryable but attempts ran out.
    Report { exhausted: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(1000))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_step,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_attempts,
            Duration::from_millis(settings.backoff_step_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before the attempt after attempt `n` (1-based): `n × step`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }

    /// Classify the failure of attempt `attempt` (1-based).
    pub fn decide(&self, attempt: u32, error: &ProviderError) -> RetryDecision {
        if !error.is_retryable() {
            RetryDecision::Report { exhausted: false }
        } else if attempt >= self.max_attempts {
            RetryDecision::Report { exhausted: true }
        } else {
            RetryDecision::Retry {
                next_attempt: attempt + 1,
                delay: self.backoff(attempt),
            }
        }
    }

    /// Run `op` until it succeeds or the policy reports its failure.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, TurnError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 1;
        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match self.decide(attempt, &error) {
                RetryDecision::Retry {
                    next_attempt,
                    delay,
                } => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Model call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next_attempt;
                }
                RetryDecision::Report { exhausted: true } => {
                    return Err(TurnError::UpstreamExhausted {
                        attempts: attempt,
                        source: error,
                    });
                }
                RetryDecision::Report { exhausted: false } => return Err(error.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn unavailable() -> ProviderError {
        ProviderError::Unavailable {
            message: "model overloaded".into(),
        }
    }

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(4), Duration::from_millis(4000));
    }

    #[test]
    fn decisions() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(1, &unavailable()),
            RetryDecision::Retry {
                next_attempt: 2,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            policy.decide(5, &unavailable()),
            RetryDecision::Report { exhausted: true }
        );
        assert_eq!(
            policy.decide(
                1,
                &ProviderError::RateLimited {
                    retry_after_secs: Some(22),
                    message: "quota".into()
                }
            ),
            RetryDecision::Report { exhausted: false }
        );
        assert_eq!(
            policy.decide(1, &ProviderError::Network("reset".into())),
            RetryDecision::Report { exhausted: false }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn two_unavailable_then_success_waits_one_then_two_seconds() {
        let attempts = Mutex::new(Vec::new());
        let start = Instant::now();

        let result = RetryPolicy::default()
            .run(|| {
                let mut log = attempts.lock().unwrap();
                log.push(start.elapsed());
                let n = log.len();
                async move {
                    if n <= 2 {
                        Err(unavailable())
                    } else {
                        Ok("answer")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "answer");
        let log = attempts.into_inner().unwrap();
        assert_eq!(
            log,
            vec![
                Duration::ZERO,
                Duration::from_millis(1000),
                Duration::from_millis(3000)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_is_reported_after_one_attempt() {
        let calls = Mutex::new(0u32);
        let result: Result<(), _> = RetryPolicy::default()
            .run(|| {
                *calls.lock().unwrap() += 1;
                async {
                    Err(ProviderError::RateLimited {
                        retry_after_secs: Some(22),
                        message: "quota".into(),
                    })
                }
            })
            .await;

        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(matches!(
            result.unwrap_err(),
            TurnError::Upstream(ProviderError::RateLimited { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempt_count() {
        let calls = Mutex::new(0u32);
        let result: Result<(), _> = RetryPolicy::new(3, Duration::from_millis(10))
            .run(|| {
                *calls.lock().unwrap() += 1;
                async { Err(unavailable()) }
            })
            .await;

        assert_eq!(*calls.lock().unwrap(), 3);
        match result.unwrap_err() {
            TurnError::UpstreamExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected {other:?}"),
        }
    }
}
