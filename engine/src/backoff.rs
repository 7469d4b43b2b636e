//! Bounded retries for a single outbound call.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::{
    error::{EngineError, EngineResult},
    upstream::{Outcome, UpstreamOutcome},
};

#[derive(Debug, Clone)]
pub struct BackoffExecutor {
    max_attempts: u32,
    /// Base for quota waits without a retry hint: `base * 2^attempt`.
    rate_limit_base: Duration,
    /// Base for waits after errors: `base * 2^attempt`.
    error_base: Duration,
}

impl Default for BackoffExecutor {
    fn default() -> Self {
        Self::new(3)
    }
}

impl BackoffExecutor {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            rate_limit_base: Duration::from_secs(5),
            error_base: Duration::from_secs(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn rate_limit_delay(&self, attempt: u32) -> Duration {
        self.rate_limit_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    fn error_delay(&self, attempt: u32) -> Duration {
        self.error_base.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `call` until it succeeds, making at most `max_attempts` calls.
    ///
    /// - A quota reply sleeps for its retry hint (or `5s * 2^attempt`) and
    ///   moves on to the next attempt.
    /// - An error reply or `Err` sleeps `1s * 2^attempt` and retries. On the
    ///   last attempt the reply is returned as-is, or the error propagated.
    /// - If every attempt was a quota reply, `RetriesExhausted` is returned.
    pub async fn execute<V, F, Fut>(&self, mut call: F) -> EngineResult<V>
    where
        V: UpstreamOutcome,
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        for attempt in 0..self.max_attempts {
            let is_last = attempt + 1 == self.max_attempts;

            match call().await {
                Ok(reply) => match reply.outcome() {
                    Outcome::Success => return Ok(reply),
                    Outcome::TooManyRequests { retry_after } => {
                        let wait = retry_after.unwrap_or_else(|| self.rate_limit_delay(attempt));
                        warn!(
                            "Rate limited by upstream (attempt {}), waiting {:?}",
                            attempt + 1,
                            wait
                        );
                        tokio::time::sleep(wait).await;
                    }
                    Outcome::Failure => {
                        if is_last {
                            return Ok(reply);
                        }
                        let wait = self.error_delay(attempt);
                        warn!(
                            "Upstream error response (attempt {}), retrying in {:?}",
                            attempt + 1,
                            wait
                        );
                        tokio::time::sleep(wait).await;
                    }
                },
                Err(err) => {
                    if is_last {
                        return Err(EngineError::Upstream(err));
                    }
                    let wait = self.error_delay(attempt);
                    warn!(
                        "Request failed (attempt {}): {:?}, retrying in {:?}",
                        attempt + 1,
                        err,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }

        Err(EngineError::RetriesExhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    struct Reply {
        status: u16,
        retry_after: Option<Duration>,
    }

    impl UpstreamOutcome for Reply {
        fn outcome(&self) -> Outcome {
            match self.status {
                200 => Outcome::Success,
                429 => Outcome::TooManyRequests {
                    retry_after: self.retry_after,
                },
                _ => Outcome::Failure,
            }
        }
    }

    /// Paused-clock sleeps land on millisecond ticks.
    fn assert_elapsed(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(50),
            "expected ~{:?}, got {:?}",
            expected,
            elapsed
        );
    }

    fn ok() -> Reply {
        Reply {
            status: 200,
            retry_after: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_returns_immediately() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let reply = BackoffExecutor::default()
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(ok()) }
            })
            .await
            .unwrap();

        assert_eq!(reply, ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_elapsed(start, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_hint_is_honored() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let reply = BackoffExecutor::default()
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok(Reply {
                            status: 429,
                            retry_after: Some(Duration::from_secs(2)),
                        })
                    } else {
                        Ok(ok())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(reply.status, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_elapsed(start, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_without_hint_backs_off_exponentially() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = BackoffExecutor::default()
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Ok(Reply {
                        status: 429,
                        retry_after: None,
                    })
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(EngineError::RetriesExhausted { attempts: 3 })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 5s + 10s + 20s
        assert_elapsed(start, Duration::from_secs(35));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_reply_returned_after_last_attempt() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let reply = BackoffExecutor::default()
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Ok(Reply {
                        status: 500,
                        retry_after: None,
                    })
                }
            })
            .await
            .unwrap();

        assert_eq!(reply.status, 500);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s, no sleep after the final attempt
        assert_elapsed(start, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_error_is_propagated() {
        let calls = AtomicU32::new(0);

        let result: EngineResult<Reply> = BackoffExecutor::new(2)
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(anyhow!("connection reset #{}", n)) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result {
            Err(EngineError::Upstream(err)) => assert_eq!(err.to_string(), "connection reset #1"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_error() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let reply = BackoffExecutor::default()
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(anyhow!("timeout"))
                    } else {
                        Ok(ok())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(reply, ok());
        assert_elapsed(start, Duration::from_secs(3));
    }
}
