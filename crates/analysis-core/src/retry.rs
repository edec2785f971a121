use std::future::Future;
use std::time::Duration;

use crate::ProviderError;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * factor^attempt`, capped.
    Exponential { base: Duration, factor: u32, cap: Duration },
}

impl Backoff {
    /// Delay to wait after the failed attempt with the given zero-based index.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Exponential { base, factor, cap } => {
                let mult = factor.saturating_pow(attempt);
                base.saturating_mul(mult).min(cap)
            }
        }
    }
}

/// Bounded retry loop shared by every provider.
///
/// Retrying is private to a provider: exhausting the attempts returns the
/// last error to the caller, which then escalates to the next tier.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    retry_on: fn(&ProviderError) -> bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff, retry_on: fn(&ProviderError) -> bool) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            retry_on,
        }
    }

    /// Single attempt; local lookups either have the value or don't.
    pub fn cache() -> Self {
        Self::new(1, Backoff::Fixed(Duration::ZERO), |_| false)
    }

    /// Two attempts two seconds apart on transient failures.
    pub fn scrape() -> Self {
        Self::new(2, Backoff::Fixed(Duration::from_secs(2)), ProviderError::is_transient)
    }

    /// Five attempts with 1, 2, 4, 8 s waits, retried on rate limiting and
    /// transport failures only.
    pub fn llm() -> Self {
        Self::new(
            5,
            Backoff::Exponential {
                base: Duration::from_secs(1),
                factor: 2,
                cap: Duration::from_secs(30),
            },
            |err| {
                err.is_rate_limited()
                    || matches!(err, ProviderError::Unavailable(_) | ProviderError::Timeout(_))
            },
        )
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retry_on(mut self, retry_on: fn(&ProviderError) -> bool) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub fn is_retryable(&self, err: &ProviderError) -> bool {
        (self.retry_on)(err)
    }

    /// Wall time of a run in which every attempt takes `per_attempt` and fails.
    pub fn worst_case(&self, per_attempt: Duration) -> Duration {
        let waits: Duration = (0..self.max_attempts.saturating_sub(1)).map(|a| self.backoff.delay(a)).sum();
        per_attempt.saturating_mul(self.max_attempts) + waits
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. `op` receives the zero-based attempt index.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let last = attempt + 1 >= self.max_attempts;
                    if last || !self.is_retryable(&err) {
                        if attempt > 0 {
                            tracing::warn!(
                                "{}: giving up after {} attempt(s): {}",
                                label,
                                attempt + 1,
                                err
                            );
                        }
                        return Err(err);
                    }
                    let wait = self.backoff.delay(attempt);
                    tracing::warn!(
                        "{}: attempt {}/{} failed ({}), retrying in {:.1}s",
                        label,
                        attempt + 1,
                        self.max_attempts,
                        err,
                        wait.as_secs_f64()
                    );
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant(policy: RetryPolicy) -> RetryPolicy {
        policy.with_backoff(Backoff::Fixed(Duration::ZERO))
    }

    #[test]
    fn test_exponential_schedule() {
        let backoff = RetryPolicy::llm().backoff;
        let waits: Vec<u64> = (0..5).map(|a| backoff.delay(a).as_secs()).collect();
        assert_eq!(waits, vec![1, 2, 4, 8, 16]);

        let capped = Backoff::Exponential {
            base: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(5),
        };
        assert_eq!(capped.delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_worst_case_budget() {
        let llm = RetryPolicy::llm();
        // five 10s attempts plus 1 + 2 + 4 + 8 s of backoff
        assert_eq!(llm.worst_case(Duration::from_secs(10)), Duration::from_secs(65));
        assert_eq!(RetryPolicy::cache().worst_case(Duration::from_secs(3)), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_retries_rate_limits_until_success() {
        let calls = AtomicU32::new(0);
        let result = instant(RetryPolicy::llm())
            .run("test", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(ProviderError::Status(429))
                    } else {
                        Ok("value")
                    }
                }
            })
            .await;
        assert_eq!(result, Ok("value"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = instant(RetryPolicy::llm())
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::RateLimited("slow down".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = instant(RetryPolicy::llm())
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Status(403)) }
            })
            .await;
        assert_eq!(result, Err(ProviderError::Status(403)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_policy_never_retries() {
        let calls = AtomicU32::new(0);
        let _: Result<(), _> = RetryPolicy::cache()
            .run("cache", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Unavailable("down".into())) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
