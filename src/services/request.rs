// src/services/request.rs

//! Outbound request layer: the shared client wrapped in a retry decorator.
//!
//! Retries are driven by explicit [`Verdict`] values consumed by a loop, not
//! by catching errors ad hoc: every attempt classifies its result as success,
//! retry-worthy or terminal, and the loop owns the backoff schedule.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{AppError, Result};
use crate::models::RetryPolicy;

/// Extra jitter added even when the backoff delay has been capped.
const MAX_EXTRA_JITTER_MS: u64 = 50;

/// Classification of one attempt.
#[derive(Debug)]
pub enum Verdict<T> {
    /// Attempt succeeded
    Success(T),
    /// Transient failure; retry with backoff
    Retry(String),
    /// Terminal failure; surface immediately
    Fail(AppError),
}

/// Backoff delay before the next attempt: exponential in the attempt number
/// with up-to-equal jitter, capped at the policy's max delay, plus a little
/// extra jitter so capped waiters don't thunder together.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(20);
    let base = policy.base_delay_ms.saturating_mul(1 << shift) / 2;
    let mut rng = rand::thread_rng();
    let jitter = rng.gen_range(0..=base.max(1));
    let wait = (base + jitter).min(policy.max_delay_ms);
    Duration::from_millis(wait + rng.gen_range(0..=MAX_EXTRA_JITTER_MS))
}

/// Drive an attempt closure under the retry policy.
///
/// Gives up with `ExhaustedRetries` after `max_retries` attempts, or earlier
/// once the total time spent waiting exceeds the policy's hard ceiling.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut attempt_op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Verdict<T>>,
{
    let mut waited = Duration::ZERO;

    for attempt in 1..=policy.max_retries {
        match attempt_op(attempt).await {
            Verdict::Success(value) => return Ok(value),
            Verdict::Fail(error) => return Err(error),
            Verdict::Retry(reason) => {
                if attempt == policy.max_retries || waited >= policy.max_total_wait() {
                    return Err(AppError::ExhaustedRetries {
                        attempts: attempt,
                        last: reason,
                    });
                }
                let delay = backoff_delay(policy, attempt);
                tokio::time::sleep(delay).await;
                waited += delay;
            }
        }
    }

    Err(AppError::ExhaustedRetries {
        attempts: policy.max_retries,
        last: "retry budget exhausted".to_string(),
    })
}

/// A successfully completed HTTP exchange.
///
/// Non-retryable statuses (404 and friends) are returned here rather than
/// raised; callers inspect `status` and decide.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub status: u16,
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
    pub final_url: String,
}

impl Fetched {
    /// Body decoded as UTF-8, lossily. Charset repair happens later in the
    /// cleaning stage.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404 || self.status == 410
    }
}

/// Shared outbound HTTP capability with retry/backoff.
#[derive(Clone)]
pub struct RequestClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl RequestClient {
    pub fn new(client: reqwest::Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// A clone of this client with a different retry policy, for sources
    /// that override the defaults.
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            client: self.client.clone(),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET a URL, retrying transport failures and retryable statuses.
    pub async fn get(&self, url: &str) -> Result<Fetched> {
        let policy = self.policy.clone();
        retry(&policy, |_attempt| {
            let client = self.client.clone();
            let policy = self.policy.clone();
            let url = url.to_string();
            async move {
                let response = match client.get(&url).send().await {
                    Ok(response) => response,
                    Err(error) => return classify_transport_error(error),
                };

                let status = response.status().as_u16();
                if policy.is_retryable_status(status) {
                    return Verdict::Retry(format!("status {status} from {url}"));
                }

                let mime = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
                let final_url = response.url().to_string();

                match response.bytes().await {
                    Ok(bytes) => Verdict::Success(Fetched {
                        status,
                        mime,
                        bytes: bytes.to_vec(),
                        final_url,
                    }),
                    // A body that dies mid-transfer is as transient as a
                    // refused connection.
                    Err(error) => Verdict::Retry(format!("body read failed: {error}")),
                }
            }
        })
        .await
    }
}

fn classify_transport_error<T>(error: reqwest::Error) -> Verdict<T> {
    if error.is_builder() || error.is_redirect() {
        Verdict::Fail(error.into())
    } else {
        Verdict::Retry(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 2,
            max_total_wait_ms: 10_000,
            retryable_statuses: vec![429, 503],
        }
    }

    #[tokio::test]
    async fn succeeds_without_retrying() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32> = retry(&fast_policy(5), |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Verdict::Success(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_exactly_max_retries_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = retry(&fast_policy(4), |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Verdict::Retry("status 429".to_string()) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        match result {
            Err(AppError::ExhaustedRetries { attempts: n, last }) => {
                assert_eq!(n, 4);
                assert!(last.contains("429"));
            }
            other => panic!("expected ExhaustedRetries, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn terminal_failures_surface_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = retry(&fast_policy(5), |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Verdict::Fail(AppError::not_found("gone")) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result: Result<&str> = retry(&fast_policy(5), |_| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Verdict::Retry("connection reset".to_string())
                } else {
                    Verdict::Success("body")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "body");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_is_bounded_by_max_delay() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
            max_total_wait_ms: 60_000,
            retryable_statuses: vec![429],
        };
        for attempt in 1..=30 {
            let delay = backoff_delay(&policy, attempt);
            assert!(delay.as_millis() as u64 <= policy.max_delay_ms + MAX_EXTRA_JITTER_MS);
        }
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 1_000_000,
            max_total_wait_ms: u64::MAX,
            retryable_statuses: vec![],
        };
        // Attempt 8's minimum (no jitter) exceeds attempt 1's maximum
        // (full jitter plus extra).
        let early_max = policy.base_delay_ms / 2 * 2 + MAX_EXTRA_JITTER_MS;
        let late_min = policy.base_delay_ms * (1 << 7) / 2;
        assert!(late_min > early_max);
        let late = backoff_delay(&policy, 8);
        assert!(late.as_millis() as u64 >= late_min);
    }
}
