use anyhow::Error;
use reqwest::{Response, StatusCode};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry budget for a single provider request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: usize,
    /// Delay before the first retry, doubled each time.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: usize, base_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay.saturating_mul(2u32.pow(exponent))
    }
}

/// Rate limiting and gateway errors that are worth retrying.
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Retries an HTTP request with exponential backoff
///
/// # Parameters
/// - `operation`: Closure returning a request future
/// - `policy`: Retry budget and initial delay
///
/// # Returns
/// The first response that is not transient, the last transient response once
/// the budget is spent, or the final transport error.
pub async fn with_retry<F, Fut>(mut operation: F, policy: RetryPolicy) -> Result<Response, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Response, reqwest::Error>>,
{
    let mut attempt = 1;
    loop {
        let retryable = match operation().await {
            Ok(response) if is_transient_status(response.status()) => {
                if attempt > policy.retries {
                    return Ok(response);
                }
                format!("HTTP {}", response.status())
            }
            Ok(response) => return Ok(response),
            Err(err) if is_transient_error(&err) && attempt <= policy.retries => err.to_string(),
            Err(err) => return Err(err.into()),
        };

        let delay = policy.delay_for(attempt);
        debug!(
            "Attempt {}/{} failed: {}. Retrying in {:?}...",
            attempt,
            policy.retries + 1,
            retryable,
            delay
        );
        attempt += 1;
        tokio::time::sleep(delay).await;
    }
}
