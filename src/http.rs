use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn retry_delay(attempt: u32, policy: &RetryPolicy, retry_after: Option<&str>) -> Duration {
    if let Some(secs) = retry_after.and_then(|v| v.parse::<u64>().ok()) {
        return Duration::from_secs(secs.min(30));
    }
    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(
        policy
            .initial_backoff_ms
            .saturating_mul(exponent)
            .min(policy.max_backoff_ms),
    )
}

/// Send a request, retrying rate limits, 5xx and transport hiccups.
///
/// The final response is returned whatever its status; callers map errors.
pub async fn send_with_retry(
    request: RequestBuilder,
    policy: &RetryPolicy,
) -> Result<Response, reqwest::Error> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..attempts {
        let Some(cloned) = request.try_clone() else {
            break;
        };
        match cloned.send().await {
            Ok(response) if is_retryable(response.status()) => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok());
                let delay = retry_delay(attempt, policy, retry_after);
                warn!(
                    "retry {}/{} after status {} (sleep {:?})",
                    attempt,
                    attempts,
                    response.status(),
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Ok(response) => return Ok(response),
            Err(e) if e.is_timeout() || e.is_connect() => {
                let delay = retry_delay(attempt, policy, None);
                warn!("retry {}/{} after transport error: {} (sleep {:?})", attempt, attempts, e, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
    request.send().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(retry_delay(1, &p, None), Duration::from_millis(500));
        assert_eq!(retry_delay(2, &p, None), Duration::from_millis(1000));
        assert_eq!(retry_delay(10, &p, None), Duration::from_millis(8000));
    }

    #[test]
    fn retry_after_header_wins() {
        let p = RetryPolicy::default();
        assert_eq!(retry_delay(1, &p, Some("3")), Duration::from_secs(3));
        assert_eq!(retry_delay(1, &p, Some("600")), Duration::from_secs(30));
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
    }
}
