//! Blocking request plumbing shared by the registry and wiki clients.

use std::env;
use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use reqwest::blocking::{RequestBuilder, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    /// Scales every backoff step; writes back off harder than reads.
    pub multiplier: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, retry_delay_ms: u64) -> Self {
        Self {
            max_retries,
            retry_delay_ms,
            multiplier: 1,
        }
    }

    pub fn with_multiplier(mut self, multiplier: u64) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    /// Backoff before retry number `attempt + 1`, without jitter.
    pub fn delay(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let millis = self
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .saturating_mul(self.multiplier);
        Duration::from_millis(millis)
    }

    fn wait(&self, attempt: usize) {
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(self.delay(attempt) + Duration::from_millis(jitter));
    }
}

/// Send `request`, retrying transport failures and retryable statuses.
///
/// `before_attempt` runs ahead of every attempt (rate limiting, request
/// counting). The final response is returned whatever its status.
pub fn send_with_retry<F>(
    request: RequestBuilder,
    policy: &RetryPolicy,
    target: &str,
    mut before_attempt: F,
) -> Result<Response>
where
    F: FnMut(usize),
{
    for attempt in 0..=policy.max_retries {
        before_attempt(attempt);
        let attempt_request = request
            .try_clone()
            .ok_or_else(|| anyhow!("request to {target} is not retryable"))?;
        match attempt_request.send() {
            Ok(response) => {
                if attempt < policy.max_retries && is_retryable_status(response.status()) {
                    policy.wait(attempt);
                    continue;
                }
                return Ok(response);
            }
            Err(error) => {
                if attempt < policy.max_retries && is_retryable_error(&error) {
                    policy.wait(attempt);
                    continue;
                }
                return Err(error).with_context(|| format!("failed to call {target}"));
            }
        }
    }

    Err(anyhow!("request to {target} exhausted retry budget"))
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

pub fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

pub fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}
