//! Retry for backend requests.
//!
//! Reads are retried on any failure [`ApiError::is_retryable`] accepts.
//! Writes are retried only when the connection was never made, since the
//! backend does not deduplicate creates and a repeated POST could land twice.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};

use crate::error::{is_transient_status, ApiError};

/// Upper bound on random jitter added to each backoff.
const JITTER_MS: u64 = 150;

/// Longest `Retry-After` the client will honour.
const MAX_RETRY_AFTER_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff before attempt `attempt + 1`, capped, plus jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let base = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(base + rand::random_range(0..JITTER_MS))
    }
}

/// Whether repeating a request can change what the backend stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    Read,
    Write,
}

impl Idempotency {
    pub fn retries_status(self, status: u16) -> bool {
        self == Idempotency::Read && is_transient_status(status)
    }

    pub fn retries_error(self, err: &ApiError) -> bool {
        match self {
            Idempotency::Read => err.is_retryable(),
            Idempotency::Write => matches!(err, ApiError::Connect(_)),
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs: u64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    Some(Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)))
}

/// Send `request`, repeating it per `policy` while `kind` allows.
///
/// The last response is returned whatever its status; callers map non-2xx
/// to [`ApiError::Status`]. Requests with a streaming body cannot be cloned
/// and are sent once.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
    kind: Idempotency,
) -> Result<reqwest::Response, ApiError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let Some(this_try) = request.try_clone() else {
            return request.send().await.map_err(ApiError::from);
        };
        let last = attempt >= attempts;

        let delay = match this_try.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if last || !kind.retries_status(status) {
                    return Ok(response);
                }
                let delay = retry_after(response.headers())
                    .unwrap_or_else(|| policy.backoff(attempt));
                log::warn!(
                    "api {:?} attempt {}/{} got {}, retrying in {:?}",
                    kind,
                    attempt,
                    attempts,
                    status,
                    delay
                );
                delay
            }
            Err(err) => {
                let err = ApiError::from(err);
                if last || !kind.retries_error(&err) {
                    return Err(err);
                }
                let delay = policy.backoff(attempt);
                log::warn!(
                    "api {:?} attempt {}/{} failed: {}, retrying in {:?}",
                    kind,
                    attempt,
                    attempts,
                    err,
                    delay
                );
                delay
            }
        };

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
