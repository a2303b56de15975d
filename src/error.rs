//! Error types for backend calls and the sync layer.
//!
//! Errors are classified the way the dashboard recovers from them:
//! - Fetch: a read failed, the cache slot keeps its last-known-good value
//! - Mutation: a write failed, nothing is invalidated and the user is alerted
//! - PartialAnalytics: one analytics fragment failed, it keeps its default
//!
//! None of them is fatal.

use thiserror::Error;

use crate::analytics::{AnalyticsScope, Metric};
use crate::cache::SlotKey;

/// Failure talking to the backend API.
///
/// Cloneable so one in-flight response can be handed to every caller
/// waiting on the same cache slot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// The connection was never established, so the request was not sent.
    #[error("Could not connect: {0}")]
    Connect(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    #[error("Request was abandoned before it completed")]
    Cancelled,
}

/// Statuses worth repeating a request for: timeouts, rate limits and
/// server errors.
pub(crate) fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

impl ApiError {
    /// Returns true if repeating the request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Connect(_) | ApiError::Network(_) | ApiError::Timeout(_) => true,
            ApiError::Status { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else if err.is_connect() {
            ApiError::Connect(err.to_string())
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

/// Errors surfaced by the cache, cascade and analytics layers.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Error fetching {slot}: {source}")]
    Fetch { slot: SlotKey, source: ApiError },

    #[error("Error {action}: {source}")]
    Mutation { action: String, source: ApiError },

    #[error("Error fetching {metric} analytics for {scope}: {source}")]
    PartialAnalytics {
        scope: AnalyticsScope,
        metric: Metric,
        source: ApiError,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// The underlying API failure, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            SyncError::Fetch { source, .. }
            | SyncError::Mutation { source, .. }
            | SyncError::PartialAnalytics { source, .. } => Some(source),
            SyncError::Config(_) => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.api_error().is_some_and(ApiError::is_retryable)
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            SyncError::Fetch { .. } => "Showing the last loaded data. Refresh to try again.",
            SyncError::Mutation { .. } => "Nothing was changed. Check the API service and retry.",
            SyncError::PartialAnalytics { .. } => {
                "Some analytics are unavailable and show defaults. Refresh to try again."
            }
            SyncError::Config(_) => "Check your configuration in ~/.habitdeck/config.json",
        }
    }
}

/// Serializable error representation for presentation layers
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorType {
    Fetch,
    Mutation,
    PartialAnalytics,
    Config,
}

impl From<&SyncError> for ErrorReport {
    fn from(err: &SyncError) -> Self {
        let error_type = match err {
            SyncError::Fetch { .. } => ErrorType::Fetch,
            SyncError::Mutation { .. } => ErrorType::Mutation,
            SyncError::PartialAnalytics { .. } => ErrorType::PartialAnalytics,
            SyncError::Config(_) => ErrorType::Config,
        };

        ErrorReport {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_retry_classification() {
        let status = |status| ApiError::Status {
            status,
            message: String::new(),
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(408).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!ApiError::Decode("bad".into()).is_retryable());
        assert!(ApiError::Timeout("slow".into()).is_retryable());
        assert!(ApiError::Connect("refused".into()).is_retryable());
        assert!(!ApiError::Cancelled.is_retryable());
    }

    #[test]
    fn test_fetch_error_message_names_slot() {
        let err = SyncError::Fetch {
            slot: SlotKey::habits("p1"),
            source: ApiError::Network("connection refused".into()),
        };
        assert_eq!(
            err.to_string(),
            "Error fetching habits for person p1: Network error: connection refused"
        );
    }

    #[test]
    fn test_error_report_for_mutation() {
        let err = SyncError::Mutation {
            action: "creating habit".to_string(),
            source: ApiError::Status {
                status: 500,
                message: "boom".into(),
            },
        };
        let report = ErrorReport::from(&err);
        assert_eq!(report.error_type, ErrorType::Mutation);
        assert!(report.can_retry);
        assert_eq!(report.message, "Error creating habit: API error 500: boom");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["errorType"], "mutation");
        assert!(json.get("recoverySuggestion").is_some());
    }
}
