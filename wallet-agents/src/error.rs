use std::fmt;
use std::time::Duration;

use common::ModelError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchErrorKind {
    Timeout,
    AuthError,
    NotFound,
    RateLimited,
    /// Source could not serve live data (connection refused, 5xx, disabled).
    Unavailable,
    Unknown,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::AuthError => "auth error",
            FetchErrorKind::NotFound => "not found",
            FetchErrorKind::RateLimited => "rate limited",
            FetchErrorKind::Unavailable => "unavailable",
            FetchErrorKind::Unknown => "unknown error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{source_name} fetch failed ({kind}): {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub source_name: String,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Classifies a transport-level failure from the HTTP client. The request
    /// URL is stripped from the message since it may carry an API key.
    pub fn from_reqwest(source_name: &str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FetchErrorKind::Timeout
        } else if err.is_connect() {
            FetchErrorKind::Unavailable
        } else if err.is_decode() {
            FetchErrorKind::Unknown
        } else if let Some(status) = err.status() {
            kind_for_status(status.as_u16())
        } else {
            FetchErrorKind::Unknown
        };
        Self::new(kind, source_name, err.without_url().to_string())
    }

    /// Classifies a non-success HTTP status.
    pub fn from_status(source_name: &str, status: u16, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        Self::new(
            kind_for_status(status),
            source_name,
            format!("HTTP {}: {}", status, snippet),
        )
    }
}

pub fn kind_for_status(status: u16) -> FetchErrorKind {
    match status {
        401 | 403 => FetchErrorKind::AuthError,
        404 => FetchErrorKind::NotFound,
        408 => FetchErrorKind::Timeout,
        429 => FetchErrorKind::RateLimited,
        500..=599 => FetchErrorKind::Unavailable,
        _ => FetchErrorKind::Unknown,
    }
}

/// Malformed intake; rejected before any fetch or model call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Wallet address is empty")]
    EmptyAddress,

    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),

    #[error("No wallet address found in message")]
    MissingAddress,

    #[error("Invalid token symbol: {0}")]
    InvalidToken(String),
}

/// The pipeline itself could not produce a recommendation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestrationError {
    #[error("Aggregation failed: {0}")]
    Aggregation(#[from] ModelError),

    #[error("Aggregation timed out after {0:?}")]
    AggregatorTimeout(Duration),

    #[error("Request cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error(transparent)]
    Model(#[from] ModelError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_http_statuses_to_fetch_kinds() {
        assert_eq!(kind_for_status(401), FetchErrorKind::AuthError);
        assert_eq!(kind_for_status(403), FetchErrorKind::AuthError);
        assert_eq!(kind_for_status(404), FetchErrorKind::NotFound);
        assert_eq!(kind_for_status(429), FetchErrorKind::RateLimited);
        assert_eq!(kind_for_status(408), FetchErrorKind::Timeout);
        assert_eq!(kind_for_status(504), FetchErrorKind::Unavailable);
        assert_eq!(kind_for_status(503), FetchErrorKind::Unavailable);
        assert_eq!(kind_for_status(418), FetchErrorKind::Unknown);
    }

    #[test]
    fn status_errors_keep_a_bounded_body_snippet() {
        let body = "x".repeat(1_000);
        let err = FetchError::from_status("helius", 500, &body);
        assert_eq!(err.kind, FetchErrorKind::Unavailable);
        assert!(err.message.len() < 220);
        assert_eq!(err.source_name, "helius");
    }
}
