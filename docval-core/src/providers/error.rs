//! Backend error types and handling

use std::time::Duration;
use thiserror::Error;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur when interacting with an AI backend
///
/// Every variant is either transient (retry, then fall back) or permanent
/// (fall back immediately); see [`BackendError::is_retryable`].
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Rate limit exceeded, retry after specified duration
    #[error("Rate limit exceeded{}", .retry_after.map(|d| format!(", retry after {:?}", d)).unwrap_or_default())]
    RateLimit { retry_after: Option<Duration> },

    /// Request or deadline timeout
    #[error("Request timed out")]
    Timeout,

    /// Temporary server error (5xx)
    #[error("Server error ({status_code}): {message}")]
    ServerError { status_code: u16, message: String },

    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Authentication or authorization failure
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Request the backend will never accept (4xx other than auth/rate limit)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Operation not supported by this backend
    #[error("Operation '{operation}' is not supported by backend '{backend}'")]
    Unsupported { backend: String, operation: String },

    /// Backend responded but the payload could not be interpreted
    #[error("Failed to parse backend response: {message}")]
    Parse { message: String, raw: String },

    /// Backend was selected but has no credentials configured
    #[error("Backend '{0}' has no credentials configured")]
    MissingCredentials(String),

    /// Local configuration problem (HTTP client construction, bad URL)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Whether the same backend may succeed if the call is repeated
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimit { .. } => true,
            Self::Timeout => true,
            Self::ServerError { .. } => true,
            Self::Network(_) => true,
            Self::Authentication(_) => false,
            Self::InvalidRequest(_) => false,
            Self::Unsupported { .. } => false,
            Self::Parse { .. } => false,
            Self::MissingCredentials(_) => false,
            Self::Configuration(_) => false,
            Self::Other(_) => false, // Conservative: don't retry unknown errors
        }
    }

    /// Suggested retry delay for this error
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after } => *retry_after,
            Self::Timeout => Some(Duration::from_secs(1)),
            Self::ServerError { .. } => Some(Duration::from_secs(2)),
            Self::Network(_) => Some(Duration::from_secs(1)),
            _ => None,
        }
    }

    /// Build a parse error, keeping the raw response for diagnostics
    pub fn parse(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Build an unsupported-operation error
    pub fn unsupported(backend: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            backend: backend.into(),
            operation: operation.into(),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_connect() {
            BackendError::Network(format!("Connection failed: {}", err))
        } else if err.is_status() {
            match err.status().map(|s| s.as_u16()) {
                Some(401) | Some(403) => BackendError::Authentication(err.to_string()),
                Some(429) => BackendError::RateLimit { retry_after: None },
                Some(code @ 500..=599) => BackendError::ServerError {
                    status_code: code,
                    message: err.to_string(),
                },
                _ => BackendError::InvalidRequest(err.to_string()),
            }
        } else {
            BackendError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::parse(err.to_string(), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(BackendError::Timeout.is_retryable());
        assert!(BackendError::RateLimit { retry_after: None }.is_retryable());
        assert!(BackendError::ServerError {
            status_code: 503,
            message: "overloaded".to_string()
        }
        .is_retryable());
        assert!(BackendError::Network("reset".to_string()).is_retryable());
    }

    #[test]
    fn test_permanent_errors_are_not_retryable() {
        assert!(!BackendError::Authentication("bad key".to_string()).is_retryable());
        assert!(!BackendError::InvalidRequest("bad".to_string()).is_retryable());
        assert!(!BackendError::unsupported("stub", "compress_context").is_retryable());
        assert!(!BackendError::parse("no json", "hello").is_retryable());
        assert!(!BackendError::MissingCredentials("openai".to_string()).is_retryable());
    }

    #[test]
    fn test_rate_limit_display() {
        let err = BackendError::RateLimit {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(err.to_string(), "Rate limit exceeded, retry after 5s");
        assert_eq!(
            BackendError::RateLimit { retry_after: None }.to_string(),
            "Rate limit exceeded"
        );
    }
}
