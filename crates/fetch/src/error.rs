//! Error taxonomy for outbound source requests.

use portfolio_core::FailureReason;
use thiserror::Error;

/// Errors produced while querying a source.
///
/// Payloads are strings so the error is `Clone` and can be fanned out to every
/// request of a failed batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Credentials rejected or missing.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Non-success HTTP status or API-level error code.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code (or 0 for envelope-level errors).
        status_code: u16,
        /// Error message from the API.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("rate limit exceeded{}", retry_suffix(.retry_after_secs))]
    RateLimit {
        /// Server supplied `Retry-After`, if any.
        retry_after_secs: Option<u64>,
    },

    /// Transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Response body did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// No endpoint could serve the request.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Invalid request setup (bad URL, missing endpoint list).
    #[error("configuration error: {0}")]
    Configuration(String),
}

fn retry_suffix(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs
        .map(|s| format!(", retry after {s}s"))
        .unwrap_or_default()
}

impl FetchError {
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    pub fn rate_limit(retry_after_secs: Option<u64>) -> Self {
        Self::RateLimit { retry_after_secs }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Returns true if the request may succeed when repeated.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimit { .. } => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    /// Turns a transient error left over after the last attempt into `Unavailable`.
    #[must_use]
    pub fn exhausted(self, context: &str) -> Self {
        if self.is_transient() {
            Self::Unavailable(format!("{context}: {self}"))
        } else {
            self
        }
    }

    /// Server supplied minimum wait before the next attempt.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimit { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }

    /// Category recorded on a failed outcome.
    #[must_use]
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::Authentication(_) => FailureReason::AuthError,
            Self::Api { status_code, .. } => match *status_code {
                401 | 403 => FailureReason::AuthError,
                429 => FailureReason::RateLimited,
                400..=499 => FailureReason::Rejected,
                _ => FailureReason::Unavailable,
            },
            Self::RateLimit { .. } => FailureReason::RateLimited,
            Self::Network(_) | Self::Unavailable(_) => FailureReason::Unavailable,
            Self::Timeout(_) => FailureReason::Timeout,
            Self::Parse(_) => FailureReason::ParseError,
            Self::Configuration(_) => FailureReason::Rejected,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Construction Tests ====================

    #[test]
    fn test_api_error_construction() {
        let err = FetchError::api(400, "bad request");
        assert!(matches!(err, FetchError::Api { status_code: 400, .. }));
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("bad request"));
    }

    #[test]
    fn test_rate_limit_display() {
        assert!(FetchError::rate_limit(Some(30)).to_string().contains("30s"));
        assert_eq!(FetchError::rate_limit(None).to_string(), "rate limit exceeded");
    }

    // ==================== Transient Tests ====================

    #[test]
    fn test_transient_errors() {
        assert!(FetchError::Network("refused".into()).is_transient());
        assert!(FetchError::Timeout("slow".into()).is_transient());
        assert!(FetchError::rate_limit(None).is_transient());
        assert!(FetchError::api(503, "down").is_transient());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(!FetchError::api(400, "bad").is_transient());
        assert!(!FetchError::Authentication("bad key".into()).is_transient());
        assert!(!FetchError::parse("eof").is_transient());
        assert!(!FetchError::unavailable("all down").is_transient());
    }

    // ==================== Classification Tests ====================

    #[test]
    fn test_failure_reason_mapping() {
        assert_eq!(FetchError::api(401, "").failure_reason(), FailureReason::AuthError);
        assert_eq!(FetchError::api(403, "").failure_reason(), FailureReason::AuthError);
        assert_eq!(FetchError::api(404, "").failure_reason(), FailureReason::Rejected);
        assert_eq!(FetchError::api(502, "").failure_reason(), FailureReason::Unavailable);
        assert_eq!(FetchError::rate_limit(Some(1)).failure_reason(), FailureReason::RateLimited);
        assert_eq!(FetchError::Timeout("".into()).failure_reason(), FailureReason::Timeout);
        assert_eq!(FetchError::parse("x").failure_reason(), FailureReason::ParseError);
        assert_eq!(FetchError::Network("x".into()).failure_reason(), FailureReason::Unavailable);
        assert_eq!(
            FetchError::Configuration("x".into()).failure_reason(),
            FailureReason::Rejected
        );
    }

    #[test]
    fn test_exhausted_only_wraps_transient_errors() {
        let err = FetchError::api(503, "down").exhausted("all endpoints failed");
        assert!(matches!(err, FetchError::Unavailable(ref m) if m.contains("503")));
        assert_eq!(
            FetchError::api(404, "missing").exhausted("ctx"),
            FetchError::api(404, "missing")
        );
    }

    #[test]
    fn test_serde_error_is_parse() {
        let err: FetchError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, FetchError::Parse(_)));
    }
}
