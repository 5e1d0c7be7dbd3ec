//! Error types for the IG REST integration.
//!
//! Distinguishes transport failures (retried by the backoff executor), expired
//! sessions (replayed once after re-authentication) and terminal API errors.

use strangle_core::RetryError;
use thiserror::Error;

/// Errors that can occur when talking to the broker.
#[derive(Debug, Error)]
pub enum IgError {
    /// Credentials were rejected or a session could not be established.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// API request failed with a non-success status.
    #[error("API error: {status} {error_code} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Broker error code (e.g. `error.security.oauth-token-invalid`).
        error_code: String,
        /// Raw response body or message.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Request rejected locally before it was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No session is open.
    #[error("not authenticated")]
    NotAuthenticated,

    /// A deal confirmation came back with a non-accepted status.
    #[error("deal {deal_reference} rejected: {reason}")]
    DealRejected {
        /// Reference of the rejected deal.
        deal_reference: String,
        /// Broker-supplied reason.
        reason: String,
    },

    /// Operation failed under the backoff executor.
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Retry {
        /// Name of the wrapped operation.
        operation: String,
        /// Attempts made, including the first.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        source: Box<IgError>,
    },
}

impl IgError {
    /// Creates an API error.
    pub fn api(status: u16, error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            error_code: error_code.into(),
            message: message.into(),
        }
    }

    /// Creates a deal-rejected error.
    pub fn deal_rejected(deal_reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DealRejected {
            deal_reference: deal_reference.into(),
            reason: reason.into(),
        }
    }

    /// The innermost error, looking through retry wrappers.
    #[must_use]
    pub fn root(&self) -> &IgError {
        match self {
            Self::Retry { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns true if the error is transient and worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimit(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the session token was rejected as invalid or missing.
    #[must_use]
    pub fn is_auth_expired(&self) -> bool {
        match self.root() {
            Self::Api { error_code, .. } => {
                error_code.contains("token-invalid") || error_code.contains("token-missing")
            }
            _ => false,
        }
    }

    /// The broker error code, if any.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        match self.root() {
            Self::Api { error_code, .. } => Some(error_code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for IgError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else if err.is_decode() {
            Self::Serialization(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for IgError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<RetryError<IgError>> for IgError {
    fn from(err: RetryError<IgError>) -> Self {
        Self::Retry {
            operation: err.operation,
            attempts: err.attempts,
            source: Box::new(err.last_error),
        }
    }
}

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, IgError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Classification Tests ====================

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(IgError::Network("reset".to_string()).is_retryable());
        assert!(IgError::Timeout("30s".to_string()).is_retryable());
        assert!(IgError::RateLimit("slow down".to_string()).is_retryable());
    }

    #[test]
    fn test_server_error_retryable_client_error_not() {
        assert!(IgError::api(503, "", "unavailable").is_retryable());
        assert!(!IgError::api(400, "error.request.invalid", "bad").is_retryable());
    }

    #[test]
    fn test_auth_expiry_codes() {
        let invalid = IgError::api(401, "error.security.oauth-token-invalid", "");
        let missing = IgError::api(401, "error.security.client-token-missing", "");
        let other = IgError::api(401, "error.security.invalid-details", "");
        assert!(invalid.is_auth_expired());
        assert!(missing.is_auth_expired());
        assert!(!other.is_auth_expired());
        assert!(!invalid.is_retryable());
    }

    #[test]
    fn test_deal_rejection_is_terminal() {
        let err = IgError::deal_rejected("REF1", "INSUFFICIENT_FUNDS");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("INSUFFICIENT_FUNDS"));
    }

    // ==================== Retry Wrapper Tests ====================

    #[test]
    fn test_retry_wrapper_preserves_root() {
        let wrapped: IgError = RetryError {
            operation: "get_positions".to_string(),
            attempts: 4,
            exhausted: true,
            last_error: IgError::api(502, "", "bad gateway"),
        }
        .into();

        assert!(wrapped.to_string().contains("get_positions"));
        assert!(wrapped.to_string().contains("4 attempt"));
        assert!(matches!(wrapped.root(), IgError::Api { status: 502, .. }));
        assert!(wrapped.is_retryable());
    }

    #[test]
    fn test_error_code_accessor() {
        let err = IgError::api(404, "error.market.not-found", "");
        assert_eq!(err.error_code(), Some("error.market.not-found"));
        assert_eq!(IgError::NotAuthenticated.error_code(), None);
    }
}
