//! Error types for the connect crate.

use thiserror::Error;

use fleetmon_core::sync::SourceError;

/// Result type alias for connect operations.
pub type Result<T, E = ConnectError> = std::result::Result<T, E>;

/// Retry policy class for API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Errors that can occur while talking to the external platforms.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the provider
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Provider quota exhausted. Never retried within the same call.
    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// 404 on one path candidate
    #[error("not found: {path}")]
    NotFound { path: String },

    /// Every path candidate failed; carries the last candidate's failure
    #[error("all endpoints failed, last: {last}")]
    AllEndpointsFailed { last: Box<ConnectError> },

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error (missing or invalid token)
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl ConnectError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// HTTP status if one was observed.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::NotFound { .. } => Some(404),
            Self::AllEndpointsFailed { last } => last.status_code(),
            _ => None,
        }
    }

    /// Provider-supplied wait hint, when the failure carried one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => *retry_after_secs,
            Self::AllEndpointsFailed { last } => last.retry_after_secs(),
            _ => None,
        }
    }

    /// Classify error for retry policy across cycles.
    pub fn retry_class(&self) -> ApiRetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                401 | 403 => ApiRetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => ApiRetryClass::Retryable,
                500..=599 => ApiRetryClass::Retryable,
                _ => ApiRetryClass::Permanent,
            },
            Self::Http(_) => ApiRetryClass::Retryable,
            Self::RateLimited { .. } => ApiRetryClass::Retryable,
            Self::AllEndpointsFailed { last } => last.retry_class(),
            Self::Json(_) => ApiRetryClass::Permanent,
            Self::NotFound { .. } => ApiRetryClass::Permanent,
            Self::InvalidRequest(_) => ApiRetryClass::Permanent,
            Self::Auth(_) => ApiRetryClass::ReauthRequired,
        }
    }
}

/// Collapse a client failure into what the sync engines act on: rate limits
/// abort the cycle, a 404 on every candidate means the remote record is
/// gone, everything else is a per-record error.
impl From<ConnectError> for SourceError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::RateLimited { retry_after_secs } => {
                SourceError::RateLimited { retry_after_secs }
            }
            ConnectError::NotFound { .. } => SourceError::NotFound,
            ConnectError::AllEndpointsFailed { last } => match *last {
                ConnectError::NotFound { .. } => SourceError::NotFound,
                other => SourceError::Remote(other.to_string()),
            },
            other => SourceError::Remote(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_class_for_auth_error_is_reauth() {
        let err = ConnectError::api(401, "unauthorized");
        assert_eq!(err.retry_class(), ApiRetryClass::ReauthRequired);
    }

    #[test]
    fn rate_limit_carries_its_hint_through_accessors() {
        let err = ConnectError::RateLimited {
            retry_after_secs: Some(17),
        };
        assert_eq!(err.status_code(), Some(429));
        assert_eq!(err.retry_after_secs(), Some(17));
        assert_eq!(err.retry_class(), ApiRetryClass::Retryable);
    }

    #[test]
    fn exhausted_candidates_ending_in_404_become_source_not_found() {
        let err = ConnectError::AllEndpointsFailed {
            last: Box::new(ConnectError::not_found("/api/v2/tasks/t-1")),
        };
        assert_eq!(err.status_code(), Some(404));
        assert!(matches!(SourceError::from(err), SourceError::NotFound));
    }

    #[test]
    fn rate_limit_maps_onto_the_source_taxonomy() {
        let source = SourceError::from(ConnectError::RateLimited {
            retry_after_secs: Some(30),
        });
        assert!(matches!(
            source,
            SourceError::RateLimited {
                retry_after_secs: Some(30)
            }
        ));
    }

    #[test]
    fn server_errors_map_onto_remote() {
        let source = SourceError::from(ConnectError::api(503, "maintenance window"));
        assert!(matches!(source, SourceError::Remote(message) if message.contains("503")));
    }
}
