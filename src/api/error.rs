//! Typed errors for backend operations
//!
//! Lets the session controller and the upload tracker tell transport
//! failures apart without string matching.

use thiserror::Error;

/// Backend operation errors with typed variants
///
/// - `Unauthorized` (401) - the user id was rejected
/// - `NotFound` (404) - conversation does not exist (yet)
/// - `RateLimited` (429) - quota exceeded; can retry after delay
/// - `BadRequest` (400) - malformed request; caller error
/// - `ServiceError` (5xx) - server-side issue; can retry
/// - `Network` - connection/timeout/broken stream; can retry
/// - `Decode` - response body did not match the expected shape
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// Check if the same request may succeed when issued again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited(_) | ApiError::ServiceError(_) | ApiError::Network(_)
        )
    }

    /// Convert HTTP status code and error text into typed ApiError
    pub fn from_http_status(status: reqwest::StatusCode, error_text: String) -> Self {
        match status.as_u16() {
            400 => ApiError::BadRequest(error_text),
            401 | 403 => ApiError::Unauthorized(error_text),
            404 => ApiError::NotFound(error_text),
            429 => ApiError::RateLimited(error_text),
            500..=599 => ApiError::ServiceError(error_text),
            _ => ApiError::Other(anyhow::anyhow!("HTTP {}: {}", status, error_text)),
        }
    }

    /// Convert reqwest errors into typed ApiError
    pub fn from_network_error(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Network(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            ApiError::Network(format!("Connection failed: {}", e))
        } else if let Some(status) = e.status() {
            Self::from_http_status(status, e.to_string())
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else if e.is_body() || e.is_request() {
            ApiError::Network(e.to_string())
        } else {
            ApiError::Other(e.into())
        }
    }
}
