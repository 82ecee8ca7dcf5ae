use thiserror::Error;

use crate::utils::errors::{ErrorClass, classify_message};

/// Typed error for calls against the catalog backend
///
/// Distinguishes failure modes so the loader can decide between retrying,
/// falling back to cached data, or giving up.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// 401, 403: permanent until credentials change
    #[error("Authentication failed: {message} (status: {status})")]
    Authentication { status: u16, message: String },

    /// 429: retried with backoff
    #[error("Rate limited: {message} (retry after: {retry_after:?}s)")]
    RateLimit {
        message: String,
        retry_after: Option<u64>,
    },

    /// 500+: transient
    #[error("Server error: {message} (status: {status})")]
    ServerError { status: u16, message: String },

    /// Remaining 4xx: usually permanent
    #[error("Client error: {message} (status: {status})")]
    ClientError { status: u16, message: String },

    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Connection refused, DNS failure and friends
    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("API error: {0}")]
    Other(String),
}

impl ApiError {
    /// Check if this error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_)
                | ApiError::Timeout(_)
                | ApiError::ServerError { .. }
                | ApiError::RateLimit { .. }
        )
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ApiError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Authentication { status, .. }
            | ApiError::ServerError { status, .. }
            | ApiError::ClientError { status, .. } => Some(*status),
            ApiError::RateLimit { .. } => Some(429),
            _ => None,
        }
    }

    /// Recovery class for this failure
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::Authentication { .. } => ErrorClass::Permission,
            ApiError::RateLimit { .. } | ApiError::ServerError { .. } => {
                ErrorClass::ServiceUnavailable
            }
            ApiError::ClientError { status, .. } => match status {
                400 | 409 | 422 => ErrorClass::Validation,
                404 | 410 => ErrorClass::ServiceUnavailable,
                _ => ErrorClass::Unknown,
            },
            ApiError::Timeout(_) => ErrorClass::Timeout,
            ApiError::Network(_) => ErrorClass::Network,
            ApiError::ParseError(_) => ErrorClass::Validation,
            ApiError::Other(message) => classify_message(message),
        }
    }

    /// Create an error from a reqwest error
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ApiError::Timeout(error.to_string())
        } else if error.is_connect() {
            ApiError::Network(format!("Connection failed: {}", error))
        } else if error.is_request() {
            ApiError::Network(format!("Request error: {}", error))
        } else if error.is_decode() {
            ApiError::ParseError(error.to_string())
        } else if let Some(status) = error.status() {
            ApiError::from_status(status.as_u16(), error.to_string())
        } else {
            ApiError::Other(error.to_string())
        }
    }

    /// Create an error from an HTTP status code and response body
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => ApiError::Authentication {
                status,
                message: body,
            },
            429 => ApiError::RateLimit {
                message: body,
                retry_after: None,
            },
            400..=499 => ApiError::ClientError {
                status,
                message: body,
            },
            500..=599 => ApiError::ServerError {
                status,
                message: body,
            },
            _ => ApiError::Other(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        ApiError::from_reqwest(error)
    }
}

impl From<url::ParseError> for ApiError {
    fn from(error: url::ParseError) -> Self {
        ApiError::Other(format!("Invalid URL: {}", error))
    }
}
