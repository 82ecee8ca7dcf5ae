use std::time::Duration;

use thiserror::Error;

use crate::backends::ApiError;
use crate::models::ServiceName;

/// Failure classes used to pick a recovery path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Network,
    Timeout,
    ServiceUnavailable,
    Validation,
    Permission,
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Network => "network",
            ErrorClass::Timeout => "timeout",
            ErrorClass::ServiceUnavailable => "service_unavailable",
            ErrorClass::Validation => "validation",
            ErrorClass::Permission => "permission",
            ErrorClass::Unknown => "unknown",
        }
    }

    /// Validation and permission failures never improve by waiting
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorClass::Validation | ErrorClass::Permission)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Service {service} unavailable: {reason}")]
    ServiceUnavailable {
        service: ServiceName,
        reason: String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Local catalog unavailable: {0}")]
    LocalUnavailable(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl CatalogError {
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        CatalogError::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Classify a typed error, falling back to message inspection for the
    /// variants that only carry free text.
    pub fn class(&self) -> ErrorClass {
        match self {
            CatalogError::Network(_) => ErrorClass::Network,
            CatalogError::Timeout { .. } => ErrorClass::Timeout,
            CatalogError::ServiceUnavailable { .. } => ErrorClass::ServiceUnavailable,
            CatalogError::Validation(_) | CatalogError::Serialization(_) => {
                ErrorClass::Validation
            }
            CatalogError::Permission(_) => ErrorClass::Permission,
            CatalogError::Api(api) => api.class(),
            CatalogError::Io(e) => match e.kind() {
                std::io::ErrorKind::PermissionDenied => ErrorClass::Permission,
                std::io::ErrorKind::TimedOut => ErrorClass::Timeout,
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected => ErrorClass::Network,
                _ => classify_message(&e.to_string()),
            },
            other => classify_message(&other.to_string()),
        }
    }
}

/// Classify a free-form error message by its content.
///
/// Ordering matters: "timed out" messages often also mention the network, and
/// HTTP status codes are more specific than the words around them.
pub fn classify_message(message: &str) -> ErrorClass {
    let msg = message.to_lowercase();

    const TIMEOUT: &[&str] = &["timeout", "timed out", "deadline", "took too long"];
    const PERMISSION: &[&str] = &[
        "permission",
        "forbidden",
        "unauthorized",
        "access denied",
        "401",
        "403",
    ];
    const UNAVAILABLE: &[&str] = &[
        "service unavailable",
        "unavailable",
        "503",
        "502",
        "504",
        "bad gateway",
        "not responding",
        "server error",
    ];
    const VALIDATION: &[&str] = &[
        "validation",
        "invalid",
        "malformed",
        "parse",
        "unexpected token",
        "missing field",
        "schema",
    ];
    const NETWORK: &[&str] = &[
        "network",
        "connection",
        "connect",
        "dns",
        "unreachable",
        "no internet",
        "offline",
        "fetch failed",
        "socket",
    ];

    let has = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

    if has(TIMEOUT) {
        ErrorClass::Timeout
    } else if has(PERMISSION) {
        ErrorClass::Permission
    } else if has(UNAVAILABLE) {
        ErrorClass::ServiceUnavailable
    } else if has(VALIDATION) {
        ErrorClass::Validation
    } else if has(NETWORK) {
        ErrorClass::Network
    } else {
        ErrorClass::Unknown
    }
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
