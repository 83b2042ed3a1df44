//! Error types for the remote capabilities.
//!
//! Every failure a capability can report maps to exactly one [`ErrorClass`]
//! through [`RemoteError::class`]. Callers decide retry behavior from the class
//! only, never from scattered status checks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// How a failure should be treated by a retrying caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Retry later; the same request may succeed.
    Transient,
    /// Retrying the same request will keep failing.
    Permanent,
    /// The target already exists (or changed underneath the request).
    Conflict,
}

/// Errors reported by the remote capabilities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not complete in time.
    #[error("Request timed out")]
    Timeout,

    /// Non-success HTTP status. The body is kept verbatim.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The record an update targets no longer exists.
    #[error("No {collection} record with id {id}")]
    NotFound { collection: String, id: String },

    /// The call needs a signed-in session.
    #[error("Not signed in")]
    NotSignedIn,

    /// The request could not be built from the given payload.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A privileged function answered with an `error` field.
    #[error("Function error: {0}")]
    Function(String),
}

impl RemoteError {
    /// Classify this error.
    ///
    /// | Error | Class |
    /// |---|---|
    /// | network, timeout, decode | Transient |
    /// | HTTP 401, 408, 425, 429, 5xx | Transient |
    /// | HTTP 409 | Conflict |
    /// | other HTTP statuses | Permanent |
    /// | not found, not signed in, invalid payload, function error | Permanent |
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout | RemoteError::Decode(_) => {
                ErrorClass::Transient
            }
            RemoteError::Http { status, .. } => classify_status(*status),
            RemoteError::NotFound { .. }
            | RemoteError::NotSignedIn
            | RemoteError::InvalidPayload(_)
            | RemoteError::Function(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn is_conflict(&self) -> bool {
        self.class() == ErrorClass::Conflict
    }

    /// HTTP status, if the remote answered with one.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Class of a non-success HTTP status.
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        409 => ErrorClass::Conflict,
        // 401 means the session expired; a refreshed token fixes it.
        401 | 408 | 425 | 429 => ErrorClass::Transient,
        500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            RemoteError::Http {
                status: status.as_u16(),
                body: String::new(),
            }
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        RemoteError::Decode(e.to_string())
    }
}

/// Errors loading configuration from the environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    #[error("Missing required environment variable {var}")]
    Missing { var: String },

    /// A variable is set but unusable.
    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;
