//! Error types and handling for Helmi
//!
//! This module defines the error taxonomy shared by the HTTP client, the
//! normalizers, the totalizers and the persistence layer.

use thiserror::Error;

/// Result type alias for Helmi operations
pub type Result<T> = std::result::Result<T, HelmiError>;

/// Main error type for Helmi
#[derive(Debug, Error)]
pub enum HelmiError {
    /// Timestamp text that none of the accepted shapes can parse.
    /// Never retried: it means the upstream format changed.
    #[error("Invalid timestamp: {value:?}")]
    InvalidTimestamp { value: String },

    /// Credentials rejected, token missing, or a second 401 after re-login
    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    /// HTTP request failure, carrying the last underlying cause
    #[error("Request failed: {message}")]
    RequestFailed {
        message: String,
        status: Option<u16>,
    },

    /// Durable state could not be read or written
    #[error("Persistence failed: {message}")]
    PersistenceFailed { message: String },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl HelmiError {
    /// Create a new invalid timestamp error
    pub fn invalid_timestamp<S: Into<String>>(value: S) -> Self {
        HelmiError::InvalidTimestamp {
            value: value.into(),
        }
    }

    /// Create a new authentication error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        HelmiError::AuthFailed {
            message: message.into(),
        }
    }

    /// Create a new request error without an HTTP status
    pub fn request<S: Into<String>>(message: S) -> Self {
        HelmiError::RequestFailed {
            message: message.into(),
            status: None,
        }
    }

    /// Create a new request error for a given HTTP status
    pub fn request_status<S: Into<String>>(status: u16, message: S) -> Self {
        HelmiError::RequestFailed {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        HelmiError::PersistenceFailed {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        HelmiError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        HelmiError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        HelmiError::Serialization {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        HelmiError::Io {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation could succeed.
    ///
    /// Transport failures (no status) and 429/5xx responses are retryable;
    /// everything else needs new input, new credentials or a code change.
    pub fn is_retryable(&self) -> bool {
        match self {
            HelmiError::RequestFailed { status: None, .. } => true,
            HelmiError::RequestFailed {
                status: Some(code), ..
            } => is_retryable_status(*code),
            _ => false,
        }
    }
}

/// HTTP statuses treated as transient
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

impl From<std::io::Error> for HelmiError {
    fn from(err: std::io::Error) -> Self {
        HelmiError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HelmiError {
    fn from(err: serde_yaml::Error) -> Self {
        HelmiError::serialization(err.to_string())
    }
}

impl From<serde_json::Error> for HelmiError {
    fn from(err: serde_json::Error) -> Self {
        HelmiError::serialization(err.to_string())
    }
}

impl From<reqwest::Error> for HelmiError {
    fn from(err: reqwest::Error) -> Self {
        HelmiError::request(err.to_string())
    }
}
