//! Error types for citecrawl services
//!
//! Provides:
//! - Distinct error types for the different failure modes
//! - Machine-readable error codes
//! - Transient/terminal classification for retry decisions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    UnsupportedVersion,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    QueueError,
    BrokerUnavailable,
    DedupStoreError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::UnsupportedVersion => 1005,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // External (8xxx)
            ErrorCode::QueueError => 8005,
            ErrorCode::BrokerUnavailable => 8007,
            ErrorCode::DedupStoreError => 8008,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Unsupported message version {version} (max supported {supported})")]
    UnsupportedVersion { version: u32, supported: u32 },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // Messaging errors
    #[error("Queue error: {message}")]
    QueueError { message: String },

    #[error("Broker unavailable: {message}")]
    BrokerUnavailable { message: String },

    #[error("Dedup store error: {message}")]
    DedupStore { message: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::UnsupportedVersion { .. } => ErrorCode::UnsupportedVersion,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::QueueError { .. } => ErrorCode::QueueError,
            AppError::BrokerUnavailable { .. } => ErrorCode::BrokerUnavailable,
            AppError::DedupStore { .. } => ErrorCode::DedupStoreError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Broker and connection failures are transient; malformed payloads and
    /// configuration problems are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::BrokerUnavailable { .. }
                | AppError::DatabaseConnection { .. }
                | AppError::DedupStore { .. }
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::DedupStore {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::BrokerUnavailable {
            message: "connection refused".into(),
        };
        assert_eq!(err.code(), ErrorCode::BrokerUnavailable);
        assert_eq!(err.code().as_code(), 8007);
    }

    #[test]
    fn test_every_code_is_distinct() {
        let codes = [
            ErrorCode::UnsupportedVersion,
            ErrorCode::DatabaseError,
            ErrorCode::ConnectionError,
            ErrorCode::QueueError,
            ErrorCode::BrokerUnavailable,
            ErrorCode::DedupStoreError,
            ErrorCode::InternalError,
            ErrorCode::ConfigurationError,
            ErrorCode::SerializationError,
        ];
        let numeric: std::collections::HashSet<u16> = codes.iter().map(ErrorCode::as_code).collect();
        assert_eq!(numeric.len(), codes.len());
        assert_eq!(
            AppError::UnsupportedVersion { version: 2, supported: 1 }.code().as_code(),
            1005
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::BrokerUnavailable { message: "down".into() }.is_transient());
        assert!(AppError::DedupStore { message: "timeout".into() }.is_transient());
        assert!(!AppError::QueueError { message: "bad body".into() }.is_transient());
        assert!(!AppError::UnsupportedVersion { version: 9, supported: 1 }.is_transient());
    }
}
