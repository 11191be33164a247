//! Error types for the collector
//!
//! Provides:
//! - Distinct error variants for each failure mode
//! - Machine-readable error codes
//! - A coarse `ErrorKind` that tells the pipeline whether to skip, continue or abort

use sea_orm::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidIdentifier,
    InvalidRecord,
    MissingField,
    InvalidFormat,

    // Resource errors (4xxx)
    NotFound,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,
    ConstraintViolation,

    // External service errors (8xxx)
    UpstreamError,
    UpstreamTimeout,
    MalformedResponse,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    SourceError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidIdentifier => 1002,
            ErrorCode::InvalidRecord => 1003,
            ErrorCode::MissingField => 1004,
            ErrorCode::InvalidFormat => 1005,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::ConstraintViolation => 7003,

            // External (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::UpstreamTimeout => 8002,
            ErrorCode::MalformedResponse => 8003,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::SourceError => 9004,
        }
    }
}

/// How the pipeline reacts to an error
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed identifier or row: recorded and skipped
    Validation,
    /// Timeout, non-2xx, unparsable body: logged, stage continues
    Transient,
    /// Duplicate key on insert: offending row dropped
    Constraint,
    /// Anything that leaves storage in an untrusted state: abort
    Fatal,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid identifier: {doi}")]
    InvalidIdentifier { doi: String },

    #[error("Invalid record at row {row}: {message}")]
    InvalidRecord { row: usize, message: String },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("{service} returned {}: {message}", describe_status(.status))]
    Upstream {
        service: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Malformed {service} response: {message}")]
    MalformedResponse { service: String, message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record source error: {0}")]
    Csv(#[from] csv::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidIdentifier { .. } => ErrorCode::InvalidIdentifier,
            AppError::InvalidRecord { .. } => ErrorCode::InvalidRecord,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::Database(e) if is_unique_violation(e) => ErrorCode::ConstraintViolation,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Upstream { .. } => ErrorCode::UpstreamError,
            AppError::MalformedResponse { .. } => ErrorCode::MalformedResponse,
            AppError::HttpClient(e) if e.is_timeout() => ErrorCode::UpstreamTimeout,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Csv(_) => ErrorCode::SourceError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Classify the error for the pipeline's continue-or-abort decision
    pub fn kind(&self) -> ErrorKind {
        match self.code() {
            ErrorCode::ValidationError
            | ErrorCode::InvalidIdentifier
            | ErrorCode::InvalidRecord
            | ErrorCode::MissingField
            | ErrorCode::InvalidFormat => ErrorKind::Validation,

            ErrorCode::UpstreamError
            | ErrorCode::UpstreamTimeout
            | ErrorCode::MalformedResponse => ErrorKind::Transient,

            ErrorCode::ConstraintViolation => ErrorKind::Constraint,

            ErrorCode::NotFound
            | ErrorCode::DatabaseError
            | ErrorCode::ConnectionError
            | ErrorCode::InternalError
            | ErrorCode::ConfigurationError
            | ErrorCode::SerializationError
            | ErrorCode::SourceError => ErrorKind::Fatal,
        }
    }

    /// Whether the surrounding loop may continue past this error
    pub fn is_recoverable(&self) -> bool {
        self.kind() != ErrorKind::Fatal
    }

    /// Shorthand for a malformed external response
    pub fn malformed(service: &str, message: impl Into<String>) -> Self {
        AppError::MalformedResponse {
            service: service.to_string(),
            message: message.into(),
        }
    }
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "no response".to_string(),
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
