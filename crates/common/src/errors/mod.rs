//! Error types for DeckForge services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFileType,
    PayloadTooLarge,
    SlideCountOutOfRange,

    // Authentication errors (2xxx)
    Unauthorized,

    // Resource errors (4xxx)
    JobNotFound,
    JobNotReady,
    FileUnavailable,
    ObjectNotFound,

    // Conflict errors (5xxx)
    InvalidTransition,

    // Rate limiting (6xxx)
    RateLimited,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    StorageError,
    StageFailed,

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
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFileType => 1002,
            ErrorCode::PayloadTooLarge => 1003,
            ErrorCode::SlideCountOutOfRange => 1004,

            // Auth (2xxx)
            ErrorCode::Unauthorized => 2001,

            // Resources (4xxx)
            ErrorCode::JobNotFound => 4001,
            ErrorCode::JobNotReady => 4002,
            ErrorCode::FileUnavailable => 4003,
            ErrorCode::ObjectNotFound => 4004,

            // Conflicts (5xxx)
            ErrorCode::InvalidTransition => 5001,

            // Rate limits (6xxx)
            ErrorCode::RateLimited => 6001,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // External (8xxx)
            ErrorCode::StorageError => 8001,
            ErrorCode::StageFailed => 8002,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Which end of the accepted slide range a deck fell outside of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideBound {
    TooLow,
    TooHigh,
}

impl std::fmt::Display for SlideBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlideBound::TooLow => write!(f, "too low"),
            SlideBound::TooHigh => write!(f, "too high"),
        }
    }
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

    #[error("Unsupported file type: {message}")]
    InvalidFileType { message: String },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Slide count {count} is {bound}: decks must have between {min} and {max} slides")]
    SlideCountOutOfRange {
        count: u32,
        min: u32,
        max: u32,
        bound: SlideBound,
    },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // Resource errors
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Job {id} has no report yet (status {status})")]
    JobNotReady { id: String, status: String },

    #[error("The report for job {id} is no longer available")]
    FileUnavailable { id: String },

    #[error("Stored object not found: {key}")]
    ObjectNotFound { key: String },

    // Conflict errors
    #[error("Invalid status transition for job {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    // Rate limiting
    #[error("Rate limit exceeded: at most {limit} uploads per hour")]
    RateLimited { limit: u32 },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// User-facing pipeline failure; carries no internal detail
    #[error("Deck analysis failed during {stage}. Please try again.")]
    StageFailed { job_id: String, stage: String },

    // Internal errors
    #[error("Internal server error: {message}")]
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
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFileType { .. } => ErrorCode::InvalidFileType,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::SlideCountOutOfRange { .. } => ErrorCode::SlideCountOutOfRange,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::JobNotFound { .. } => ErrorCode::JobNotFound,
            AppError::JobNotReady { .. } => ErrorCode::JobNotReady,
            AppError::FileUnavailable { .. } => ErrorCode::FileUnavailable,
            AppError::ObjectNotFound { .. } => ErrorCode::ObjectNotFound,
            AppError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Storage { .. } => ErrorCode::StorageError,
            AppError::StageFailed { .. } => ErrorCode::StageFailed,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } |
            AppError::SlideCountOutOfRange { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,

            // 404 Not Found
            AppError::JobNotFound { .. } |
            AppError::ObjectNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::JobNotReady { .. } |
            AppError::InvalidTransition { .. } => StatusCode::CONFLICT,

            // 410 Gone
            AppError::FileUnavailable { .. } => StatusCode::GONE,

            // 413 Payload Too Large
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 415 Unsupported Media Type
            AppError::InvalidFileType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Database(_) |
            AppError::DatabaseConnection { .. } |
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Storage { .. } |
            AppError::StageFailed { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Extra machine-readable context for the response body
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::StageFailed { job_id, stage } => Some(serde_json::json!({
                "job_id": job_id,
                "stage": stage,
            })),
            AppError::SlideCountOutOfRange { count, min, max, .. } => Some(serde_json::json!({
                "slide_count": count,
                "min": min,
                "max": max,
            })),
            AppError::Validation { field: Some(field), .. } => Some(serde_json::json!({
                "field": field,
            })),
            _ => None,
        }
    }

    /// Message safe to show to API callers
    fn public_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::DatabaseConnection { .. } => {
                "A database error occurred".to_string()
            }
            AppError::Internal { .. } | AppError::Serialization(_) => {
                "An internal error occurred".to_string()
            }
            AppError::Storage { .. } => "The file store is unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message: self.public_message(),
                details: self.details(),
                request_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}
