//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout Insight.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `GenerationUnavailable`: No SQL generation collaborator is configured
//! - `GenerationFailed`: The collaborator call failed or returned unusable content
//! - `RejectedUnsafeQuery`: The validator refused the generated statement
//! - `ExecutionError`: The database rejected or failed the statement
//! - `InvalidInput`: Malformed request or missing question
//! - `InvalidConfig`: Configuration file or environment errors
//! - `Internal`: Infrastructure faults (schema introspection, worker failures)
//!
//! Every error is scoped to a single request. Nothing here is fatal to the process.

use thiserror::Error;

use crate::validator::UnsafeReason;

/// Main error type for Insight operations
#[derive(Error, Debug)]
pub enum InsightError {
    /// The generation collaborator is not configured (no API key)
    #[error("SQL generation is not configured: {0}")]
    GenerationUnavailable(String),

    /// The generation call failed or produced unusable content
    #[error("SQL generation failed: {0}")]
    GenerationFailed(String),

    /// The validator classified the generated statement as unsafe
    #[error("Generated query was rejected: {0}. Only single read-only SELECT statements are allowed.")]
    RejectedUnsafeQuery(UnsafeReason),

    /// The database rejected or failed the statement
    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error (file not found, invalid JSON, missing env var)
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// Infrastructure fault that the caller cannot correct
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InsightError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling by clients.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::GenerationUnavailable(_) => "CONFIGURATION_ERROR",
            Self::GenerationFailed(_) => "GENERATION_FAILED",
            Self::RejectedUnsafeQuery(_) => "REJECTED_UNSAFE_QUERY",
            Self::ExecutionError(_) => "EXECUTION_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller can correct this error by changing the request
    ///
    /// Client faults are reported as HTTP 400, everything else as 500.
    #[must_use]
    pub const fn is_client_fault(&self) -> bool {
        matches!(
            self,
            Self::RejectedUnsafeQuery(_) | Self::ExecutionError(_) | Self::InvalidInput(_)
        )
    }

    /// Get human-readable error message (no credentials, no internal representations)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Validator reason code, present only for rejected queries
    #[must_use]
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::RejectedUnsafeQuery(reason) => Some(reason.code()),
            _ => None,
        }
    }

    /// Create a generation-unavailable error
    pub fn generation_unavailable(message: impl Into<String>) -> Self {
        Self::GenerationUnavailable(message.into())
    }

    /// Create a generation failure error
    pub fn generation_failed(message: impl Into<String>) -> Self {
        Self::GenerationFailed(message.into())
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::ExecutionError(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Result type alias for Insight operations
pub type Result<T> = std::result::Result<T, InsightError>;
