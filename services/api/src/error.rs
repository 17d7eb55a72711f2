//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how it is
//! rendered at the HTTP boundary.

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use read_receipts_core::service::ReceiptError;
use tracing::error;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an outcome of a read-receipt operation.
    #[error("Read receipt error: {0}")]
    Receipt(#[from] ReceiptError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure while applying schema migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Receipt(e) => match e {
                ReceiptError::Unauthorized => StatusCode::UNAUTHORIZED,
                ReceiptError::Forbidden => StatusCode::FORBIDDEN,
                ReceiptError::NotFound(_) => StatusCode::NOT_FOUND,
                ReceiptError::DuplicateReceipt { .. } => StatusCode::CONFLICT,
                ReceiptError::Inconsistent(_) | ReceiptError::StorageFailure(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Only fixed messages leave the process; details go to the log.
        let status = self.status_code();
        let body = match status {
            StatusCode::UNAUTHORIZED => "Unauthorized",
            StatusCode::FORBIDDEN => "Forbidden",
            StatusCode::NOT_FOUND => "Not found",
            StatusCode::CONFLICT => "Receipt already exists",
            _ => {
                error!("Request failed: {}", self);
                "Internal server error"
            }
        };
        (status, body).into_response()
    }
}
