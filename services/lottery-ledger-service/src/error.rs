// =============================================================================
// ERROR MODULE
// =============================================================================
// Custom error types for the ledger and their HTTP responses.
//
// NOTES:
// - Every command returns Result<T, AppError>; nothing panics on bad input
// - thiserror derives Display from the #[error("...")] attributes
// - IntoResponse maps each variant to a status code and a stable error code
//
// ERROR HANDLING PHILOSOPHY:
// - Rejected commands never mutate state
// - Storage failures are reported, not "auto-fixed"
// - Internal details are logged, not returned to the client
// =============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use uuid::Uuid;

use crate::models::ErrorResponse;

// =============================================================================
// CUSTOM ERROR TYPE
// =============================================================================
#[derive(Debug, Error)]
pub enum AppError {
    // -------------------------------------------------------------------------
    // STORAGE ERRORS
    // -------------------------------------------------------------------------
    /// Postgres query failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // -------------------------------------------------------------------------
    // LEDGER ERRORS
    // -------------------------------------------------------------------------
    /// Box, ticket pack or store does not exist (or belongs to another store)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input, out-of-range serial, non-monotonic manual entry
    #[error("Validation error: {0}")]
    Validation(String),

    /// Scan against a pack with no tickets left
    #[error("Ticket pack {pack_id} is depleted")]
    Depleted { pack_id: Uuid },

    /// Command not allowed in the record's current state (inactive box,
    /// returned pack, ...)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Optimistic update lost against a concurrent writer too many times.
    /// The caller should retry.
    #[error("Concurrent update conflict: {0}")]
    ConcurrencyConflict(String),
}

impl AppError {
    /// Stable machine-readable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "PERSISTENCE_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Depleted { .. } => "PACK_DEPLETED",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Depleted { .. }
            | AppError::InvalidState(_)
            | AppError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// =============================================================================
// HTTP RESPONSE CONVERSION
// =============================================================================
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_code = self.code();

        // Don't leak driver messages to clients
        let message = match &self {
            AppError::Database(_) => "A storage error occurred".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error_code, error = %self, "Request failed");
        } else {
            tracing::warn!(error_code, message = %message, "Request rejected");
        }

        let body = match &self {
            AppError::Depleted { pack_id } => {
                ErrorResponse::with_details(error_code, message, pack_id.to_string())
            }
            _ => ErrorResponse::new(error_code, message),
        };

        (status, Json(body)).into_response()
    }
}

// =============================================================================
// RESULT TYPE ALIAS
// =============================================================================
pub type AppResult<T> = Result<T, AppError>;
