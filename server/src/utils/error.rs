use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::models::hold::HoldStatus;
use crate::utils::response::error as error_response;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Only {max_available} ticket(s) of type {ticket_type_id} can still be reserved")]
    InsufficientStock {
        ticket_type_id: Uuid,
        max_available: i32,
    },

    #[error("Hold {hold_id} is {status:?}")]
    InvalidHoldState { hold_id: Uuid, status: HoldStatus },

    #[error("Hold {hold_id} totals {expected} but the payment covers {paid}")]
    AmountMismatch {
        hold_id: Uuid,
        expected: i64,
        paid: i64,
    },

    #[error("Ticket {ticket_id} was already used")]
    AlreadyUsed {
        ticket_id: Uuid,
        used_at: Option<DateTime<Utc>>,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InsufficientStock { .. } => StatusCode::CONFLICT,
            AppError::InvalidHoldState { .. } => StatusCode::CONFLICT,
            AppError::AmountMismatch { .. } => StatusCode::CONFLICT,
            AppError::AlreadyUsed { .. } => StatusCode::CONFLICT,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::SignatureInvalid => StatusCode::UNAUTHORIZED,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::InvalidHoldState { .. } => "INVALID_HOLD_STATE",
            AppError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            AppError::AlreadyUsed { .. } => "ALREADY_USED",
            AppError::Conflict(_) => "CONFLICT",
            AppError::SignatureInvalid => "SIGNATURE_INVALID",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Machine-readable payload for the expected, user-actionable failures.
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::InsufficientStock {
                ticket_type_id,
                max_available,
            } => Some(json!({
                "ticketTypeId": ticket_type_id,
                "maxAvailable": max_available,
            })),
            AppError::InvalidHoldState { hold_id, status } => Some(json!({
                "holdId": hold_id,
                "status": status,
            })),
            AppError::AmountMismatch {
                hold_id,
                expected,
                paid,
            } => Some(json!({
                "holdId": hold_id,
                "expectedMinor": expected,
                "paidMinor": paid,
            })),
            AppError::AlreadyUsed { ticket_id, used_at } => Some(json!({
                "ticketId": ticket_id,
                "usedAt": used_at,
            })),
            _ => None,
        }
    }

    /// Whether a unique-constraint violation caused this error.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            AppError::DatabaseError(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }

    fn log(&self) {
        match self {
            // Expected outcomes of normal buyer traffic.
            AppError::InsufficientStock { .. }
            | AppError::AlreadyUsed { .. }
            | AppError::InvalidHoldState { .. }
            | AppError::AmountMismatch { .. }
            | AppError::ValidationError(_)
            | AppError::NotFound(_) => {
                warn!(code = self.code(), message = %self, "Request rejected");
            }
            AppError::Forbidden(msg)
            | AppError::Conflict(msg)
            | AppError::ExternalServiceError(msg)
            | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::SignatureInvalid => {
                warn!("Rejected payload with invalid signature");
            }
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        let public_message = match &self {
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        error_response(code, public_message, self.details(), status)
    }
}
