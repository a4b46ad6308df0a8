use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::state::AppState;
use crate::utils::response::success;
use crate::utils::{AppError, AppResult};

pub mod checkin;
pub mod checkout;
pub mod holds;
pub mod orders;
pub mod webhooks;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
    database: &'static str,
}

pub async fn health_check(State(state): State<AppState>) -> Response {
    let database_up = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();

    let payload = HealthPayload {
        status: if database_up { "ok" } else { "degraded" },
        service: "boxoffice-api",
        database: if database_up { "up" } else { "down" },
    };

    if database_up {
        success(payload, "Health check successful")
    } else {
        tracing::warn!("Health check: database unreachable");
        (StatusCode::SERVICE_UNAVAILABLE, Json(payload)).into_response()
    }
}

/// Unwraps a JSON body, reporting malformed input in the API error envelope
/// instead of axum's plain-text rejection.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::ValidationError(rejection.body_text()))
}

/// Minimal shape check; the provider is the authority on deliverability.
pub(crate) fn validate_email(email: &str) -> AppResult<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };

    if valid && !email.contains(char::is_whitespace) {
        Ok(())
    } else {
        Err(AppError::ValidationError(format!(
            "'{}' is not a valid email address",
            email
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape_is_checked() {
        assert!(validate_email("ana@example.com").is_ok());
        assert!(validate_email("ana@example").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("ana example@example.com").is_err());
        assert!(validate_email("ana.example.com").is_err());
    }
}
