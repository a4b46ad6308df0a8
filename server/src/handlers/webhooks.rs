use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;

use crate::models::ProviderKind;
use crate::services::webhooks::{process_webhook, WebhookOutcome};
use crate::state::AppState;
use crate::utils::response::success;
use crate::utils::{AppError, AppResult};

/// Provider notifications. Anything short of a signature failure or an
/// internal error is acknowledged with 200 so the provider stops retrying.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let kind: ProviderKind = provider
        .parse()
        .map_err(|_| AppError::NotFound(format!("Unknown payment provider '{}'", provider)))?;
    let provider = state.providers.get(kind).map_err(|_| {
        AppError::NotFound(format!("Payment provider '{}' is not enabled", kind))
    })?;

    let outcome = process_webhook(
        &state.pool,
        provider.as_ref(),
        &headers,
        &body,
        state.config.late_settlement,
    )
    .await?;

    let message = match outcome {
        WebhookOutcome::Duplicate => "Duplicate notification",
        WebhookOutcome::Ignored => "Notification ignored",
        WebhookOutcome::Unmatched => "No matching payment",
        WebhookOutcome::Superseded => "Checkout attempt was replaced",
        WebhookOutcome::Applied(_) => "Notification processed",
    };
    Ok(success(outcome, message))
}
