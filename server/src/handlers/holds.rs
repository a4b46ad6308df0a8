use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::json_body;
use crate::services::holds::{self, HoldRequest, RequestedItem};
use crate::services::inventory;
use crate::state::AppState;
use crate::utils::response::{created, success};
use crate::utils::AppResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateHoldBody {
    pub items: Vec<RequestedItem>,
    pub ttl_seconds: Option<i64>,
    /// Hold to rewrite instead of opening a new one.
    pub hold_id: Option<Uuid>,
}

pub async fn availability(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> AppResult<Response> {
    let availability = inventory::availability(&state.pool, event_id, Utc::now()).await?;
    Ok(success(availability, "Availability retrieved"))
}

pub async fn create_hold(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    body: Result<Json<CreateHoldBody>, JsonRejection>,
) -> AppResult<Response> {
    let body = json_body(body)?;
    let request = HoldRequest {
        event_id,
        items: body.items,
        ttl_seconds: body.ttl_seconds,
        existing_hold_id: body.hold_id,
    };

    let hold = holds::create_or_reuse_hold(
        &state.pool,
        &request,
        &state.hold_settings(),
        Utc::now(),
    )
    .await?;

    Ok(created(hold, "Hold reserved"))
}

pub async fn get_hold(
    State(state): State<AppState>,
    Path(hold_id): Path<Uuid>,
) -> AppResult<Response> {
    let hold = holds::get_hold(&state.pool, hold_id).await?;
    Ok(success(hold, "Hold retrieved"))
}

pub async fn release_hold(
    State(state): State<AppState>,
    Path(hold_id): Path<Uuid>,
) -> AppResult<Response> {
    let hold = holds::release_hold(&state.pool, hold_id).await?;
    Ok(success(hold, "Hold released"))
}
