use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::json_body;
use crate::services::checkin::check_in_payload;
use crate::state::AppState;
use crate::utils::response::success;
use crate::utils::AppResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CheckInBody {
    /// Raw scanner output: signed token, JSON, URL or ticket id.
    pub payload: String,
}

pub async fn check_in(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    body: Result<Json<CheckInBody>, JsonRejection>,
) -> AppResult<Response> {
    let body = json_body(body)?;
    let ticket = check_in_payload(&state.pool, &state.qr, &body.payload, event_id).await?;
    Ok(success(ticket, "Ticket checked in"))
}
