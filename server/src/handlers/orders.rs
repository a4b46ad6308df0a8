use axum::extract::{Path, State};
use axum::response::Response;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Order, Ticket};
use crate::services::QrSigner;
use crate::state::AppState;
use crate::utils::response::success;
use crate::utils::{AppError, AppResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketView {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub qr_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub order: Order,
    pub tickets: Vec<TicketView>,
}

impl OrderView {
    pub fn new(order: Order, tickets: Vec<Ticket>, signer: &QrSigner) -> Self {
        let tickets = tickets
            .into_iter()
            .map(|ticket| TicketView {
                qr_token: signer.sign(ticket.id, ticket.event_id),
                ticket,
            })
            .collect();
        Self { order, tickets }
    }
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Response> {
    let order = Order::find(order_id, &state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))?;
    let tickets = Ticket::for_order(order.id, &state.pool).await?;

    Ok(success(
        OrderView::new(order, tickets, &state.qr),
        "Order retrieved",
    ))
}
