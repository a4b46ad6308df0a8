use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::{Ticket, TicketStatus};
use crate::services::qr::{resolve_payload, QrSigner};
use crate::utils::{AppError, AppResult};

/// Admits a ticket at the gate of `event_id`.
///
/// The `VALID -> USED` flip is a single conditional update, so of any number
/// of concurrent scans exactly one succeeds. When nothing matched, the row
/// is re-read to tell the caller why.
pub async fn check_in(pool: &PgPool, ticket_id: Uuid, event_id: Uuid) -> AppResult<Ticket> {
    if let Some(ticket) = Ticket::mark_used(ticket_id, event_id, pool).await? {
        info!(ticket_id = %ticket.id, event_id = %event_id, "Ticket checked in");
        return Ok(ticket);
    }

    match Ticket::find(ticket_id, pool).await? {
        Some(ticket) if ticket.event_id != event_id => Err(AppError::NotFound(format!(
            "Ticket {} not found for event {}",
            ticket_id, event_id
        ))),
        None => Err(AppError::NotFound(format!("Ticket {} not found", ticket_id))),
        Some(ticket) if ticket.status == TicketStatus::Used => Err(AppError::AlreadyUsed {
            ticket_id: ticket.id,
            used_at: ticket.used_at,
        }),
        Some(ticket) => Err(AppError::Conflict(format!(
            "Ticket {} is {:?}",
            ticket.id, ticket.status
        ))),
    }
}

/// Check-in from a scanned QR payload.
pub async fn check_in_payload(
    pool: &PgPool,
    signer: &QrSigner,
    payload: &str,
    event_id: Uuid,
) -> AppResult<Ticket> {
    let scanned = resolve_payload(signer, payload)?;
    scanned.ensure_event(event_id)?;
    check_in(pool, scanned.ticket_id, event_id).await
}
