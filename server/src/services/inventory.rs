use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::models::{Event, TicketType};
use crate::utils::{AppError, AppResult};

/// Expires every `ACTIVE` hold whose deadline has passed and gives its units
/// back to the ticket types' `held` counters.
///
/// Holds are claimed with `SKIP LOCKED`, so a hold that another transaction
/// is settling right now is left alone and picked up by a later sweep if it
/// is still active by then. Returns the ids that were expired.
pub async fn sweep_expired_holds(
    now: DateTime<Utc>,
    conn: &mut PgConnection,
) -> AppResult<Vec<Uuid>> {
    let expired: Vec<Uuid> = sqlx::query_scalar(
        "WITH due AS (
             SELECT id FROM holds
             WHERE status = 'ACTIVE' AND expires_at <= $1
             ORDER BY id
             FOR UPDATE SKIP LOCKED
         )
         UPDATE holds h
         SET status = 'EXPIRED', updated_at = now()
         FROM due
         WHERE h.id = due.id
         RETURNING h.id",
    )
    .bind(now)
    .fetch_all(&mut *conn)
    .await?;

    if expired.is_empty() {
        return Ok(expired);
    }

    let released: Vec<(Uuid, i32)> = sqlx::query_as(
        "SELECT ticket_type_id, SUM(qty)::INT
         FROM hold_items
         WHERE hold_id = ANY($1)
         GROUP BY ticket_type_id
         ORDER BY ticket_type_id",
    )
    .bind(&expired)
    .fetch_all(&mut *conn)
    .await?;

    let ticket_type_ids: Vec<Uuid> = released.iter().map(|(id, _)| *id).collect();
    TicketType::lock_many(&ticket_type_ids, conn).await?;

    for (ticket_type_id, qty) in released {
        TicketType::adjust_held(ticket_type_id, -qty, conn).await?;
    }

    Ok(expired)
}

/// Runs one sweep in its own transaction.
pub async fn run_expiry_sweep(pool: &PgPool, now: DateTime<Utc>) -> AppResult<usize> {
    let mut tx = pool.begin().await?;
    let expired = sweep_expired_holds(now, &mut tx).await?;
    tx.commit().await?;

    if !expired.is_empty() {
        info!(count = expired.len(), "Expired holds released");
    }
    Ok(expired.len())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketTypeAvailability {
    pub ticket_type_id: Uuid,
    pub name: String,
    pub unit_price_minor: i64,
    pub capacity: Option<i32>,
    pub sold: i32,
    pub held: i32,
    /// `None` for unlimited capacity.
    pub remaining: Option<i32>,
}

impl From<TicketType> for TicketTypeAvailability {
    fn from(ticket_type: TicketType) -> Self {
        Self {
            remaining: ticket_type.remaining(),
            ticket_type_id: ticket_type.id,
            name: ticket_type.name,
            unit_price_minor: ticket_type.unit_price_minor,
            capacity: ticket_type.capacity,
            sold: ticket_type.sold,
            held: ticket_type.held,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAvailability {
    pub event_id: Uuid,
    pub title: String,
    pub ticket_types: Vec<TicketTypeAvailability>,
}

pub async fn availability(
    pool: &PgPool,
    event_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<EventAvailability> {
    run_expiry_sweep(pool, now).await?;

    let event = Event::find(event_id, pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {} not found", event_id)))?;

    let ticket_types = TicketType::list_for_event(event.id, pool)
        .await?
        .into_iter()
        .map(TicketTypeAvailability::from)
        .collect();

    Ok(EventAvailability {
        event_id: event.id,
        title: event.title,
        ticket_types,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_row_reports_remaining_units() {
        let row = TicketTypeAvailability::from(TicketType {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            name: "Platea".to_string(),
            unit_price_minor: 20_000,
            capacity: Some(50),
            sold: 20,
            held: 5,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });

        assert_eq!(row.remaining, Some(25));
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["unitPriceMinor"], 20_000);
        assert_eq!(json["remaining"], 25);
    }
}
