use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgExecutor};
use uuid::Uuid;

use crate::models::hold::HoldItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Valid,
    Used,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub event_id: Uuid,
    pub ticket_type_id: Uuid,
    pub ticket_type_name: String,
    pub buyer_email: String,
    pub status: TicketStatus,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    pub async fn find<'e, E>(id: Uuid, executor: E) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>("SELECT * FROM tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn for_order<'e, E>(order_id: Uuid, executor: E) -> sqlx::Result<Vec<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM tickets
             WHERE order_id = $1
             ORDER BY ticket_type_name, created_at, id",
        )
        .bind(order_id)
        .fetch_all(executor)
        .await
    }

    /// Issues one `VALID` ticket per unit of the hold item.
    pub async fn issue_for_item(
        order_id: Uuid,
        event_id: Uuid,
        buyer_email: &str,
        item: &HoldItem,
        conn: &mut PgConnection,
    ) -> sqlx::Result<Vec<Self>> {
        let ids: Vec<Uuid> = (0..item.qty).map(|_| Uuid::new_v4()).collect();

        sqlx::query_as::<_, Self>(
            "INSERT INTO tickets
                (id, order_id, event_id, ticket_type_id, ticket_type_name, buyer_email, status)
             SELECT ticket_id, $2, $3, $4, $5, $6, 'VALID'
             FROM UNNEST($1::uuid[]) AS ticket_id
             RETURNING *",
        )
        .bind(ids)
        .bind(order_id)
        .bind(event_id)
        .bind(item.ticket_type_id)
        .bind(&item.ticket_type_name)
        .bind(buyer_email)
        .fetch_all(conn)
        .await
    }

    /// The single `VALID -> USED` flip. `None` means no row matched.
    pub async fn mark_used<'e, E>(
        id: Uuid,
        event_id: Uuid,
        executor: E,
    ) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            "UPDATE tickets
             SET status = 'USED', used_at = now()
             WHERE id = $1 AND event_id = $2 AND status = 'VALID'
             RETURNING *",
        )
        .bind(id)
        .bind(event_id)
        .fetch_optional(executor)
        .await
    }
}
