use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgExecutor};
use uuid::Uuid;

/// Inventory counters for one ticket type of an event.
///
/// `sold + held <= capacity` whenever `capacity` is set; the table carries a
/// CHECK constraint for it as well. Counters are only ever changed inside a
/// transaction that holds the row lock taken by [`TicketType::lock_many`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TicketType {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub unit_price_minor: i64,
    pub capacity: Option<i32>,
    pub sold: i32,
    pub held: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TicketType {
    /// Units still purchasable, `None` when capacity is unlimited.
    pub fn remaining(&self) -> Option<i32> {
        self.capacity
            .map(|capacity| (capacity - self.sold - self.held).max(0))
    }

    pub async fn list_for_event<'e, E>(event_id: Uuid, executor: E) -> sqlx::Result<Vec<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM ticket_types
             WHERE event_id = $1
             ORDER BY created_at, id",
        )
        .bind(event_id)
        .fetch_all(executor)
        .await
    }

    /// Row-locks the given ticket types in ascending id order.
    ///
    /// Every writer of the counters goes through here, so concurrent
    /// transactions touching overlapping sets always queue up in the same
    /// order and cannot deadlock each other.
    pub async fn lock_many(ids: &[Uuid], conn: &mut PgConnection) -> sqlx::Result<Vec<Self>> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        sqlx::query_as::<_, Self>(
            "SELECT * FROM ticket_types
             WHERE id = ANY($1)
             ORDER BY id
             FOR UPDATE",
        )
        .bind(ids)
        .fetch_all(conn)
        .await
    }

    /// Applies a signed change to `held`, floored at zero.
    pub async fn adjust_held(id: Uuid, delta: i32, conn: &mut PgConnection) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE ticket_types
             SET held = GREATEST(held + $2, 0), updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(delta)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Moves `qty` units from `held` to `sold` in one statement.
    pub async fn convert_held_to_sold(
        id: Uuid,
        qty: i32,
        conn: &mut PgConnection,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE ticket_types
             SET held = GREATEST(held - $2, 0), sold = sold + $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(qty)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Sells units that are no longer held by anyone (late settlement).
    pub async fn sell_unheld(id: Uuid, qty: i32, conn: &mut PgConnection) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE ticket_types
             SET sold = sold + $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(qty)
        .execute(conn)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket_type(capacity: Option<i32>, sold: i32, held: i32) -> TicketType {
        TicketType {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            name: "General".to_string(),
            unit_price_minor: 15_000,
            capacity,
            sold,
            held,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn remaining_subtracts_sold_and_held() {
        assert_eq!(ticket_type(Some(10), 3, 2).remaining(), Some(5));
    }

    #[test]
    fn remaining_never_goes_negative() {
        assert_eq!(ticket_type(Some(2), 2, 1).remaining(), Some(0));
    }

    #[test]
    fn unlimited_capacity_has_no_remaining_bound() {
        assert_eq!(ticket_type(None, 500, 40).remaining(), None);
    }
}
