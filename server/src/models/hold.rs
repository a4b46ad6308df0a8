use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgExecutor};
use uuid::Uuid;

/// Lifecycle of a hold. `Expired` and `Consumed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "hold_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldStatus {
    Active,
    Expired,
    Consumed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Hold {
    pub id: Uuid,
    pub event_id: Uuid,
    pub status: HoldStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One reserved line. Name and price are snapshots taken from the ticket
/// type row while it was locked.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HoldItem {
    pub hold_id: Uuid,
    pub ticket_type_id: Uuid,
    pub ticket_type_name: String,
    pub unit_price_minor: i64,
    pub qty: i32,
}

impl HoldItem {
    pub fn line_total_minor(&self) -> i64 {
        self.unit_price_minor * i64::from(self.qty)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldWithItems {
    #[serde(flatten)]
    pub hold: Hold,
    pub items: Vec<HoldItem>,
    pub total_minor: i64,
}

impl HoldWithItems {
    pub fn new(hold: Hold, items: Vec<HoldItem>) -> Self {
        let total_minor = items.iter().map(HoldItem::line_total_minor).sum();
        Self {
            hold,
            items,
            total_minor,
        }
    }
}

impl Hold {
    pub fn is_active(&self) -> bool {
        self.status == HoldStatus::Active
    }

    pub async fn find<'e, E>(id: Uuid, executor: E) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>("SELECT * FROM holds WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn lock(id: Uuid, conn: &mut PgConnection) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM holds WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    pub async fn insert(
        event_id: Uuid,
        expires_at: DateTime<Utc>,
        conn: &mut PgConnection,
    ) -> sqlx::Result<Self> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO holds (id, event_id, status, expires_at)
             VALUES ($1, $2, 'ACTIVE', $3)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(expires_at)
        .fetch_one(conn)
        .await
    }

    pub async fn extend(
        id: Uuid,
        expires_at: DateTime<Utc>,
        conn: &mut PgConnection,
    ) -> sqlx::Result<Self> {
        sqlx::query_as::<_, Self>(
            "UPDATE holds
             SET expires_at = $2, updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(expires_at)
        .fetch_one(conn)
        .await
    }

    /// Moves an `Active` hold (or an `Expired` one being settled late) to
    /// `status`. The caller owns the row lock and the counter bookkeeping.
    pub async fn transition(
        id: Uuid,
        status: HoldStatus,
        conn: &mut PgConnection,
    ) -> sqlx::Result<Self> {
        sqlx::query_as::<_, Self>(
            "UPDATE holds
             SET status = $2, updated_at = now()
             WHERE id = $1 AND status <> 'CONSUMED'
             RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_one(conn)
        .await
    }

    pub async fn items<'e, E>(id: Uuid, executor: E) -> sqlx::Result<Vec<HoldItem>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, HoldItem>(
            "SELECT * FROM hold_items
             WHERE hold_id = $1
             ORDER BY ticket_type_id",
        )
        .bind(id)
        .fetch_all(executor)
        .await
    }

    /// Replaces the hold's item set wholesale.
    pub async fn replace_items(
        id: Uuid,
        items: &[HoldItem],
        conn: &mut PgConnection,
    ) -> sqlx::Result<Vec<HoldItem>> {
        sqlx::query("DELETE FROM hold_items WHERE hold_id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        let mut stored = Vec::with_capacity(items.len());
        for item in items {
            let row = sqlx::query_as::<_, HoldItem>(
                "INSERT INTO hold_items (hold_id, ticket_type_id, ticket_type_name, unit_price_minor, qty)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING *",
            )
            .bind(id)
            .bind(item.ticket_type_id)
            .bind(&item.ticket_type_name)
            .bind(item.unit_price_minor)
            .bind(item.qty)
            .fetch_one(&mut *conn)
            .await?;
            stored.push(row);
        }
        Ok(stored)
    }
}
