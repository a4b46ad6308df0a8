use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgExecutor};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub hold_id: Uuid,
    pub event_id: Uuid,
    pub buyer_name: String,
    pub buyer_email: String,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub async fn find<'e, E>(id: Uuid, executor: E) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_hold<'e, E>(hold_id: Uuid, executor: E) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>("SELECT * FROM orders WHERE hold_id = $1")
            .bind(hold_id)
            .fetch_optional(executor)
            .await
    }

    /// Inserts the order for a hold. Returns `None` when the hold already
    /// has one: the unique `hold_id` index decides the race.
    pub async fn insert_for_hold(
        hold_id: Uuid,
        event_id: Uuid,
        buyer_name: &str,
        buyer_email: &str,
        conn: &mut PgConnection,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO orders (id, hold_id, event_id, buyer_name, buyer_email)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (hold_id) DO NOTHING
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(hold_id)
        .bind(event_id)
        .bind(buyer_name)
        .bind(buyer_email)
        .fetch_optional(conn)
        .await
    }
}
