use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};

/// Dedupe ledger row: one per external notification ever processed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub provider: String,
    pub external_event_id: String,
    pub received_at: DateTime<Utc>,
}

impl WebhookEvent {
    /// Insert-if-absent on `(provider, external_event_id)`.
    ///
    /// Returns `true` only for the caller whose insert created the row. Run it
    /// inside the transaction that applies the notification so a rollback
    /// releases the claim for the provider's next retry.
    pub async fn try_claim<'e, E>(
        provider: &str,
        external_event_id: &str,
        executor: E,
    ) -> sqlx::Result<bool>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "INSERT INTO webhook_events (provider, external_event_id)
             VALUES ($1, $2)
             ON CONFLICT (provider, external_event_id) DO NOTHING",
        )
        .bind(provider)
        .bind(external_event_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn find<'e, E>(
        provider: &str,
        external_event_id: &str,
        executor: E,
    ) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM webhook_events WHERE provider = $1 AND external_event_id = $2",
        )
        .bind(provider)
        .bind(external_event_id)
        .fetch_optional(executor)
        .await
    }
}
