use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgExecutor};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::order::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_provider", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Stripe,
    Flow,
    Webpay,
    Transfer,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Stripe => "stripe",
            ProviderKind::Flow => "flow",
            ProviderKind::Webpay => "webpay",
            ProviderKind::Transfer => "transfer",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Ok(ProviderKind::Stripe),
            "flow" => Ok(ProviderKind::Flow),
            "webpay" => Ok(ProviderKind::Webpay),
            "transfer" => Ok(ProviderKind::Transfer),
            other => Err(format!("unknown payment provider '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub hold_id: Uuid,
    pub provider: ProviderKind,
    pub provider_ref: Option<String>,
    pub amount_minor: i64,
    /// Bumped each time checkout is re-initiated for the hold.
    pub attempt: i32,
    pub status: PaymentStatus,
    pub buyer_name: String,
    pub buyer_email: String,
    pub event_title: String,
    pub order_id: Option<Uuid>,
    pub refund_required: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written when a checkout attempt is (re)bound to a hold.
#[derive(Debug, Clone)]
pub struct PaymentDraft {
    pub hold_id: Uuid,
    pub provider: ProviderKind,
    pub amount_minor: i64,
    pub buyer_name: String,
    pub buyer_email: String,
    pub event_title: String,
}

impl Payment {
    /// Whether a checkout for this payment may still be completed at the provider.
    pub fn is_open(&self) -> bool {
        matches!(self.status, PaymentStatus::Pending | PaymentStatus::Paid)
    }

    pub async fn find<'e, E>(id: Uuid, executor: E) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_hold<'e, E>(hold_id: Uuid, executor: E) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>("SELECT * FROM payments WHERE hold_id = $1")
            .bind(hold_id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_provider_ref<'e, E>(
        provider: ProviderKind,
        provider_ref: &str,
        executor: E,
    ) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM payments WHERE provider = $1 AND provider_ref = $2",
        )
        .bind(provider)
        .bind(provider_ref)
        .fetch_optional(executor)
        .await
    }

    /// Inserts the hold's payment row or refreshes the existing one.
    ///
    /// A payment that is already `PAID` is left untouched and `None` is
    /// returned; the unique index on `hold_id` keeps it to one row per hold.
    pub async fn upsert_for_hold(
        draft: &PaymentDraft,
        conn: &mut PgConnection,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO payments
                (id, hold_id, provider, amount_minor, status, buyer_name, buyer_email, event_title)
             VALUES ($1, $2, $3, $4, 'PENDING', $5, $6, $7)
             ON CONFLICT (hold_id) DO UPDATE SET
                provider = EXCLUDED.provider,
                provider_ref = NULL,
                amount_minor = EXCLUDED.amount_minor,
                status = 'PENDING',
                attempt = payments.attempt + 1,
                buyer_name = EXCLUDED.buyer_name,
                buyer_email = EXCLUDED.buyer_email,
                event_title = EXCLUDED.event_title,
                updated_at = now()
             WHERE payments.status <> 'PAID'
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(draft.hold_id)
        .bind(draft.provider)
        .bind(draft.amount_minor)
        .bind(&draft.buyer_name)
        .bind(&draft.buyer_email)
        .bind(&draft.event_title)
        .fetch_optional(conn)
        .await
    }

    /// Records the provider's handle for `attempt`. Returns `None` when a
    /// newer attempt replaced it in the meantime.
    pub async fn attach_provider_ref<'e, E>(
        id: Uuid,
        attempt: i32,
        provider_ref: &str,
        executor: E,
    ) -> sqlx::Result<Option<Self>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Self>(
            "UPDATE payments
             SET provider_ref = $3, updated_at = now()
             WHERE id = $1 AND attempt = $2 AND status = 'PENDING'
             RETURNING *",
        )
        .bind(id)
        .bind(attempt)
        .bind(provider_ref)
        .fetch_optional(executor)
        .await
    }

    /// Stamps the settlement result. Re-running it with the same order is a no-op.
    pub async fn mark_paid(
        id: Uuid,
        order: &Order,
        conn: &mut PgConnection,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "UPDATE payments
             SET status = 'PAID', order_id = $2, updated_at = now()
             WHERE id = $1 AND hold_id = $3 AND (order_id IS NULL OR order_id = $2)
             RETURNING *",
        )
        .bind(id)
        .bind(order.id)
        .bind(order.hold_id)
        .fetch_optional(conn)
        .await
    }

    /// Records a paid notification that could not be turned into an order.
    pub async fn mark_paid_unsettled(id: Uuid, conn: &mut PgConnection) -> sqlx::Result<Self> {
        sqlx::query_as::<_, Self>(
            "UPDATE payments
             SET status = 'PAID', refund_required = refund_required OR order_id IS NULL,
                 updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .fetch_one(conn)
        .await
    }

    /// Flags money received for a superseded checkout attempt. The current
    /// attempt and its status are left alone.
    pub async fn flag_refund(id: Uuid, conn: &mut PgConnection) -> sqlx::Result<Self> {
        sqlx::query_as::<_, Self>(
            "UPDATE payments
             SET refund_required = TRUE, updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .fetch_one(conn)
        .await
    }

    /// Sets a non-paid outcome. A `PAID` payment is never downgraded.
    pub async fn mark_unpaid(
        id: Uuid,
        status: PaymentStatus,
        conn: &mut PgConnection,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "UPDATE payments
             SET status = $2, updated_at = now()
             WHERE id = $1 AND status <> 'PAID'
             RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_optional(conn)
        .await
    }
}
