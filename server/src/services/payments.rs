use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::LateSettlementPolicy;
use crate::models::{
    Event, Hold, HoldItem, Order, Payment, PaymentDraft, PaymentStatus, ProviderKind,
};
use crate::providers::{ProviderRegistry, ProviderStatus};
use crate::services::inventory::run_expiry_sweep;
use crate::services::settlement::{
    finalize_paid_hold_in, load_settlement, Settlement, SettlementRequest,
};
use crate::utils::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct BuyerDetails {
    pub name: String,
    pub email: String,
}

/// Binds a checkout attempt to an active hold.
///
/// One payment row exists per hold: a new attempt (possibly with another
/// provider) refreshes it in place. The amount is always recomputed from
/// the hold's price snapshots. A payment that is already `PAID` is returned
/// untouched.
pub async fn prepare_for_hold(
    pool: &PgPool,
    hold_id: Uuid,
    provider: ProviderKind,
    buyer: &BuyerDetails,
    now: DateTime<Utc>,
) -> AppResult<Payment> {
    run_expiry_sweep(pool, now).await?;

    let mut tx = pool.begin().await?;

    let hold = Hold::lock(hold_id, &mut tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Hold {} not found", hold_id)))?;

    if !hold.is_active() || hold.expires_at <= now {
        return Err(AppError::InvalidHoldState {
            hold_id: hold.id,
            status: hold.status,
        });
    }

    let items = Hold::items(hold.id, &mut *tx).await?;
    let amount_minor: i64 = items.iter().map(HoldItem::line_total_minor).sum();

    let event = Event::find(hold.event_id, &mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {} not found", hold.event_id)))?;

    let draft = PaymentDraft {
        hold_id: hold.id,
        provider,
        amount_minor,
        buyer_name: buyer.name.clone(),
        buyer_email: buyer.email.clone(),
        event_title: event.title,
    };

    let payment = match Payment::upsert_for_hold(&draft, &mut tx).await? {
        Some(payment) => payment,
        None => Payment::find_by_hold(hold.id, &mut *tx).await?.ok_or_else(|| {
            AppError::InternalServerError(format!("Payment for hold {} vanished", hold.id))
        })?,
    };

    tx.commit().await?;

    info!(
        payment_id = %payment.id,
        hold_id = %hold.id,
        provider = %provider,
        amount_minor,
        "Payment prepared"
    );
    Ok(payment)
}

/// Result of applying one canonical provider status to a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Settled,
    AlreadySettled,
    RefundRequired,
    Pending,
    Failed,
    Cancelled,
}

/// Applies `status` to a payment on the caller's transaction.
///
/// A paid status settles the hold. When settlement is impossible (the hold
/// expired and was rejected, its units were resold, or it no longer totals
/// what was charged) the payment is still recorded as paid and flagged for
/// refund.
pub async fn apply_provider_status(
    conn: &mut PgConnection,
    payment: &Payment,
    status: ProviderStatus,
    policy: LateSettlementPolicy,
) -> AppResult<PaymentOutcome> {
    match status {
        ProviderStatus::Paid => {
            let request = SettlementRequest::for_payment(payment);
            match finalize_paid_hold_in(conn, &request, policy).await {
                Ok(settlement) if settlement.newly_settled => Ok(PaymentOutcome::Settled),
                Ok(_) => Ok(PaymentOutcome::AlreadySettled),
                Err(
                    e @ (AppError::InvalidHoldState { .. }
                    | AppError::InsufficientStock { .. }
                    | AppError::AmountMismatch { .. }),
                ) => {
                    warn!(
                        payment_id = %payment.id,
                        hold_id = %payment.hold_id,
                        reason = %e,
                        "Paid hold could not be settled, flagging refund"
                    );
                    Payment::mark_paid_unsettled(payment.id, conn).await?;
                    Ok(PaymentOutcome::RefundRequired)
                }
                Err(e) => Err(e),
            }
        }
        ProviderStatus::Pending => Ok(PaymentOutcome::Pending),
        ProviderStatus::Failed => {
            Payment::mark_unpaid(payment.id, PaymentStatus::Failed, conn).await?;
            Ok(PaymentOutcome::Failed)
        }
        ProviderStatus::Cancelled => {
            Payment::mark_unpaid(payment.id, PaymentStatus::Cancelled, conn).await?;
            Ok(PaymentOutcome::Cancelled)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub payment: Payment,
    pub settlement: Option<Settlement>,
}

/// Brings a payment up to date and returns it with its settlement.
///
/// A pending payment is re-read from its provider when the provider has a
/// status API. A paid payment without an order (a settlement that failed
/// after the money arrived) is settled again unless it is flagged for
/// refund.
pub async fn reconcile_payment(
    pool: &PgPool,
    providers: &ProviderRegistry,
    payment_id: Uuid,
    policy: LateSettlementPolicy,
) -> AppResult<PaymentView> {
    let payment = Payment::find(payment_id, pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", payment_id)))?;

    let remote_status = match (&payment.status, &payment.provider_ref) {
        (PaymentStatus::Pending, Some(provider_ref)) => match providers.get(payment.provider) {
            Ok(provider) => provider.fetch_status(provider_ref).await?,
            Err(_) => None,
        },
        (PaymentStatus::Paid, _) if payment.order_id.is_none() && !payment.refund_required => {
            Some(ProviderStatus::Paid)
        }
        _ => None,
    };

    if let Some(status) = remote_status {
        let mut tx = pool.begin().await?;
        let outcome = apply_provider_status(&mut tx, &payment, status, policy).await?;
        tx.commit().await?;
        info!(payment_id = %payment.id, outcome = ?outcome, "Payment reconciled");
    }

    let mut conn = pool.acquire().await?;
    let payment = Payment::find(payment_id, &mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", payment_id)))?;

    let settlement = match payment.order_id {
        Some(order_id) => match Order::find(order_id, &mut *conn).await? {
            Some(order) => Some(load_settlement(order, &mut conn).await?),
            None => None,
        },
        None => None,
    };

    Ok(PaymentView {
        payment,
        settlement,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_serialize_in_snake_case() {
        assert_eq!(
            serde_json::to_string(&PaymentOutcome::AlreadySettled).unwrap(),
            "\"already_settled\""
        );
        assert_eq!(
            serde_json::to_string(&PaymentOutcome::RefundRequired).unwrap(),
            "\"refund_required\""
        );
    }
}
