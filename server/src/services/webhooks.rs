use axum::http::HeaderMap;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};

use crate::config::LateSettlementPolicy;
use crate::models::{Payment, ProviderKind, WebhookEvent};
use crate::providers::{PaymentProvider, PaymentReference, ProviderStatus, WebhookNotification};
use crate::services::payments::{apply_provider_status, PaymentOutcome};
use crate::utils::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "outcome")]
pub enum WebhookOutcome {
    /// The event id was already in the ledger.
    Duplicate,
    /// Genuine, but nothing settlement acts on.
    Ignored,
    /// No local payment matches the notification.
    Unmatched,
    /// Belongs to a checkout attempt that was replaced by a newer one.
    Superseded,
    Applied(PaymentOutcome),
}

/// Authenticates, dedupes and applies one provider notification.
pub async fn process_webhook(
    pool: &PgPool,
    provider: &dyn PaymentProvider,
    headers: &HeaderMap,
    body: &[u8],
    policy: LateSettlementPolicy,
) -> AppResult<WebhookOutcome> {
    match provider.parse_webhook(headers, body).await? {
        Some(notification) => process_notification(pool, provider.kind(), &notification, policy).await,
        None => Ok(WebhookOutcome::Ignored),
    }
}

/// Applies an already authenticated notification.
///
/// The ledger claim and the payment changes share one transaction: a
/// failure rolls both back so the provider's retry is processed again, and
/// a committed claim means the effects are committed too.
pub async fn process_notification(
    pool: &PgPool,
    provider: ProviderKind,
    notification: &WebhookNotification,
    policy: LateSettlementPolicy,
) -> AppResult<WebhookOutcome> {
    let mut tx = pool.begin().await?;

    if !WebhookEvent::try_claim(provider.as_str(), &notification.external_event_id, &mut *tx)
        .await?
    {
        tx.commit().await?;
        info!(
            provider = %provider,
            external_event_id = %notification.external_event_id,
            "Duplicate webhook ignored"
        );
        return Ok(WebhookOutcome::Duplicate);
    }

    let Some(payment) = locate_payment(provider, &notification.reference, &mut tx).await? else {
        // Not claimed: a retry may arrive once the payment row exists.
        tx.rollback().await?;
        warn!(
            provider = %provider,
            external_event_id = %notification.external_event_id,
            reference = ?notification.reference,
            "Webhook does not match any payment"
        );
        return Ok(WebhookOutcome::Unmatched);
    };

    if is_superseded(&notification.reference, &payment) {
        let outcome = match notification.status {
            ProviderStatus::Paid => {
                Payment::flag_refund(payment.id, &mut tx).await?;
                WebhookOutcome::Applied(PaymentOutcome::RefundRequired)
            }
            _ => WebhookOutcome::Superseded,
        };
        tx.commit().await?;
        warn!(
            provider = %provider,
            external_event_id = %notification.external_event_id,
            payment_id = %payment.id,
            attempt = payment.attempt,
            reference = ?notification.reference,
            outcome = ?outcome,
            "Webhook for a superseded checkout attempt"
        );
        return Ok(outcome);
    }

    let outcome = apply_provider_status(&mut tx, &payment, notification.status, policy).await?;
    tx.commit().await?;

    info!(
        provider = %provider,
        external_event_id = %notification.external_event_id,
        payment_id = %payment.id,
        outcome = ?outcome,
        "Webhook processed"
    );
    Ok(WebhookOutcome::Applied(outcome))
}

/// Whether the notification was issued for an earlier checkout attempt than
/// the one the payment row is bound to now.
fn is_superseded(reference: &PaymentReference, payment: &Payment) -> bool {
    if let Some(attempt) = reference.attempt {
        return attempt != payment.attempt;
    }
    matches!(
        (&reference.provider_ref, &payment.provider_ref),
        (Some(theirs), Some(ours)) if theirs != ours
    )
}

/// Finds the payment a notification refers to, trying the most specific
/// identifier first. The row is not locked here: settlement takes the hold
/// lock first and only then writes the payment.
async fn locate_payment(
    provider: ProviderKind,
    reference: &PaymentReference,
    conn: &mut PgConnection,
) -> AppResult<Option<Payment>> {
    if let Some(payment_id) = reference.payment_id {
        if let Some(payment) = Payment::find(payment_id, &mut *conn).await? {
            return Ok(Some(payment));
        }
    }

    if let Some(hold_id) = reference.hold_id {
        if let Some(payment) = Payment::find_by_hold(hold_id, &mut *conn).await? {
            return Ok(Some(payment));
        }
    }

    match &reference.provider_ref {
        Some(provider_ref) => {
            Ok(Payment::find_by_provider_ref(provider, provider_ref, &mut *conn).await?)
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn outcome_serializes_with_result_tag() {
        let applied = serde_json::to_value(WebhookOutcome::Applied(PaymentOutcome::Settled)).unwrap();
        assert_eq!(applied["result"], "applied");
        assert_eq!(applied["outcome"], "settled");

        let duplicate = serde_json::to_value(WebhookOutcome::Duplicate).unwrap();
        assert_eq!(duplicate["result"], "duplicate");
    }

    fn payment(attempt: i32, provider_ref: Option<&str>) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            hold_id: Uuid::new_v4(),
            provider: ProviderKind::Stripe,
            provider_ref: provider_ref.map(str::to_string),
            amount_minor: 12_000,
            attempt,
            status: crate::models::PaymentStatus::Pending,
            buyer_name: "Ana".to_string(),
            buyer_email: "ana@example.com".to_string(),
            event_title: "Festival".to_string(),
            order_id: None,
            refund_required: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn older_attempt_is_superseded() {
        let current = payment(2, Some("cs_2"));
        let stale = PaymentReference {
            attempt: Some(1),
            ..PaymentReference::default()
        };
        let fresh = PaymentReference {
            attempt: Some(2),
            provider_ref: Some("cs_2".to_string()),
            ..PaymentReference::default()
        };

        assert!(is_superseded(&stale, &current));
        assert!(!is_superseded(&fresh, &current));
    }

    #[test]
    fn foreign_provider_ref_is_superseded_without_attempt() {
        let old_token = PaymentReference {
            provider_ref: Some("tok_old".to_string()),
            ..PaymentReference::default()
        };

        assert!(is_superseded(&old_token, &payment(2, Some("tok_new"))));
        // Checkout not attached yet: nothing to compare against.
        assert!(!is_superseded(&old_token, &payment(2, None)));
    }
}
