use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::handlers::{json_body, validate_email};
use crate::models::{Payment, PaymentStatus, ProviderKind};
use crate::providers::CheckoutRequest;
use crate::services::payments::{self, BuyerDetails};
use crate::state::AppState;
use crate::utils::response::{created, success};
use crate::utils::{AppError, AppResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateCheckoutBody {
    pub provider: ProviderKind,
    pub buyer_name: String,
    pub buyer_email: String,
}

impl CreateCheckoutBody {
    fn buyer(&self) -> AppResult<BuyerDetails> {
        let name = self.buyer_name.trim();
        if name.is_empty() {
            return Err(AppError::ValidationError(
                "Buyer name is required".to_string(),
            ));
        }
        let email = self.buyer_email.trim().to_lowercase();
        validate_email(&email)?;

        Ok(BuyerDetails {
            name: name.to_string(),
            email,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutView {
    pub payment: Payment,
    pub redirect_url: String,
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Path(hold_id): Path<Uuid>,
    body: Result<Json<CreateCheckoutBody>, JsonRejection>,
) -> AppResult<Response> {
    let body = json_body(body)?;
    let buyer = body.buyer()?;
    let provider = state.providers.get(body.provider)?;

    let payment =
        payments::prepare_for_hold(&state.pool, hold_id, body.provider, &buyer, Utc::now()).await?;

    if payment.status == PaymentStatus::Paid {
        return Err(AppError::Conflict(format!(
            "Hold {} is already paid",
            hold_id
        )));
    }

    let base = &state.config.public_base_url;
    let request = CheckoutRequest {
        payment_id: payment.id,
        attempt: payment.attempt,
        hold_id,
        amount_minor: payment.amount_minor,
        currency: state.config.currency.clone(),
        description: payment.event_title.clone(),
        buyer_email: payment.buyer_email.clone(),
        return_url: format!("{}/payments/{}/status", base, payment.id),
        notify_url: format!("{}/webhooks/{}", base, body.provider),
    };

    let session = provider.create_checkout(&request).await?;
    let payment = Payment::attach_provider_ref(
        payment.id,
        payment.attempt,
        &session.provider_ref,
        &state.pool,
    )
    .await?
    .ok_or_else(|| {
        AppError::Conflict(format!(
            "Checkout for hold {} was replaced by a newer attempt",
            hold_id
        ))
    })?;

    info!(
        payment_id = %payment.id,
        provider = %payment.provider,
        attempt = payment.attempt,
        "Checkout session created"
    );

    Ok(created(
        CheckoutView {
            payment,
            redirect_url: session.redirect_url,
        },
        "Checkout created",
    ))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> AppResult<Response> {
    let view = payments::reconcile_payment(
        &state.pool,
        &state.providers,
        payment_id,
        state.config.late_settlement,
    )
    .await?;

    Ok(success(view, "Payment status retrieved"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(name: &str, email: &str) -> CreateCheckoutBody {
        CreateCheckoutBody {
            provider: ProviderKind::Transfer,
            buyer_name: name.to_string(),
            buyer_email: email.to_string(),
        }
    }

    #[test]
    fn buyer_details_are_normalised() {
        let buyer = body("  Ana Pérez ", " Ana@Example.COM ").buyer().unwrap();
        assert_eq!(buyer.name, "Ana Pérez");
        assert_eq!(buyer.email, "ana@example.com");
    }

    #[test]
    fn blank_name_is_rejected() {
        assert!(matches!(
            body("   ", "ana@example.com").buyer(),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed = serde_json::from_str::<CreateCheckoutBody>(
            r#"{"provider":"stripe","buyerName":"Ana","buyerEmail":"a@b.co","amount":1}"#,
        );
        assert!(parsed.is_err());
    }
}
