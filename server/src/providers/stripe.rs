use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::{
    upstream_error, CheckoutRequest, CheckoutSession, PaymentProvider, PaymentReference,
    ProviderStatus, WebhookNotification,
};
use crate::config::StripeConfig;
use crate::models::ProviderKind;
use crate::utils::signing::verify_hmac_sha256_hex;
use crate::utils::{AppError, AppResult};

const SIGNATURE_HEADER: &str = "stripe-signature";
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub struct StripeProvider {
    config: StripeConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    id: String,
    url: Option<String>,
}

impl StripeProvider {
    pub fn new(config: StripeConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> AppResult<CheckoutSession> {
        let payment_id = request.payment_id.to_string();
        let hold_id = request.hold_id.to_string();
        let attempt = request.attempt.to_string();
        let amount = request.amount_minor.to_string();
        let form = [
            ("mode", "payment"),
            ("success_url", request.return_url.as_str()),
            ("cancel_url", request.return_url.as_str()),
            ("customer_email", request.buyer_email.as_str()),
            ("client_reference_id", hold_id.as_str()),
            ("metadata[payment_id]", payment_id.as_str()),
            ("metadata[hold_id]", hold_id.as_str()),
            ("metadata[attempt]", attempt.as_str()),
            ("payment_intent_data[metadata][payment_id]", payment_id.as_str()),
            ("payment_intent_data[metadata][hold_id]", hold_id.as_str()),
            ("payment_intent_data[metadata][attempt]", attempt.as_str()),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", request.currency.as_str()),
            ("line_items[0][price_data][unit_amount]", amount.as_str()),
            (
                "line_items[0][price_data][product_data][name]",
                request.description.as_str(),
            ),
        ];

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.config.api_base))
            .bearer_auth(&self.config.secret_key)
            .header("Idempotency-Key", format!("checkout-{}", request.checkout_key()))
            .form(&form)
            .send()
            .await
            .map_err(|e| upstream_error(ProviderKind::Stripe, e))?
            .error_for_status()
            .map_err(|e| upstream_error(ProviderKind::Stripe, e))?;

        let session: SessionCreated = response
            .json()
            .await
            .map_err(|e| upstream_error(ProviderKind::Stripe, e))?;

        let redirect_url = session.url.ok_or_else(|| {
            AppError::ExternalServiceError("Stripe session has no checkout url".to_string())
        })?;

        Ok(CheckoutSession {
            provider_ref: session.id,
            redirect_url,
        })
    }

    async fn parse_webhook(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> AppResult<Option<WebhookNotification>> {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(AppError::SignatureInvalid)?;

        verify_signature(
            &self.config.webhook_secret,
            signature,
            body,
            Utc::now().timestamp(),
        )?;

        let event: Value = serde_json::from_slice(body).map_err(|e| {
            tracing::warn!(error = %e, "Stripe webhook body is not JSON");
            AppError::ValidationError("Malformed Stripe event".to_string())
        })?;

        Ok(classify_event(&event))
    }

    async fn fetch_status(&self, provider_ref: &str) -> AppResult<Option<ProviderStatus>> {
        let session: Value = self
            .http
            .get(format!(
                "{}/v1/checkout/sessions/{}",
                self.config.api_base, provider_ref
            ))
            .bearer_auth(&self.config.secret_key)
            .query(&[("expand[]", "payment_intent")])
            .send()
            .await
            .map_err(|e| upstream_error(ProviderKind::Stripe, e))?
            .error_for_status()
            .map_err(|e| upstream_error(ProviderKind::Stripe, e))?
            .json()
            .await
            .map_err(|e| upstream_error(ProviderKind::Stripe, e))?;

        Ok(Some(session_status(&session, "")))
    }
}

/// Checks a `t=<unix>,v1=<hex>` header against HMAC-SHA256(`t.payload`).
pub fn verify_signature(secret: &str, header: &str, payload: &[u8], now: i64) -> AppResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(AppError::SignatureInvalid)?;
    if candidates.is_empty() {
        return Err(AppError::SignatureInvalid);
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(timestamp, now, "Stripe webhook timestamp outside tolerance");
        return Err(AppError::SignatureInvalid);
    }

    let mut signed_payload = format!("{}.", timestamp).into_bytes();
    signed_payload.extend_from_slice(payload);

    if candidates
        .iter()
        .any(|candidate| verify_hmac_sha256_hex(secret.as_bytes(), &signed_payload, candidate))
    {
        Ok(())
    } else {
        Err(AppError::SignatureInvalid)
    }
}

/// Maps a verified Stripe event onto a notification, or `None` for event
/// types that do not affect a payment.
pub fn classify_event(event: &Value) -> Option<WebhookNotification> {
    let event_id = event.get("id")?.as_str()?;
    let event_type = event.get("type")?.as_str()?;
    let object = event.get("data")?.get("object")?;

    let (status, provider_ref) = match object.get("object").and_then(Value::as_str)? {
        "checkout.session" => (
            session_status(object, event_type),
            object.get("id").and_then(Value::as_str).map(str::to_string),
        ),
        "payment_intent" => (payment_intent_status(object, event_type), None),
        _ => return None,
    };

    let metadata = object.get("metadata");
    let payment_id = metadata_uuid(metadata, "payment_id");
    let attempt = metadata_str(metadata, "attempt").and_then(|raw| raw.parse().ok());
    let hold_id = metadata_uuid(metadata, "hold_id").or_else(|| {
        object
            .get("client_reference_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    });

    if payment_id.is_none() && hold_id.is_none() && provider_ref.is_none() {
        return None;
    }

    Some(WebhookNotification {
        external_event_id: event_id.to_string(),
        status,
        reference: PaymentReference {
            payment_id,
            attempt,
            hold_id,
            provider_ref,
        },
    })
}

/// Session status, preferring the embedded payment intent when it was expanded.
fn session_status(session: &Value, event_type: &str) -> ProviderStatus {
    if let Some(intent) = session.get("payment_intent").filter(|pi| pi.is_object()) {
        if intent.get("status").is_some() {
            return payment_intent_status(intent, event_type);
        }
    }

    match session.get("payment_status").and_then(Value::as_str) {
        Some("paid") | Some("no_payment_required") => ProviderStatus::Paid,
        _ => match (event_type, session.get("status").and_then(Value::as_str)) {
            ("checkout.session.async_payment_failed", _) => ProviderStatus::Failed,
            ("checkout.session.expired", _) | (_, Some("expired")) => ProviderStatus::Cancelled,
            _ => ProviderStatus::Pending,
        },
    }
}

fn payment_intent_status(intent: &Value, event_type: &str) -> ProviderStatus {
    match intent.get("status").and_then(Value::as_str) {
        Some("succeeded") => ProviderStatus::Paid,
        Some("canceled") => ProviderStatus::Cancelled,
        Some("requires_payment_method") if event_type == "payment_intent.payment_failed" => {
            ProviderStatus::Failed
        }
        _ => ProviderStatus::Pending,
    }
}

fn metadata_str<'a>(metadata: Option<&'a Value>, key: &str) -> Option<&'a str> {
    metadata?.get(key)?.as_str()
}

fn metadata_uuid(metadata: Option<&Value>, key: &str) -> Option<Uuid> {
    metadata_str(metadata, key).and_then(|raw| Uuid::parse_str(raw).ok())
}
