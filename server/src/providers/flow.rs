use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{
    parse_checkout_key, upstream_error, CheckoutRequest, CheckoutSession, PaymentProvider, PaymentReference,
    ProviderStatus, WebhookNotification,
};
use crate::config::FlowConfig;
use crate::models::ProviderKind;
use crate::utils::signing::hmac_sha256_hex;
use crate::utils::{AppError, AppResult};

/// Flow (flow.cl). API parameters are signed with HMAC-SHA256 over the
/// alphabetically sorted `key value` concatenation. The confirmation callback
/// only carries a token, so its status is always re-read from the signed
/// `payment/getStatus` endpoint before anything is trusted.
pub struct FlowProvider {
    config: FlowConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedPayment {
    url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowPaymentStatus {
    pub commerce_order: String,
    pub status: i64,
    #[serde(default)]
    pub optional: Option<serde_json::Value>,
}

impl FlowProvider {
    pub fn new(config: FlowConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn signed(&self, mut params: Vec<(String, String)>) -> Vec<(String, String)> {
        params.push(("apiKey".to_string(), self.config.api_key.clone()));
        let signature = sign_params(&self.config.secret_key, &params);
        params.push(("s".to_string(), signature));
        params
    }

    async fn get_status(&self, token: &str) -> AppResult<FlowPaymentStatus> {
        let params = self.signed(vec![("token".to_string(), token.to_string())]);
        self.http
            .get(format!("{}/payment/getStatus", self.config.api_url))
            .query(&params)
            .send()
            .await
            .map_err(|e| upstream_error(ProviderKind::Flow, e))?
            .error_for_status()
            .map_err(|e| upstream_error(ProviderKind::Flow, e))?
            .json()
            .await
            .map_err(|e| upstream_error(ProviderKind::Flow, e))
    }
}

#[async_trait]
impl PaymentProvider for FlowProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Flow
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> AppResult<CheckoutSession> {
        let optional = json!({ "hold_id": request.hold_id }).to_string();
        let params = self.signed(vec![
            ("commerceOrder".to_string(), request.checkout_key()),
            ("subject".to_string(), request.description.clone()),
            ("currency".to_string(), request.currency.to_uppercase()),
            ("amount".to_string(), request.amount_minor.to_string()),
            ("email".to_string(), request.buyer_email.clone()),
            ("urlConfirmation".to_string(), request.notify_url.clone()),
            ("urlReturn".to_string(), request.return_url.clone()),
            ("optional".to_string(), optional),
        ]);

        let created: CreatedPayment = self
            .http
            .post(format!("{}/payment/create", self.config.api_url))
            .form(&params)
            .send()
            .await
            .map_err(|e| upstream_error(ProviderKind::Flow, e))?
            .error_for_status()
            .map_err(|e| upstream_error(ProviderKind::Flow, e))?
            .json()
            .await
            .map_err(|e| upstream_error(ProviderKind::Flow, e))?;

        Ok(CheckoutSession {
            redirect_url: format!("{}?token={}", created.url, created.token),
            provider_ref: created.token,
        })
    }

    async fn parse_webhook(
        &self,
        _headers: &HeaderMap,
        body: &[u8],
    ) -> AppResult<Option<WebhookNotification>> {
        let token = url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::ValidationError("Flow callback without token".to_string()))?;

        let payment = self.get_status(&token).await?;
        Ok(Some(notification_from_status(&token, &payment)))
    }

    async fn fetch_status(&self, provider_ref: &str) -> AppResult<Option<ProviderStatus>> {
        let payment = self.get_status(provider_ref).await?;
        Ok(Some(status_from_code(payment.status)))
    }
}

pub fn sign_params(secret: &str, params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().filter(|(key, _)| key != "s").collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let to_sign: String = sorted
        .iter()
        .map(|(key, value)| format!("{}{}", key, value))
        .collect();
    hmac_sha256_hex(secret.as_bytes(), to_sign.as_bytes())
}

/// Flow codes: 1 pending, 2 paid, 3 rejected, 4 cancelled.
pub fn status_from_code(code: i64) -> ProviderStatus {
    match code {
        2 => ProviderStatus::Paid,
        3 => ProviderStatus::Failed,
        4 => ProviderStatus::Cancelled,
        _ => ProviderStatus::Pending,
    }
}

fn notification_from_status(token: &str, payment: &FlowPaymentStatus) -> WebhookNotification {
    let hold_id = payment
        .optional
        .as_ref()
        .and_then(|optional| optional.get("hold_id"))
        .and_then(|value| value.as_str())
        .and_then(|raw| Uuid::parse_str(raw).ok());
    let order = parse_checkout_key(&payment.commerce_order);

    WebhookNotification {
        // Flow reuses the token for every callback of a payment, so the
        // status is part of the dedupe key.
        external_event_id: format!("{}:{}", token, payment.status),
        status: status_from_code(payment.status),
        reference: PaymentReference {
            payment_id: order.map(|(payment_id, _)| payment_id),
            attempt: order.and_then(|(_, attempt)| attempt),
            hold_id,
            provider_ref: Some(token.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_ignores_parameter_order() {
        let a = vec![
            ("token".to_string(), "abc".to_string()),
            ("apiKey".to_string(), "key".to_string()),
        ];
        let b = vec![
            ("apiKey".to_string(), "key".to_string()),
            ("token".to_string(), "abc".to_string()),
        ];
        assert_eq!(sign_params("secret", &a), sign_params("secret", &b));
        assert_eq!(
            sign_params("secret", &a),
            hmac_sha256_hex(b"secret", b"apiKeykeytokenabc")
        );
    }

    #[test]
    fn status_codes_map_to_canonical_statuses() {
        assert_eq!(status_from_code(1), ProviderStatus::Pending);
        assert_eq!(status_from_code(2), ProviderStatus::Paid);
        assert_eq!(status_from_code(3), ProviderStatus::Failed);
        assert_eq!(status_from_code(4), ProviderStatus::Cancelled);
        assert_eq!(status_from_code(99), ProviderStatus::Pending);
    }

    #[test]
    fn notification_carries_commerce_order_and_status_keyed_event_id() {
        let payment_id = Uuid::new_v4();
        let hold_id = Uuid::new_v4();
        let status = FlowPaymentStatus {
            commerce_order: payment_id.to_string(),
            status: 2,
            optional: Some(json!({ "hold_id": hold_id.to_string() })),
        };

        let notification = notification_from_status("tok_1", &status);
        assert_eq!(notification.external_event_id, "tok_1:2");
        assert_eq!(notification.status, ProviderStatus::Paid);
        assert_eq!(notification.reference.payment_id, Some(payment_id));
        assert_eq!(notification.reference.hold_id, Some(hold_id));
        assert_eq!(notification.reference.provider_ref.as_deref(), Some("tok_1"));
        assert_eq!(notification.reference.attempt, None);
    }

    #[test]
    fn commerce_order_yields_payment_and_attempt() {
        let payment_id = Uuid::new_v4();
        let status = FlowPaymentStatus {
            commerce_order: crate::providers::checkout_key(payment_id, 4),
            status: 1,
            optional: None,
        };

        let notification = notification_from_status("tok_2", &status);
        assert_eq!(notification.reference.payment_id, Some(payment_id));
        assert_eq!(notification.reference.attempt, Some(4));
        assert_eq!(notification.reference.hold_id, None);
    }
}
