use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use uuid::Uuid;

use super::{
    CheckoutRequest, CheckoutSession, PaymentProvider, PaymentReference, ProviderStatus,
    WebhookNotification,
};
use crate::config::TransferConfig;
use crate::models::ProviderKind;
use crate::utils::signing::verify_hmac_sha256_hex;
use crate::utils::{AppError, AppResult};

const SIGNATURE_HEADER: &str = "x-transfer-signature";

/// Manual bank transfer. There is no remote checkout: the buyer is sent to a
/// page with bank details and a reference code, and the back office posts a
/// notification (HMAC-SHA256 over the raw body) once the money is reconciled.
pub struct TransferProvider {
    config: TransferConfig,
}

#[derive(Debug, Deserialize)]
struct TransferNotice {
    event_id: String,
    payment_id: Uuid,
    #[serde(default)]
    attempt: Option<i32>,
    status: String,
}

impl TransferProvider {
    pub fn new(config: TransferConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PaymentProvider for TransferProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Transfer
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> AppResult<CheckoutSession> {
        let reference = transfer_reference(request.payment_id);
        let mut redirect = url::Url::parse(&self.config.instructions_url).map_err(|e| {
            AppError::InternalServerError(format!("Invalid transfer instructions url: {}", e))
        })?;
        redirect
            .query_pairs_mut()
            .append_pair("payment_id", &request.payment_id.to_string())
            .append_pair("attempt", &request.attempt.to_string())
            .append_pair("reference", &reference)
            .append_pair("amount", &request.amount_minor.to_string());

        Ok(CheckoutSession {
            provider_ref: reference,
            redirect_url: redirect.to_string(),
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

        if !verify_hmac_sha256_hex(self.config.webhook_secret.as_bytes(), body, signature) {
            return Err(AppError::SignatureInvalid);
        }

        let notice: TransferNotice = serde_json::from_slice(body).map_err(|e| {
            AppError::ValidationError(format!("Malformed transfer notification: {}", e))
        })?;

        let status = match notice.status.to_ascii_lowercase().as_str() {
            "paid" | "confirmed" => ProviderStatus::Paid,
            "rejected" | "failed" => ProviderStatus::Failed,
            "cancelled" | "canceled" => ProviderStatus::Cancelled,
            _ => ProviderStatus::Pending,
        };

        Ok(Some(WebhookNotification {
            external_event_id: notice.event_id,
            status,
            reference: PaymentReference {
                payment_id: Some(notice.payment_id),
                attempt: notice.attempt,
                ..PaymentReference::default()
            },
        }))
    }
}

/// Short code the buyer writes in the transfer description.
fn transfer_reference(payment_id: Uuid) -> String {
    let simple = payment_id.simple().to_string().to_uppercase();
    format!("TRF-{}", &simple[..10])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::signing::hmac_sha256_hex;
    use axum::http::HeaderValue;

    fn provider() -> TransferProvider {
        TransferProvider::new(TransferConfig {
            webhook_secret: "transfer-secret".to_string(),
            instructions_url: "https://tickets.example/transfer".to_string(),
        })
    }

    fn signed_headers(body: &[u8], secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&hmac_sha256_hex(secret.as_bytes(), body)).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn checkout_points_to_instructions_with_reference() {
        let payment_id = Uuid::new_v4();
        let session = provider()
            .create_checkout(&CheckoutRequest {
                payment_id,
                attempt: 1,
                hold_id: Uuid::new_v4(),
                amount_minor: 30_000,
                currency: "clp".to_string(),
                description: "Concert".to_string(),
                buyer_email: "ana@example.com".to_string(),
                return_url: "http://localhost/return".to_string(),
                notify_url: "http://localhost/webhooks/transfer".to_string(),
            })
            .await
            .unwrap();

        assert!(session.provider_ref.starts_with("TRF-"));
        assert!(session
            .redirect_url
            .starts_with("https://tickets.example/transfer?payment_id="));
        assert!(session.redirect_url.contains("attempt=1"));
        assert!(session.redirect_url.contains("amount=30000"));
    }

    #[tokio::test]
    async fn signed_notice_is_classified() {
        let payment_id = Uuid::new_v4();
        let body = serde_json::to_vec(&serde_json::json!({
            "event_id": "trf_evt_1",
            "payment_id": payment_id,
            "status": "paid",
        }))
        .unwrap();

        let notification = provider()
            .parse_webhook(&signed_headers(&body, "transfer-secret"), &body)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(notification.external_event_id, "trf_evt_1");
        assert_eq!(notification.status, ProviderStatus::Paid);
        assert_eq!(notification.reference.payment_id, Some(payment_id));
        assert_eq!(notification.reference.attempt, None);
    }

    #[tokio::test]
    async fn unsigned_or_forged_notice_fails_closed() {
        let body = br#"{"event_id":"e","payment_id":"00000000-0000-0000-0000-000000000000","status":"paid"}"#;

        let missing = provider().parse_webhook(&HeaderMap::new(), body).await;
        assert!(matches!(missing, Err(AppError::SignatureInvalid)));

        let forged = provider()
            .parse_webhook(&signed_headers(body, "not-the-secret"), body)
            .await;
        assert!(matches!(forged, Err(AppError::SignatureInvalid)));
    }
}
