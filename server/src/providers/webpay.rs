use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    parse_checkout_key, upstream_error, CheckoutRequest, CheckoutSession, PaymentProvider, PaymentReference,
    ProviderStatus, WebhookNotification,
};
use crate::config::WebpayConfig;
use crate::models::ProviderKind;
use crate::utils::{AppError, AppResult};

const BUY_ORDER_MAX_LEN: usize = 26;

/// Transbank Webpay Plus. The buyer comes back to the notify url with either
/// `token_ws` (a transaction to commit) or `TBK_TOKEN` (the buyer aborted).
pub struct WebpayProvider {
    config: WebpayConfig,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CreateTransaction<'a> {
    buy_order: String,
    session_id: String,
    amount: i64,
    return_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedTransaction {
    token: String,
    url: String,
}

#[derive(Debug, Deserialize)]
pub struct TransactionResult {
    pub status: Option<String>,
    pub response_code: Option<i64>,
    pub session_id: Option<String>,
}

impl WebpayProvider {
    pub fn new(config: WebpayConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Tbk-Api-Key-Id", &self.config.commerce_code)
            .header("Tbk-Api-Key-Secret", &self.config.api_key)
    }

    async fn read(&self, builder: reqwest::RequestBuilder) -> AppResult<TransactionResult> {
        self.authed(builder)
            .send()
            .await
            .map_err(|e| upstream_error(ProviderKind::Webpay, e))?
            .error_for_status()
            .map_err(|e| upstream_error(ProviderKind::Webpay, e))?
            .json()
            .await
            .map_err(|e| upstream_error(ProviderKind::Webpay, e))
    }

    async fn commit(&self, token: &str) -> AppResult<TransactionResult> {
        let url = format!("{}/transactions/{}", self.config.api_url, token);
        match self.read(self.http.put(&url)).await {
            Ok(result) => Ok(result),
            Err(e) => {
                // A transaction commits once; a repeated return reads its status instead.
                tracing::warn!(error = %e, "Webpay commit failed, reading transaction status");
                self.read(self.http.get(&url)).await
            }
        }
    }
}

#[async_trait]
impl PaymentProvider for WebpayProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Webpay
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> AppResult<CheckoutSession> {
        let body = CreateTransaction {
            buy_order: buy_order_for(request.payment_id),
            session_id: request.checkout_key(),
            amount: request.amount_minor,
            return_url: &request.notify_url,
        };

        let created: CreatedTransaction = self
            .authed(
                self.http
                    .post(format!("{}/transactions", self.config.api_url))
                    .json(&body),
            )
            .send()
            .await
            .map_err(|e| upstream_error(ProviderKind::Webpay, e))?
            .error_for_status()
            .map_err(|e| upstream_error(ProviderKind::Webpay, e))?
            .json()
            .await
            .map_err(|e| upstream_error(ProviderKind::Webpay, e))?;

        Ok(CheckoutSession {
            redirect_url: format!("{}?token_ws={}", created.url, created.token),
            provider_ref: created.token,
        })
    }

    async fn parse_webhook(
        &self,
        _headers: &HeaderMap,
        body: &[u8],
    ) -> AppResult<Option<WebhookNotification>> {
        let mut token_ws = None;
        let mut aborted_token = None;
        for (key, value) in url::form_urlencoded::parse(body) {
            match &*key {
                "token_ws" => token_ws = Some(value.into_owned()),
                "TBK_TOKEN" => aborted_token = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(token) = token_ws.filter(|t| !t.is_empty()) {
            let result = self.commit(&token).await?;
            return Ok(Some(notification_from_result(&token, &result)));
        }

        if let Some(token) = aborted_token.filter(|t| !t.is_empty()) {
            return Ok(Some(WebhookNotification {
                external_event_id: format!("{}:aborted", token),
                status: ProviderStatus::Cancelled,
                reference: PaymentReference {
                    provider_ref: Some(token),
                    ..PaymentReference::default()
                },
            }));
        }

        Err(AppError::ValidationError(
            "Webpay return without token".to_string(),
        ))
    }

    async fn fetch_status(&self, provider_ref: &str) -> AppResult<Option<ProviderStatus>> {
        let url = format!("{}/transactions/{}", self.config.api_url, provider_ref);
        let result = self.read(self.http.get(url)).await?;
        Ok(Some(status_from_result(&result)))
    }
}

/// Webpay caps `buy_order` at 26 characters; the payment is found by token or session id.
fn buy_order_for(payment_id: Uuid) -> String {
    payment_id.simple().to_string()[..BUY_ORDER_MAX_LEN].to_string()
}

pub fn status_from_result(result: &TransactionResult) -> ProviderStatus {
    match (result.status.as_deref(), result.response_code) {
        (Some("AUTHORIZED"), Some(0)) => ProviderStatus::Paid,
        (Some("INITIALIZED"), _) => ProviderStatus::Pending,
        (Some("REVERSED"), _) | (Some("NULLIFIED"), _) => ProviderStatus::Cancelled,
        (Some(_), _) => ProviderStatus::Failed,
        (None, _) => ProviderStatus::Pending,
    }
}

fn notification_from_result(token: &str, result: &TransactionResult) -> WebhookNotification {
    let session = result.session_id.as_deref().and_then(parse_checkout_key);
    WebhookNotification {
        external_event_id: format!("{}:commit", token),
        status: status_from_result(result),
        reference: PaymentReference {
            payment_id: session.map(|(payment_id, _)| payment_id),
            attempt: session.and_then(|(_, attempt)| attempt),
            hold_id: None,
            provider_ref: Some(token.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: Option<&str>, response_code: Option<i64>) -> TransactionResult {
        TransactionResult {
            status: status.map(str::to_string),
            response_code,
            session_id: None,
        }
    }

    #[test]
    fn only_authorized_with_zero_code_is_paid() {
        assert_eq!(
            status_from_result(&result(Some("AUTHORIZED"), Some(0))),
            ProviderStatus::Paid
        );
        assert_eq!(
            status_from_result(&result(Some("AUTHORIZED"), Some(-1))),
            ProviderStatus::Failed
        );
        assert_eq!(
            status_from_result(&result(Some("FAILED"), Some(-1))),
            ProviderStatus::Failed
        );
        assert_eq!(
            status_from_result(&result(Some("INITIALIZED"), None)),
            ProviderStatus::Pending
        );
        assert_eq!(
            status_from_result(&result(Some("NULLIFIED"), Some(0))),
            ProviderStatus::Cancelled
        );
    }

    #[test]
    fn buy_order_fits_webpay_limit() {
        let order = buy_order_for(Uuid::new_v4());
        assert_eq!(order.len(), BUY_ORDER_MAX_LEN);
    }

    #[test]
    fn commit_notification_recovers_payment_from_session_id() {
        let payment_id = Uuid::new_v4();
        let mut committed = result(Some("AUTHORIZED"), Some(0));
        committed.session_id = Some(crate::providers::checkout_key(payment_id, 2));

        let notification = notification_from_result("tok_ws", &committed);
        assert_eq!(notification.external_event_id, "tok_ws:commit");
        assert_eq!(notification.reference.payment_id, Some(payment_id));
        assert_eq!(notification.reference.attempt, Some(2));
        assert_eq!(notification.reference.provider_ref.as_deref(), Some("tok_ws"));
    }
}
