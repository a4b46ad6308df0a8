//! Payment provider adapters.
//!
//! Each provider hides its own wire format, request signing and status
//! vocabulary behind [`PaymentProvider`]. Settlement only ever sees the four
//! canonical [`ProviderStatus`] values and a [`PaymentReference`] it can use
//! to find the local payment row.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::models::ProviderKind;
use crate::utils::{AppError, AppResult};

pub mod flow;
pub mod stripe;
pub mod transfer;
pub mod webpay;

pub use flow::FlowProvider;
pub use stripe::StripeProvider;
pub use transfer::TransferProvider;
pub use webpay::WebpayProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Paid,
    Pending,
    Failed,
    Cancelled,
}

/// What a provider needs to open a hosted checkout for one payment row.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub payment_id: Uuid,
    pub attempt: i32,
    pub hold_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub buyer_email: String,
    /// Where the buyer lands after paying.
    pub return_url: String,
    /// Where the provider posts its notification.
    pub notify_url: String,
}

impl CheckoutRequest {
    /// Identifier unique to this checkout attempt, for provider-side
    /// idempotency keys and merchant order numbers.
    pub fn checkout_key(&self) -> String {
        checkout_key(self.payment_id, self.attempt)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub provider_ref: String,
    pub redirect_url: String,
}

/// Identifiers a notification carries back; any one of them is enough.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentReference {
    pub payment_id: Option<Uuid>,
    /// Checkout attempt the notification belongs to, when the provider echoes it.
    pub attempt: Option<i32>,
    pub hold_id: Option<Uuid>,
    pub provider_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookNotification {
    pub external_event_id: String,
    pub status: ProviderStatus,
    pub reference: PaymentReference,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn create_checkout(&self, request: &CheckoutRequest) -> AppResult<CheckoutSession>;

    /// Authenticates and classifies an inbound notification.
    ///
    /// Fails with [`AppError::SignatureInvalid`] when the payload cannot be
    /// trusted. `Ok(None)` means the event is genuine but carries nothing
    /// settlement cares about.
    async fn parse_webhook(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> AppResult<Option<WebhookNotification>>;

    /// Asks the provider for the current status of `provider_ref`, for
    /// reconciliation polls. Providers without a status API return `None`.
    async fn fetch_status(&self, _provider_ref: &str) -> AppResult<Option<ProviderStatus>> {
        Ok(None)
    }
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn from_config(config: &Config) -> Self {
        let http = reqwest::Client::new();
        let mut registry = Self::default();

        if let Some(stripe) = &config.stripe {
            registry.register(Arc::new(StripeProvider::new(stripe.clone(), http.clone())));
        }
        if let Some(flow) = &config.flow {
            registry.register(Arc::new(FlowProvider::new(flow.clone(), http.clone())));
        }
        if let Some(webpay) = &config.webpay {
            registry.register(Arc::new(WebpayProvider::new(webpay.clone(), http.clone())));
        }
        if let Some(transfer) = &config.transfer {
            registry.register(Arc::new(TransferProvider::new(transfer.clone())));
        }

        tracing::info!(
            providers = ?registry.providers.keys().collect::<Vec<_>>(),
            "Payment providers configured"
        );
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> AppResult<Arc<dyn PaymentProvider>> {
        self.providers.get(&kind).cloned().ok_or_else(|| {
            AppError::ValidationError(format!("Payment provider '{}' is not enabled", kind))
        })
    }
}

pub fn checkout_key(payment_id: Uuid, attempt: i32) -> String {
    format!("{}-{}", payment_id, attempt)
}

/// Reads back a [`checkout_key`]. A bare payment id yields no attempt.
pub fn parse_checkout_key(raw: &str) -> Option<(Uuid, Option<i32>)> {
    let raw = raw.trim();
    if let Ok(payment_id) = Uuid::parse_str(raw) {
        return Some((payment_id, None));
    }
    let (payment_id, attempt) = raw.rsplit_once('-')?;
    Some((Uuid::parse_str(payment_id).ok()?, Some(attempt.parse().ok()?)))
}

pub(crate) fn upstream_error(provider: ProviderKind, e: reqwest::Error) -> AppError {
    AppError::ExternalServiceError(format!("{} request failed: {}", provider, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;

    #[test]
    fn checkout_key_carries_the_attempt() {
        let payment_id = Uuid::new_v4();
        let key = checkout_key(payment_id, 3);

        assert_eq!(parse_checkout_key(&key), Some((payment_id, Some(3))));
        assert_ne!(key, checkout_key(payment_id, 4));
        assert_eq!(
            parse_checkout_key(&payment_id.to_string()),
            Some((payment_id, None))
        );
        assert_eq!(parse_checkout_key("order-12"), None);
        assert_eq!(parse_checkout_key(&format!("{}-x", payment_id)), None);
    }

    #[test]
    fn registry_only_exposes_configured_providers() {
        let mut config = Config::for_tests("postgres://localhost/test");
        config.transfer = Some(TransferConfig {
            webhook_secret: "secret".to_string(),
            instructions_url: "https://tickets.example/transfer".to_string(),
        });

        let registry = ProviderRegistry::from_config(&config);

        assert!(registry.get(ProviderKind::Transfer).is_ok());
        assert!(matches!(
            registry.get(ProviderKind::Stripe),
            Err(AppError::ValidationError(_))
        ));
    }
}
