use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::apply_security_headers;

const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_HOLD_TTL_SECONDS: i64 = 600;
const MIN_HOLD_TTL_SECONDS: i64 = 60;
const MAX_HOLD_TTL_SECONDS: i64 = 3600;
const DEV_QR_SECRET: &str = "dev-only-qr-signing-secret";

/// What to do with a payment confirmation that arrives after its hold expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LateSettlementPolicy {
    /// Settle if the inventory can still cover the hold, otherwise flag a refund.
    Honor,
    /// Never settle; flag the payment for refund.
    Reject,
}

impl FromStr for LateSettlementPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "honor" | "honour" => Ok(LateSettlementPolicy::Honor),
            "reject" => Ok(LateSettlementPolicy::Reject),
            other => Err(format!("unknown late settlement policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub api_key: String,
    pub secret_key: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct WebpayConfig {
    pub commerce_code: String,
    pub api_key: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub webhook_secret: String,
    pub instructions_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub public_base_url: String,
    pub hold_ttl_seconds: i64,
    pub hold_min_ttl_seconds: i64,
    pub hold_max_ttl_seconds: i64,
    pub qr_signing_secret: String,
    pub late_settlement: LateSettlementPolicy,
    pub currency: String,
    pub cors_allowed_origins: Vec<String>,
    pub production: bool,
    pub stripe: Option<StripeConfig>,
    pub flow: Option<FlowConfig>,
    pub webpay: Option<WebpayConfig>,
    pub transfer: Option<TransferConfig>,
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Config: invalid value for {}, using default", key);
            default
        }),
        Err(_) => default,
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let production = env::var("RUST_ENV")
            .map(|v| v.to_lowercase() == "production")
            .unwrap_or(false);

        let qr_signing_secret = non_empty("QR_SIGNING_SECRET").unwrap_or_else(|| {
            tracing::warn!("Config: QR_SIGNING_SECRET not set, using development secret");
            DEV_QR_SECRET.to_string()
        });

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let stripe = match (non_empty("STRIPE_SECRET_KEY"), non_empty("STRIPE_WEBHOOK_SECRET")) {
            (Some(secret_key), Some(webhook_secret)) => Some(StripeConfig {
                secret_key,
                webhook_secret,
                api_base: env::var("STRIPE_API_BASE")
                    .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            }),
            _ => None,
        };

        let flow = match (non_empty("FLOW_API_KEY"), non_empty("FLOW_SECRET_KEY")) {
            (Some(api_key), Some(secret_key)) => Some(FlowConfig {
                api_key,
                secret_key,
                api_url: env::var("FLOW_API_URL")
                    .unwrap_or_else(|_| "https://www.flow.cl/api".to_string()),
            }),
            _ => None,
        };

        let webpay = match (non_empty("WEBPAY_COMMERCE_CODE"), non_empty("WEBPAY_API_KEY")) {
            (Some(commerce_code), Some(api_key)) => Some(WebpayConfig {
                commerce_code,
                api_key,
                api_url: env::var("WEBPAY_API_URL").unwrap_or_else(|_| {
                    "https://webpay3g.transbank.cl/rswebpaytransaction/api/webpay/v1.2".to_string()
                }),
            }),
            _ => None,
        };

        let transfer = non_empty("TRANSFER_WEBHOOK_SECRET").map(|webhook_secret| TransferConfig {
            webhook_secret,
            instructions_url: env::var("TRANSFER_INSTRUCTIONS_URL")
                .unwrap_or_else(|_| "http://localhost:3000/transfer".to_string()),
        });

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/boxoffice".to_string()),
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10),
            bind_addr: parsed(
                "BIND_ADDR",
                DEFAULT_BIND_ADDR
                    .parse()
                    .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 3001))),
            ),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3001".to_string())
                .trim_end_matches('/')
                .to_string(),
            hold_ttl_seconds: parsed("HOLD_TTL_SECONDS", DEFAULT_HOLD_TTL_SECONDS),
            hold_min_ttl_seconds: parsed("HOLD_MIN_TTL_SECONDS", MIN_HOLD_TTL_SECONDS),
            hold_max_ttl_seconds: parsed("HOLD_MAX_TTL_SECONDS", MAX_HOLD_TTL_SECONDS),
            qr_signing_secret,
            late_settlement: parsed("LATE_SETTLEMENT_POLICY", LateSettlementPolicy::Honor),
            currency: env::var("CURRENCY")
                .unwrap_or_else(|_| "clp".to_string())
                .to_lowercase(),
            cors_allowed_origins,
            production,
            stripe,
            flow,
            webpay,
            transfer,
        }
    }

    /// Settings for tests and local tooling: no providers, development secrets.
    pub fn for_tests(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            database_max_connections: 20,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            public_base_url: "http://localhost:3001".to_string(),
            hold_ttl_seconds: DEFAULT_HOLD_TTL_SECONDS,
            hold_min_ttl_seconds: MIN_HOLD_TTL_SECONDS,
            hold_max_ttl_seconds: MAX_HOLD_TTL_SECONDS,
            qr_signing_secret: DEV_QR_SECRET.to_string(),
            late_settlement: LateSettlementPolicy::Honor,
            currency: "clp".to_string(),
            cors_allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .split(',')
                .map(str::to_string)
                .collect(),
            production: false,
            stripe: None,
            flow: None,
            webpay: None,
            transfer: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_settlement_policy_parses_known_values() {
        assert_eq!("honor".parse(), Ok(LateSettlementPolicy::Honor));
        assert_eq!("REJECT".parse(), Ok(LateSettlementPolicy::Reject));
        assert!("maybe".parse::<LateSettlementPolicy>().is_err());
    }

    #[test]
    fn test_config_has_no_providers() {
        let config = Config::for_tests("postgres://localhost/test");
        assert!(config.stripe.is_none());
        assert!(config.flow.is_none());
        assert!(config.webpay.is_none());
        assert!(config.transfer.is_none());
        assert_eq!(config.late_settlement, LateSettlementPolicy::Honor);
    }
}
