use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::providers::ProviderRegistry;
use crate::services::{HoldSettings, QrSigner};

/// Shared handler state. Cheap to clone: everything behind it is pooled or
/// reference counted.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub providers: Arc<ProviderRegistry>,
    pub qr: Arc<QrSigner>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let providers = ProviderRegistry::from_config(&config);
        let qr = QrSigner::new(&config.qr_signing_secret);
        Self {
            pool,
            config: Arc::new(config),
            providers: Arc::new(providers),
            qr: Arc::new(qr),
        }
    }

    pub fn hold_settings(&self) -> HoldSettings {
        HoldSettings::from_config(&self.config)
    }
}
