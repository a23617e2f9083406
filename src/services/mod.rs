mod certificates;
pub mod claims;
mod client_registry;
mod code_exchange;
mod legacy_oauth;
mod relay_state;
mod request_builder;
mod response_verifier;
mod signing_keys;
pub mod sweeper;
#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

pub use certificates::{
    CertificateManager, CertificateManagers, CertificateSettings, Clock, system_clock,
};
pub use client_registry::ClientRegistry;
pub use code_exchange::{CodeExchangeBridge, SAML_ID_TOKEN_TYPE, SamlTokenPayload, UserInfo};
pub use legacy_oauth::LegacyOAuthBridge;
pub use relay_state::RelayStateTracker;
pub use request_builder::RequestBuilder;
pub use response_verifier::{ResponseVerifier, verify_response};
pub use signing_keys::{SigningKeyError, SigningKeyProvider, StaticSigningKeys, VerificationKey};

use crate::{config::SamlConfig, db::DbPool, saml::SamlResult};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub db: Arc<DbPool>,
    pub clients: ClientRegistry,
    pub relay_states: RelayStateTracker,
    pub requests: RequestBuilder,
    pub callbacks: ResponseVerifier,
    pub codes: CodeExchangeBridge,
    pub legacy: LegacyOAuthBridge,
    pub certificates: Arc<CertificateManagers>,
    pub signing_keys: Arc<dyn SigningKeyProvider>,
}

impl Services {
    pub fn new(
        db: Arc<DbPool>,
        config: &SamlConfig,
        signing_keys: Arc<dyn SigningKeyProvider>,
    ) -> SamlResult<Self> {
        Self::with_clock(db, config, signing_keys, system_clock())
    }

    /// Like [`Services::new`] with an explicit time source for certificate
    /// expiry and response validity checks.
    pub fn with_clock(
        db: Arc<DbPool>,
        config: &SamlConfig,
        signing_keys: Arc<dyn SigningKeyProvider>,
        clock: Clock,
    ) -> SamlResult<Self> {
        Self::build(
            db,
            config,
            CertificateSettings::from(&config.certificate),
            signing_keys,
            clock,
        )
    }

    fn build(
        db: Arc<DbPool>,
        config: &SamlConfig,
        certificate_settings: CertificateSettings,
        signing_keys: Arc<dyn SigningKeyProvider>,
        clock: Clock,
    ) -> SamlResult<Self> {
        let certificates = Arc::new(CertificateManagers::with_clock(
            db.key_value(),
            certificate_settings,
            Arc::clone(&clock),
        ));
        let clients = ClientRegistry::new(db.clone(), config.metadata_fetch.clone())?;
        let relay_states = RelayStateTracker::new(db.clone());
        let requests = RequestBuilder::new(
            clients.clone(),
            relay_states.clone(),
            Arc::clone(&certificates),
        );
        let codes = CodeExchangeBridge::new(
            db.clone(),
            Arc::clone(&signing_keys),
            config.claims.clone(),
            chrono::Duration::seconds(config.token_ttl_secs as i64),
        );

        Ok(Self {
            callbacks: ResponseVerifier::new(
                db.clone(),
                clients.clone(),
                relay_states.clone(),
                chrono::Duration::seconds(config.clock_skew_secs as i64),
                clock,
            ),
            legacy: LegacyOAuthBridge::new(
                db.clone(),
                clients.clone(),
                requests.clone(),
                codes.clone(),
                config.legacy_acs_url.clone(),
            ),
            requests,
            codes,
            db,
            clients,
            relay_states,
            certificates,
            signing_keys,
        })
    }

    /// In-memory services with default settings, 2048-bit SP keys, no
    /// warm-up and a signing key shared by all tests.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::for_tests_with_clock(system_clock())
    }

    /// [`Services::for_tests`] with an explicit time source.
    #[cfg(test)]
    pub(crate) fn for_tests_with_clock(clock: Clock) -> Self {
        use std::sync::OnceLock;

        static KEYS: OnceLock<Arc<StaticSigningKeys>> = OnceLock::new();
        let keys = KEYS
            .get_or_init(|| Arc::new(StaticSigningKeys::ephemeral().unwrap()))
            .clone();

        let config = SamlConfig {
            legacy_acs_url: Some("https://sp.example.com/acs".into()),
            ..SamlConfig::default()
        };
        let mut settings = CertificateSettings::from(&config.certificate);
        settings.key_bits = 2048;
        settings.warm_up = false;

        Self::build(
            Arc::new(DbPool::in_memory()),
            &config,
            settings,
            keys,
            clock,
        )
        .unwrap()
    }
}
