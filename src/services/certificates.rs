//! SP signing key and self-signed certificate lifecycle.
//!
//! One [`CertificateManager`] per application. The key pair and certificate
//! are persisted as two key-value blobs and regenerated when missing or
//! expired. Regeneration runs inside a [`KeyValueRepo::transact`] that
//! re-checks the stored values, so processes sharing a database converge on
//! the same certificate.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{
    config::CertificateConfig,
    db::{DbError, DbResult, KeyValueRepo},
    saml::{
        SamlError, SamlResult,
        credentials::{
            CertificateProfile, SpCredentials, decode_certificate, decode_key_pair,
            encode_certificate, encode_key_pair, generate_key, is_expired,
            self_signed_certificate,
        },
    },
};

pub const KEY_PAIR_KEY: &str = "saml_key_pair";
pub const CERTIFICATE_KEY: &str = "saml_certificate";

/// Source of the current time; replaced in tests to move past expiry.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// How new SP credentials are generated.
#[derive(Debug, Clone)]
pub struct CertificateSettings {
    pub profile: CertificateProfile,
    pub key_bits: u32,
    pub warm_up: bool,
}

impl From<&CertificateConfig> for CertificateSettings {
    fn from(config: &CertificateConfig) -> Self {
        Self {
            profile: CertificateProfile {
                organization: config.organization.clone(),
                country: config.country.clone(),
                validity_days: config.validity_days,
                ..CertificateProfile::default()
            },
            key_bits: config.key_bits,
            warm_up: config.warm_up,
        }
    }
}

/// SP credentials of one application.
pub struct CertificateManager {
    app_id: String,
    store: Arc<dyn KeyValueRepo>,
    settings: CertificateSettings,
    clock: Clock,
    cached: Mutex<Option<SpCredentials>>,
}

impl CertificateManager {
    pub fn new(
        app_id: impl Into<String>,
        store: Arc<dyn KeyValueRepo>,
        settings: CertificateSettings,
        clock: Clock,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            store,
            settings,
            clock,
            cached: Mutex::new(None),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The current certificate, regenerated first if missing or expired.
    pub async fn get_certificate(&self) -> SamlResult<openssl::x509::X509> {
        Ok(self.get_credentials().await?.certificate)
    }

    /// The current key and certificate.
    ///
    /// Served from memory while the cached certificate is valid; otherwise
    /// loads or regenerates through the store. Concurrent callers wait for a
    /// single regeneration.
    pub async fn get_credentials(&self) -> SamlResult<SpCredentials> {
        let mut cached = self.cached.lock().await;
        let now = (self.clock)();

        if let Some(credentials) = cached.as_ref()
            && !is_expired(&credentials.certificate, now).map_err(internal)?
        {
            return Ok(credentials.clone());
        }

        let credentials = self.load_or_regenerate(now).await?;
        *cached = Some(credentials.clone());
        Ok(credentials)
    }

    async fn load_or_regenerate(&self, now: DateTime<Utc>) -> SamlResult<SpCredentials> {
        let settings = self.settings.clone();
        let app_id = self.app_id.clone();

        let values = self
            .store
            .transact(
                &self.app_id,
                &[KEY_PAIR_KEY, CERTIFICATE_KEY],
                Box::new(move |current: &HashMap<String, String>| {
                    regenerate_if_needed(&app_id, current, &settings, now)
                }),
            )
            .await?;

        let (Some(key_pair), Some(certificate)) =
            (values.get(KEY_PAIR_KEY), values.get(CERTIFICATE_KEY))
        else {
            return Err(SamlError::Internal(
                "SP credentials missing after regeneration".into(),
            ));
        };

        Ok(SpCredentials {
            private_key: decode_key_pair(key_pair).map_err(internal)?,
            certificate: decode_certificate(certificate).map_err(internal)?,
        })
    }

    /// Load the credentials in the background so the first request does not
    /// pay for key generation. Failures are logged only.
    pub fn spawn_warm_up(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(app_id = %self.app_id, "No runtime; skipping certificate warm-up");
            return;
        };
        let manager = Arc::clone(self);
        handle.spawn(async move {
            match manager.get_certificate().await {
                Ok(_) => tracing::debug!(app_id = %manager.app_id, "SP certificate ready"),
                Err(e) => tracing::warn!(
                    app_id = %manager.app_id,
                    error = %e,
                    "SP certificate warm-up failed"
                ),
            }
        });
    }
}

/// Transaction body: keep the stored pair when it decodes and is unexpired,
/// otherwise write a fresh one.
fn regenerate_if_needed(
    app_id: &str,
    current: &HashMap<String, String>,
    settings: &CertificateSettings,
    now: DateTime<Utc>,
) -> DbResult<HashMap<String, String>> {
    if let (Some(key_pair), Some(certificate)) =
        (current.get(KEY_PAIR_KEY), current.get(CERTIFICATE_KEY))
    {
        match (decode_key_pair(key_pair), decode_certificate(certificate)) {
            (Ok(_), Ok(cert)) => match is_expired(&cert, now) {
                Ok(false) => return Ok(HashMap::new()),
                Ok(true) => {
                    tracing::info!(app_id = %app_id, "Stored SP certificate expired; regenerating")
                }
                Err(e) => return Err(DbError::Internal(e.to_string())),
            },
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(app_id = %app_id, error = %e, "Stored SP credentials unreadable; regenerating")
            }
        }
    } else {
        tracing::info!(app_id = %app_id, "Generating SP key pair and certificate");
    }

    let key = generate_key(settings.key_bits).map_err(|e| DbError::Internal(e.to_string()))?;
    let certificate = self_signed_certificate(&key, &settings.profile, now)
        .map_err(|e| DbError::Internal(e.to_string()))?;

    let mut writes = HashMap::new();
    writes.insert(
        KEY_PAIR_KEY.to_string(),
        encode_key_pair(&key).map_err(|e| DbError::Internal(e.to_string()))?,
    );
    writes.insert(
        CERTIFICATE_KEY.to_string(),
        encode_certificate(&certificate).map_err(|e| DbError::Internal(e.to_string()))?,
    );
    Ok(writes)
}

fn internal(e: impl std::fmt::Display) -> SamlError {
    SamlError::Internal(e.to_string())
}

/// Per-application [`CertificateManager`]s, created on first use.
pub struct CertificateManagers {
    managers: DashMap<String, Arc<CertificateManager>>,
    store: Arc<dyn KeyValueRepo>,
    settings: CertificateSettings,
    clock: Clock,
}

impl CertificateManagers {
    pub fn new(store: Arc<dyn KeyValueRepo>, settings: CertificateSettings) -> Self {
        Self::with_clock(store, settings, system_clock())
    }

    pub fn with_clock(
        store: Arc<dyn KeyValueRepo>,
        settings: CertificateSettings,
        clock: Clock,
    ) -> Self {
        Self {
            managers: DashMap::new(),
            store,
            settings,
            clock,
        }
    }

    /// The manager for `app_id`. A new manager starts its warm-up when
    /// enabled.
    pub fn for_app(&self, app_id: &str) -> Arc<CertificateManager> {
        if let Some(existing) = self.managers.get(app_id) {
            return Arc::clone(existing.value());
        }

        let mut created = false;
        let manager = self
            .managers
            .entry(app_id.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(CertificateManager::new(
                    app_id,
                    Arc::clone(&self.store),
                    self.settings.clone(),
                    Arc::clone(&self.clock),
                ))
            })
            .value()
            .clone();

        if created && self.settings.warm_up {
            manager.spawn_warm_up();
        }
        manager
    }
}
