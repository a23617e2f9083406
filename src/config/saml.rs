use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// SAML protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamlConfig {
    /// SP certificate generation settings.
    #[serde(default)]
    pub certificate: CertificateConfig,

    /// Allowed difference between the response IssueInstant and local time.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: u64,

    /// Lifetime of tokens minted by the code exchange.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// Relay states older than this are swept.
    #[serde(default = "default_relay_state_ttl")]
    pub relay_state_ttl_secs: u64,

    /// Unredeemed codes older than this are swept.
    #[serde(default = "default_code_ttl")]
    pub code_ttl_secs: u64,

    /// How often the sweeper runs. 0 disables it.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Claim names used to derive `sub` and `email`.
    #[serde(default)]
    pub claims: ClaimMappingConfig,

    /// IdP metadata fetching.
    #[serde(default)]
    pub metadata_fetch: MetadataFetchConfig,

    /// ACS URL put into requests started from the legacy authorize route.
    #[serde(default)]
    pub legacy_acs_url: Option<String>,
}

impl Default for SamlConfig {
    fn default() -> Self {
        Self {
            certificate: CertificateConfig::default(),
            clock_skew_secs: default_clock_skew(),
            token_ttl_secs: default_token_ttl(),
            relay_state_ttl_secs: default_relay_state_ttl(),
            code_ttl_secs: default_code_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            claims: ClaimMappingConfig::default(),
            metadata_fetch: MetadataFetchConfig::default(),
            legacy_acs_url: None,
        }
    }
}

impl SamlConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.certificate.validate()?;
        if self.token_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "saml.token_ttl_secs must be greater than 0".into(),
            ));
        }
        if let Some(acs_url) = &self.legacy_acs_url
            && url::Url::parse(acs_url).is_err()
        {
            return Err(ConfigError::Validation(format!(
                "saml.legacy_acs_url is not a valid URL: {acs_url}"
            )));
        }
        if self.claims.subject.is_empty() {
            return Err(ConfigError::Validation(
                "saml.claims.subject must list at least one claim".into(),
            ));
        }
        Ok(())
    }
}

fn default_clock_skew() -> u64 {
    300
}

fn default_token_ttl() -> u64 {
    3600
}

fn default_relay_state_ttl() -> u64 {
    600
}

fn default_code_ttl() -> u64 {
    600
}

fn default_sweep_interval() -> u64 {
    60
}

/// Subject and key settings of the self-signed SP certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateConfig {
    #[serde(default = "default_organization")]
    pub organization: String,

    /// Two-letter ISO country code.
    #[serde(default = "default_country")]
    pub country: String,

    #[serde(default = "default_key_bits")]
    pub key_bits: u32,

    #[serde(default = "default_validity_days")]
    pub validity_days: i64,

    /// Generate the certificate in the background at startup.
    #[serde(default = "default_true")]
    pub warm_up: bool,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            organization: default_organization(),
            country: default_country(),
            key_bits: default_key_bits(),
            validity_days: default_validity_days(),
            warm_up: true,
        }
    }
}

impl CertificateConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.country.len() != 2 || !self.country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Validation(format!(
                "saml.certificate.country must be a two-letter code, got '{}'",
                self.country
            )));
        }
        if self.organization.trim().is_empty() {
            return Err(ConfigError::Validation(
                "saml.certificate.organization cannot be empty".into(),
            ));
        }
        if self.key_bits < 2048 {
            return Err(ConfigError::Validation(
                "saml.certificate.key_bits must be at least 2048".into(),
            ));
        }
        if self.validity_days <= 0 {
            return Err(ConfigError::Validation(
                "saml.certificate.validity_days must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn default_organization() -> String {
    "SAML Bridge".to_string()
}

fn default_country() -> String {
    "US".to_string()
}

fn default_key_bits() -> u32 {
    4096
}

fn default_validity_days() -> i64 {
    3650
}

fn default_true() -> bool {
    true
}

/// Claim names consulted when minting tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaimMappingConfig {
    /// Claims tried in order for `sub`; `NameID` is the final fallback.
    #[serde(default = "default_subject_claims")]
    pub subject: Vec<String>,

    /// Claim holding the email address; `NameID` is used when it looks like one.
    #[serde(default = "default_email_claim")]
    pub email: String,
}

impl Default for ClaimMappingConfig {
    fn default() -> Self {
        Self {
            subject: default_subject_claims(),
            email: default_email_claim(),
        }
    }
}

fn default_subject_claims() -> Vec<String> {
    vec![
        "http://schemas.microsoft.com/identity/claims/objectidentifier".to_string(),
        "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name".to_string(),
    ]
}

fn default_email_claim() -> String {
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress".to_string()
}

/// Outbound fetches of IdP metadata URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataFetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Allow plain `http://` metadata URLs.
    #[serde(default)]
    pub allow_http: bool,

    /// Allow loopback targets (127.0.0.1, ::1, localhost). Development only.
    #[serde(default)]
    pub allow_loopback: bool,

    /// Allow private network targets (10/8, 172.16/12, 192.168/16, ...).
    #[serde(default)]
    pub allow_private: bool,

    /// Maximum metadata document size in bytes.
    #[serde(default = "default_max_metadata_bytes")]
    pub max_bytes: usize,
}

impl Default for MetadataFetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            allow_http: false,
            allow_loopback: false,
            allow_private: false,
            max_bytes: default_max_metadata_bytes(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_max_metadata_bytes() -> usize {
    1024 * 1024
}

/// Keys used to sign tokens minted by the code exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigningConfig {
    /// RSA keys; the first signs new tokens, all verify. When empty an
    /// ephemeral key is generated at startup.
    #[serde(default)]
    pub keys: Vec<SigningKeyConfig>,
}

impl SigningConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, key) in self.keys.iter().enumerate() {
            match (&key.pem, &key.path) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "signing.keys[{}] must set exactly one of 'pem' or 'path'",
                        i
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigningKeyConfig {
    /// Key id placed in the token header. Derived from the public key when omitted.
    #[serde(default)]
    pub kid: Option<String>,

    /// PKCS#1 or PKCS#8 PEM, usually `${ENV_VAR}`.
    #[serde(default)]
    pub pem: Option<String>,

    /// Path to a PEM file.
    #[serde(default)]
    pub path: Option<PathBuf>,
}
