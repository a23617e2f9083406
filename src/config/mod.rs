//! Configuration module for the SAML bridge.
//!
//! The bridge is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8080
//!
//! [database]
//! type = "sqlite"
//! path = "/var/lib/saml-bridge/bridge.db"
//!
//! [saml.certificate]
//! organization = "Acme"
//! country = "DE"
//!
//! [[signing.keys]]
//! pem = "${TOKEN_SIGNING_KEY}"
//! ```

mod database;
mod observability;
mod saml;
mod server;

use std::path::Path;

pub use database::*;
pub use observability::*;
pub use saml::*;
use serde::{Deserialize, Serialize};
pub use server::*;

/// Root configuration.
///
/// All sections are optional with sensible defaults; an empty file runs an
/// in-memory bridge on port 8080.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration for persistent storage.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Observability configuration (logging).
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// SAML protocol settings.
    #[serde(default)]
    pub saml: SamlConfig,

    /// Token signing keys.
    #[serde(default)]
    pub signing: SigningConfig,
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: BridgeConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.saml.validate()?;
        self.signing.validate()?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand `${VAR}` references, skipping anything after a `#` on the line.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };

            // Skip if this variable is inside a comment
            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = name.as_str();
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    #[test]
    fn test_empty_config() {
        let config = BridgeConfig::from_str("").unwrap();
        assert!(config.database.is_none());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.saml.clock_skew_secs, 300);
        assert_eq!(config.saml.token_ttl_secs, 3600);
        assert_eq!(config.saml.certificate.key_bits, 4096);
        assert!(config.signing.keys.is_empty());
        assert!(config.saml.legacy_acs_url.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = BridgeConfig::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 3567

            [observability.logging]
            level = "debug"
            format = "json"

            [saml]
            clock_skew_secs = 120
            legacy_acs_url = "https://auth.example.com/recipe/saml/legacy/callback"

            [saml.certificate]
            organization = "Acme"
            country = "DE"
            key_bits = 2048

            [saml.claims]
            subject = ["uid"]
            email = "mail"

            [saml.metadata_fetch]
            allow_loopback = true

            [[signing.keys]]
            kid = "k1"
            path = "/etc/keys/k1.pem"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 3567);
        assert_eq!(config.observability.logging.format, LogFormat::Json);
        assert_eq!(config.saml.clock_skew_secs, 120);
        assert_eq!(
            config.saml.legacy_acs_url.as_deref(),
            Some("https://auth.example.com/recipe/saml/legacy/callback")
        );
        assert_eq!(config.saml.certificate.organization, "Acme");
        assert_eq!(config.saml.claims.subject, vec!["uid".to_string()]);
        assert!(config.saml.metadata_fetch.allow_loopback);
        assert_eq!(config.signing.keys[0].kid.as_deref(), Some("k1"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = BridgeConfig::from_str(
            r#"
            [saml]
            clock_skew = 10
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validation_errors() {
        let bad_country = BridgeConfig::from_str(
            r#"
            [saml.certificate]
            country = "Germany"
            "#,
        );
        assert!(matches!(bad_country, Err(ConfigError::Validation(_))));

        let both_key_sources = BridgeConfig::from_str(
            r#"
            [[signing.keys]]
            pem = "x"
            path = "/y"
            "#,
        );
        assert!(matches!(both_key_sources, Err(ConfigError::Validation(_))));

        let bad_acs_url = BridgeConfig::from_str(
            r#"
            [saml]
            legacy_acs_url = "not a url"
            "#,
        );
        assert!(matches!(bad_acs_url, Err(ConfigError::Validation(_))));
    }

    #[test]
    #[serial]
    fn test_env_var_expansion() {
        temp_env::with_var("SAML_TEST_ORG", Some("Env Org"), || {
            let config = BridgeConfig::from_str(
                r#"
                [saml.certificate]
                organization = "${SAML_TEST_ORG}" # ${NOT_EXPANDED}
                "#,
            )
            .unwrap();
            assert_eq!(config.saml.certificate.organization, "Env Org");
        });
    }

    #[test]
    #[serial]
    fn test_missing_env_var() {
        temp_env::with_var("SAML_TEST_MISSING", None::<&str>, || {
            let result = BridgeConfig::from_str(r#"[saml.certificate]
organization = "${SAML_TEST_MISSING}""#);
            assert!(
                matches!(result, Err(ConfigError::EnvVarNotFound(name)) if name == "SAML_TEST_MISSING")
            );
        });
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 9999").unwrap();
        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9999);

        let missing = BridgeConfig::from_file("/nonexistent/saml-bridge.toml");
        assert!(matches!(missing, Err(ConfigError::Io(_, _))));
    }
}
