//! RS256 keys for tokens minted by the code exchange.

use std::path::PathBuf;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use openssl::{
    hash::{MessageDigest, hash},
    pkey::{PKey, Private},
    rsa::Rsa,
};
use serde_json::Value;

use crate::config::{SigningConfig, SigningKeyConfig};

#[derive(Debug, thiserror::Error)]
pub enum SigningKeyError {
    #[error("Failed to read signing key {1}: {0}")]
    Io(std::io::Error, PathBuf),

    #[error("Signing key is not an RSA private key")]
    NotRsa,

    #[error("No signing keys available")]
    NoKeys,

    #[error("Crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    #[error("Token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// A public key tokens may be verified with.
#[derive(Clone)]
pub struct VerificationKey {
    pub kid: String,
    pub key: DecodingKey,
}

/// Source of an application's token signing key and the keys its tokens may
/// still be verified with.
#[async_trait]
pub trait SigningKeyProvider: Send + Sync {
    /// Sign `payload` as an RS256 JWT with the current key.
    async fn sign(&self, app_id: &str, payload: &Value) -> Result<String, SigningKeyError>;

    /// Every key a valid token may be signed with, current key first.
    async fn verification_keys(&self, app_id: &str)
    -> Result<Vec<VerificationKey>, SigningKeyError>;
}

struct SigningKey {
    kid: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

/// Keys loaded once at startup and shared by every application.
///
/// The first key signs; the rest stay valid for verification so tokens
/// survive a rotation.
pub struct StaticSigningKeys {
    keys: Vec<SigningKey>,
}

impl StaticSigningKeys {
    /// Load the configured keys, or generate an ephemeral one when none are
    /// configured.
    pub fn from_config(config: &SigningConfig) -> Result<Self, SigningKeyError> {
        if config.keys.is_empty() {
            tracing::warn!(
                "No token signing keys configured; generating an ephemeral key. \
                 Tokens will not verify after a restart or on other instances."
            );
            return Self::ephemeral();
        }

        let keys = config
            .keys
            .iter()
            .map(load_key)
            .collect::<Result<Vec<_>, _>>()?;
        let keys = Self { keys };
        tracing::info!(
            count = keys.keys.len(),
            current_kid = keys.current_kid().unwrap_or_default(),
            "Loaded token signing keys"
        );
        Ok(keys)
    }

    /// A single freshly generated RSA-2048 key.
    pub fn ephemeral() -> Result<Self, SigningKeyError> {
        let key = PKey::from_rsa(Rsa::generate(2048)?)?;
        Ok(Self {
            keys: vec![signing_key(None, &key)?],
        })
    }

    /// Build from PEM strings, first one current.
    pub fn from_pems<'a>(pems: impl IntoIterator<Item = &'a str>) -> Result<Self, SigningKeyError> {
        let keys = pems
            .into_iter()
            .map(|pem| signing_key(None, &parse_pem(pem)?))
            .collect::<Result<Vec<_>, _>>()?;
        if keys.is_empty() {
            return Err(SigningKeyError::NoKeys);
        }
        Ok(Self { keys })
    }

    pub fn current_kid(&self) -> Option<&str> {
        self.keys.first().map(|k| k.kid.as_str())
    }
}

#[async_trait]
impl SigningKeyProvider for StaticSigningKeys {
    async fn sign(&self, _app_id: &str, payload: &Value) -> Result<String, SigningKeyError> {
        let key = self.keys.first().ok_or(SigningKeyError::NoKeys)?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.kid.clone());
        Ok(jsonwebtoken::encode(&header, payload, &key.encoding)?)
    }

    async fn verification_keys(
        &self,
        _app_id: &str,
    ) -> Result<Vec<VerificationKey>, SigningKeyError> {
        Ok(self
            .keys
            .iter()
            .map(|k| VerificationKey {
                kid: k.kid.clone(),
                key: k.decoding.clone(),
            })
            .collect())
    }
}

fn load_key(config: &SigningKeyConfig) -> Result<SigningKey, SigningKeyError> {
    let pem = match (&config.pem, &config.path) {
        (Some(pem), _) => pem.clone(),
        (None, Some(path)) => {
            std::fs::read_to_string(path).map_err(|e| SigningKeyError::Io(e, path.clone()))?
        }
        (None, None) => return Err(SigningKeyError::NoKeys),
    };
    signing_key(config.kid.clone(), &parse_pem(&pem)?)
}

/// Accepts PKCS#1 and PKCS#8 PEM.
fn parse_pem(pem: &str) -> Result<PKey<Private>, SigningKeyError> {
    let key = PKey::private_key_from_pem(pem.trim().as_bytes())?;
    if key.rsa().is_err() {
        return Err(SigningKeyError::NotRsa);
    }
    Ok(key)
}

fn signing_key(kid: Option<String>, key: &PKey<Private>) -> Result<SigningKey, SigningKeyError> {
    let public_der = key.public_key_to_der()?;
    let kid = match kid {
        Some(kid) => kid,
        None => derive_kid(&public_der)?,
    };
    Ok(SigningKey {
        kid,
        encoding: EncodingKey::from_rsa_pem(&key.private_key_to_pem_pkcs8()?)?,
        decoding: DecodingKey::from_rsa_pem(&key.public_key_to_pem()?)?,
    })
}

/// First 8 bytes of the SHA-256 of the public key, hex encoded.
fn derive_kid(public_der: &[u8]) -> Result<String, SigningKeyError> {
    let digest = hash(MessageDigest::sha256(), public_der)?;
    Ok(format!("s-{}", hex::encode(&digest[..8])))
}
