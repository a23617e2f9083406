//! SP key pair and self-signed certificate.
//!
//! Stored in the key-value store as base64 text:
//! - key pair: `<pkcs8 private DER>\n<SPKI public DER>`
//! - certificate: X.509 DER

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration, Utc};
use openssl::{
    asn1::Asn1Time,
    bn::{BigNum, MsbOption},
    hash::MessageDigest,
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::{
        X509, X509NameBuilder, X509Ref,
        extension::{BasicConstraints, KeyUsage},
    },
};

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Malformed stored key pair")]
    MalformedKeyPair,

    #[error("Stored public key does not match the private key")]
    KeyMismatch,
}

/// The SP's signing identity.
#[derive(Clone)]
pub struct SpCredentials {
    pub private_key: PKey<Private>,
    pub certificate: X509,
}

impl std::fmt::Debug for SpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpCredentials")
            .field("private_key", &"<redacted>")
            .field("certificate", &self.certificate.subject_name())
            .finish()
    }
}

/// Subject and validity of a generated certificate.
#[derive(Debug, Clone)]
pub struct CertificateProfile {
    pub common_name: String,
    pub organization: String,
    pub country: String,
    pub validity_days: i64,
}

impl Default for CertificateProfile {
    fn default() -> Self {
        Self {
            common_name: "SAML-SP".to_string(),
            organization: "SAML Bridge".to_string(),
            country: "US".to_string(),
            validity_days: 3650,
        }
    }
}

pub fn generate_key(bits: u32) -> Result<PKey<Private>, CredentialError> {
    Ok(PKey::from_rsa(Rsa::generate(bits)?)?)
}

/// Self-sign a certificate for `key`, valid from `now` for the profile's
/// validity period.
pub fn self_signed_certificate(
    key: &PKey<Private>,
    profile: &CertificateProfile,
    now: DateTime<Utc>,
) -> Result<X509, CredentialError> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", &profile.common_name)?;
    name.append_entry_by_text("O", &profile.organization)?;
    name.append_entry_by_text("C", &profile.country)?;
    let name = name.build();

    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;

    let serial = serial.to_asn1_integer()?;
    let not_before = Asn1Time::from_unix(now.timestamp())?;
    let not_after = now + Duration::days(profile.validity_days);
    let not_after = Asn1Time::from_unix(not_after.timestamp())?;

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(key)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()?,
    )?;
    builder.append_extension(BasicConstraints::new().critical().build()?)?;
    builder.sign(key, MessageDigest::sha256())?;

    Ok(builder.build())
}

/// True once `now` is past the certificate's notAfter.
pub fn is_expired(certificate: &X509Ref, now: DateTime<Utc>) -> Result<bool, CredentialError> {
    let now = Asn1Time::from_unix(now.timestamp())?;
    Ok(certificate.not_after().compare(&now)? == std::cmp::Ordering::Less)
}

pub fn encode_key_pair(key: &PKey<Private>) -> Result<String, CredentialError> {
    let private = STANDARD.encode(key.private_key_to_pkcs8()?);
    let public = STANDARD.encode(key.public_key_to_der()?);
    Ok(format!("{private}\n{public}"))
}

pub fn decode_key_pair(encoded: &str) -> Result<PKey<Private>, CredentialError> {
    let (private, public) = encoded
        .split_once('\n')
        .ok_or(CredentialError::MalformedKeyPair)?;
    let key = PKey::private_key_from_pkcs8(&STANDARD.decode(private.trim())?)?;
    let public = PKey::public_key_from_der(&STANDARD.decode(public.trim())?)?;
    if !key.public_eq(&public) {
        return Err(CredentialError::KeyMismatch);
    }
    Ok(key)
}

pub fn encode_certificate(certificate: &X509Ref) -> Result<String, CredentialError> {
    Ok(STANDARD.encode(certificate.to_der()?))
}

pub fn decode_certificate(encoded: &str) -> Result<X509, CredentialError> {
    Ok(X509::from_der(&STANDARD.decode(encoded.trim())?)?)
}
