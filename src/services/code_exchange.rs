use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use super::{
    claims::{NAME_ID_CLAIM, first_value},
    signing_keys::SigningKeyProvider,
};
use crate::{
    config::ClaimMappingConfig,
    db::DbPool,
    models::{Claims, Tenant},
    saml::{SamlError, SamlResult},
};

/// `stt` value of tokens minted from SAML claims.
pub const SAML_ID_TOKEN_TYPE: u8 = 3;

/// Payload of a token minted by [`CodeExchangeBridge::exchange_code_for_token`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamlTokenPayload {
    pub stt: u8,
    pub claims: Claims,
    pub sub: Option<String>,
    pub email: Option<String>,
    /// The client the code was issued to.
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Response of [`CodeExchangeBridge::get_user_info`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserInfo {
    pub id: Option<String>,
    pub email: Option<String>,
}

/// Redeems one-time codes for signed tokens and reads them back.
#[derive(Clone)]
pub struct CodeExchangeBridge {
    db: Arc<DbPool>,
    keys: Arc<dyn SigningKeyProvider>,
    claim_mapping: ClaimMappingConfig,
    token_ttl: Duration,
}

impl CodeExchangeBridge {
    pub fn new(
        db: Arc<DbPool>,
        keys: Arc<dyn SigningKeyProvider>,
        claim_mapping: ClaimMappingConfig,
        token_ttl: Duration,
    ) -> Self {
        Self {
            db,
            keys,
            claim_mapping,
            token_ttl,
        }
    }

    /// Consume `code` and mint an RS256 token over its claims.
    #[tracing::instrument(name = "saml.exchange_code", skip_all, fields(tenant = %tenant))]
    pub async fn exchange_code_for_token(&self, tenant: &Tenant, code: &str) -> SamlResult<String> {
        let record = self
            .db
            .saml_claims()
            .take(tenant, code)
            .await?
            .ok_or(SamlError::InvalidCode)?;

        let iat = Utc::now().timestamp();
        let payload = SamlTokenPayload {
            stt: SAML_ID_TOKEN_TYPE,
            sub: self.subject(&record.claims),
            email: self.email(&record.claims),
            claims: record.claims,
            aud: record.client_id,
            iat,
            exp: iat + self.token_ttl.num_seconds(),
        };
        let payload = serde_json::to_value(&payload)
            .map_err(|e| SamlError::Internal(format!("failed to encode token payload: {e}")))?;

        let token = self
            .keys
            .sign(&tenant.app_id, &payload)
            .await
            .map_err(|e| SamlError::Internal(format!("failed to sign token: {e}")))?;
        tracing::debug!(client_id = %payload["aud"], "Exchanged SAML code for token");
        Ok(token)
    }

    /// Verify `token` against every key of the application and return the
    /// identity it carries.
    #[tracing::instrument(name = "saml.user_info", skip_all, fields(tenant = %tenant))]
    pub async fn get_user_info(&self, tenant: &Tenant, token: &str) -> SamlResult<UserInfo> {
        let keys = self
            .keys
            .verification_keys(&tenant.app_id)
            .await
            .map_err(|e| SamlError::Internal(format!("failed to load verification keys: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        validation.leeway = 0;

        for key in &keys {
            match jsonwebtoken::decode::<SamlTokenPayload>(token, &key.key, &validation) {
                Ok(data) => {
                    if data.claims.stt != SAML_ID_TOKEN_TYPE {
                        tracing::debug!(stt = data.claims.stt, "Token is not a SAML token");
                        return Err(SamlError::InvalidToken);
                    }
                    return Ok(UserInfo {
                        id: data.claims.sub,
                        email: data.claims.email,
                    });
                }
                Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                    tracing::debug!(kid = %key.kid, "Token expired");
                    return Err(SamlError::InvalidToken);
                }
                Err(e) => tracing::trace!(kid = %key.kid, error = %e, "Token did not verify"),
            }
        }
        Err(SamlError::InvalidToken)
    }

    /// `id` and `email` as derived for a token over `claims`.
    pub(crate) fn user_info_from_claims(&self, claims: &Claims) -> UserInfo {
        UserInfo {
            id: self.subject(claims),
            email: self.email(claims),
        }
    }

    fn subject(&self, claims: &Claims) -> Option<String> {
        self.claim_mapping
            .subject
            .iter()
            .find_map(|name| first_value(claims, name))
            .or_else(|| first_value(claims, NAME_ID_CLAIM))
            .map(String::from)
    }

    fn email(&self, claims: &Claims) -> Option<String> {
        first_value(claims, &self.claim_mapping.email)
            .or_else(|| first_value(claims, NAME_ID_CLAIM).filter(|v| v.contains('@')))
            .map(String::from)
    }
}
