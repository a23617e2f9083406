//! OAuth-shaped surface kept for clients of the original SAML recipe.
//!
//! The access token it hands out is `<code>.<client_id>`; the code stays
//! readable until it is redeemed or swept. Codes never contain a dot.

use std::sync::Arc;

use subtle::ConstantTimeEq;

use super::{ClientRegistry, CodeExchangeBridge, RequestBuilder, UserInfo};
use crate::{
    db::DbPool,
    models::Tenant,
    saml::{SamlError, SamlResult},
};

#[derive(Clone)]
pub struct LegacyOAuthBridge {
    db: Arc<DbPool>,
    clients: ClientRegistry,
    requests: RequestBuilder,
    codes: CodeExchangeBridge,
    acs_url: Option<String>,
}

impl LegacyOAuthBridge {
    pub fn new(
        db: Arc<DbPool>,
        clients: ClientRegistry,
        requests: RequestBuilder,
        codes: CodeExchangeBridge,
        acs_url: Option<String>,
    ) -> Self {
        Self {
            db,
            clients,
            requests,
            codes,
            acs_url,
        }
    }

    /// SSO redirect for a login whose assertion is posted to the configured
    /// legacy ACS URL.
    pub async fn authorize(
        &self,
        tenant: &Tenant,
        client_id: &str,
        redirect_uri: &str,
        state: Option<String>,
    ) -> SamlResult<String> {
        let acs_url = self
            .acs_url
            .as_deref()
            .ok_or_else(|| SamlError::Internal("saml.legacy_acs_url is not configured".into()))?;
        self.requests
            .build_redirect_url(tenant, client_id, redirect_uri, state, acs_url)
            .await
    }

    /// Check the client credentials and the code, and return the legacy
    /// access token. The code is not consumed.
    #[tracing::instrument(name = "saml.legacy.token", skip_all, fields(tenant = %tenant, client_id = %client_id))]
    pub async fn issue_access_token(
        &self,
        tenant: &Tenant,
        client_id: &str,
        client_secret: &str,
        code: &str,
    ) -> SamlResult<String> {
        let client = self
            .clients
            .get(tenant, client_id)
            .await?
            .ok_or_else(|| SamlError::BadRequest("Invalid client_id".into()))?;

        let secret_matches = client
            .client_secret
            .as_deref()
            .is_some_and(|secret| bool::from(secret.as_bytes().ct_eq(client_secret.as_bytes())));
        if !secret_matches {
            return Err(SamlError::BadRequest("Invalid client_secret".into()));
        }

        let record = self
            .db
            .saml_claims()
            .get(tenant, code)
            .await?
            .ok_or(SamlError::InvalidCode)?;
        if record.client_id != client.client_id {
            return Err(SamlError::InvalidCode);
        }

        Ok(format!("{code}.{}", client.client_id))
    }

    /// Identity behind a `<code>.<client_id>` access token.
    #[tracing::instrument(name = "saml.legacy.userinfo", skip_all, fields(tenant = %tenant))]
    pub async fn user_info(&self, tenant: &Tenant, access_token: &str) -> SamlResult<UserInfo> {
        let (code, client_id) = access_token
            .split_once('.')
            .filter(|(code, client_id)| !code.is_empty() && !client_id.is_empty())
            .ok_or(SamlError::InvalidToken)?;

        let record = self
            .db
            .saml_claims()
            .get(tenant, code)
            .await?
            .filter(|record| record.client_id == client_id)
            .ok_or(SamlError::InvalidToken)?;

        Ok(self.codes.user_info_from_claims(&record.claims))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        models::{Claims, ClaimsRecord, SamlClientInput},
        services::{
            Services,
            test_support::{REDIRECT_URI, SP_ENTITY_ID, TestIdp},
        },
    };

    async fn setup(secret: Option<&str>) -> (Services, Tenant) {
        let services = Services::for_tests();
        let tenant = Tenant::default();
        let idp = TestIdp::new("https://idp.example.com");
        services
            .clients
            .create_or_update(
                &tenant,
                SamlClientInput {
                    client_id: Some("client-1".into()),
                    client_secret: secret.map(String::from),
                    sp_entity_id: SP_ENTITY_ID.into(),
                    default_redirect_uri: REDIRECT_URI.into(),
                    redirect_uris: vec![REDIRECT_URI.into()],
                    metadata_xml: Some(idp.metadata_xml()),
                    metadata_url: None,
                    allow_idp_initiated_login: false,
                    enable_request_signing: false,
                },
            )
            .await
            .unwrap();

        let mut claims = Claims::new();
        claims.insert("NameID".into(), vec!["user@example.com".into()]);
        services
            .db
            .saml_claims()
            .create(
                &tenant,
                ClaimsRecord {
                    code: "code-1".into(),
                    client_id: "client-1".into(),
                    claims,
                    created_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        (services, tenant)
    }

    #[tokio::test]
    async fn test_token_and_user_info() {
        let (services, tenant) = setup(Some("secret")).await;
        let token = services
            .legacy
            .issue_access_token(&tenant, "client-1", "secret", "code-1")
            .await
            .unwrap();
        assert_eq!(token, "code-1.client-1");

        // Reading the identity does not consume the code
        for _ in 0..2 {
            let info = services.legacy.user_info(&tenant, &token).await.unwrap();
            assert_eq!(info.id.as_deref(), Some("user@example.com"));
            assert_eq!(info.email.as_deref(), Some("user@example.com"));
        }
    }

    #[tokio::test]
    async fn test_token_rejects_bad_credentials() {
        let (services, tenant) = setup(Some("secret")).await;
        let legacy = &services.legacy;

        let err = legacy
            .issue_access_token(&tenant, "nope", "secret", "code-1")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Bad request: Invalid client_id");

        for secret in ["wrong-secret", "", "secretsecret"] {
            let err = legacy
                .issue_access_token(&tenant, "client-1", secret, "code-1")
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "Bad request: Invalid client_secret", "{secret}");
        }

        assert!(matches!(
            legacy.issue_access_token(&tenant, "client-1", "secret", "other").await,
            Err(SamlError::InvalidCode)
        ));
    }

    #[tokio::test]
    async fn test_client_without_secret_cannot_use_token_endpoint() {
        let (services, tenant) = setup(None).await;
        let err = services
            .legacy
            .issue_access_token(&tenant, "client-1", "", "code-1")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Bad request: Invalid client_secret");
    }

    #[tokio::test]
    async fn test_user_info_rejects_foreign_tokens() {
        let (services, tenant) = setup(Some("secret")).await;
        for token in ["invalid-token", "code-1.client-2", ".client-1", "code-1.", "missing.client-1"] {
            assert!(
                matches!(
                    services.legacy.user_info(&tenant, token).await,
                    Err(SamlError::InvalidToken)
                ),
                "{token}"
            );
        }
        assert!(matches!(
            services
                .legacy
                .user_info(&Tenant::new("public", "other"), "code-1.client-1")
                .await,
            Err(SamlError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_authorize_uses_legacy_acs_url() {
        let (services, tenant) = setup(None).await;
        let url = services
            .legacy
            .authorize(&tenant, "client-1", REDIRECT_URI, Some("s".into()))
            .await
            .unwrap();
        assert!(url.starts_with("https://idp.example.com/sso?SAMLRequest="));

        let unconfigured = LegacyOAuthBridge::new(
            services.db.clone(),
            services.clients.clone(),
            services.requests.clone(),
            services.codes.clone(),
            None,
        );
        assert!(matches!(
            unconfigured
                .authorize(&tenant, "client-1", REDIRECT_URI, None)
                .await,
            Err(SamlError::Internal(_))
        ));
    }
}
