use std::sync::Arc;

use samael::{
    schema::{AuthnContextClassRef, AuthnContextComparison, RequestedAuthnContext},
    service_provider::ServiceProviderBuilder,
};

use super::{CertificateManagers, ClientRegistry, RelayStateTracker};
use crate::{
    models::Tenant,
    saml::{SamlError, SamlResult, metadata::idp_entity_descriptor},
};

const PASSWORD_PROTECTED_TRANSPORT: &str =
    "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport";

/// Builds SP-initiated login redirects.
#[derive(Clone)]
pub struct RequestBuilder {
    clients: ClientRegistry,
    relay_states: RelayStateTracker,
    certificates: Arc<CertificateManagers>,
}

impl RequestBuilder {
    pub fn new(
        clients: ClientRegistry,
        relay_states: RelayStateTracker,
        certificates: Arc<CertificateManagers>,
    ) -> Self {
        Self {
            clients,
            relay_states,
            certificates,
        }
    }

    /// URL of the IdP SSO endpoint carrying a fresh `AuthnRequest` and
    /// relay state.
    ///
    /// `redirect_uri` must be one of the client's registered redirect URIs,
    /// compared byte for byte.
    #[tracing::instrument(
        name = "saml.build_redirect",
        skip_all,
        fields(tenant = %tenant, client_id = %client_id)
    )]
    pub async fn build_redirect_url(
        &self,
        tenant: &Tenant,
        client_id: &str,
        redirect_uri: &str,
        state: Option<String>,
        acs_url: &str,
    ) -> SamlResult<String> {
        let client = self
            .clients
            .get(tenant, client_id)
            .await?
            .ok_or_else(|| SamlError::InvalidClient(format!("Unknown client '{client_id}'")))?;

        if !client.allows_redirect_uri(redirect_uri) {
            return Err(SamlError::InvalidClient(
                "redirectURI is not registered for this client".into(),
            ));
        }

        let idp_metadata = idp_entity_descriptor(
            &client.idp_entity_id,
            &client.sso_login_url,
            &client.idp_signing_certificate,
        )
        .map_err(internal)?;
        let sp = ServiceProviderBuilder::default()
            .entity_id(client.sp_entity_id.clone())
            .acs_url(acs_url.to_string())
            .idp_metadata(idp_metadata)
            .build()
            .map_err(internal)?;

        let mut request = sp
            .make_authentication_request(&client.sso_login_url)
            .map_err(internal)?;
        request.requested_authn_context = Some(RequestedAuthnContext {
            authn_context_class_refs: Some(vec![AuthnContextClassRef {
                value: Some(PASSWORD_PROTECTED_TRANSPORT.to_string()),
            }]),
            authn_context_decl_refs: None,
            comparison: Some(AuthnContextComparison::Exact),
        });

        let request_id = request.id.clone();

        let relay_state = self
            .relay_states
            .create(tenant, &client.client_id, state, redirect_uri)
            .await?;

        let url = if client.enable_request_signing {
            let credentials = self
                .certificates
                .for_app(&tenant.app_id)
                .get_credentials()
                .await?;
            request
                .signed_redirect(&relay_state, credentials.private_key)
                .map_err(internal)?
        } else {
            request.redirect(&relay_state).map_err(internal)?
        }
        .ok_or_else(|| SamlError::Internal("AuthnRequest has no destination".into()))?;

        tracing::debug!(
            client_id = %client.client_id,
            request_id = %request_id,
            signed = client.enable_request_signing,
            "Built SAML redirect"
        );
        Ok(url.into())
    }
}

fn internal(e: impl std::fmt::Display) -> SamlError {
    SamlError::Internal(e.to_string())
}
