use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::validators::{validate_redirect_uri, validate_redirect_uris};

pub const DEFAULT_APP_ID: &str = "public";
pub const DEFAULT_TENANT_ID: &str = "public";

/// Scope of SAML clients and their in-flight state.
///
/// The SP key/certificate is shared by every tenant of an app.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tenant {
    pub app_id: String,
    pub tenant_id: String,
}

impl Tenant {
    pub fn new(app_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            tenant_id: tenant_id.into(),
        }
    }
}

impl Default for Tenant {
    fn default() -> Self {
        Self::new(DEFAULT_APP_ID, DEFAULT_TENANT_ID)
    }
}

impl std::fmt::Display for Tenant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app_id, self.tenant_id)
    }
}

/// A registered SP client and the IdP it trusts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamlClient {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(rename = "ssoLoginURL")]
    pub sso_login_url: String,
    #[serde(rename = "redirectURIs")]
    pub redirect_uris: Vec<String>,
    #[serde(rename = "defaultRedirectURI")]
    pub default_redirect_uri: String,
    #[serde(rename = "metadataURL", skip_serializing_if = "Option::is_none")]
    pub metadata_url: Option<String>,
    pub sp_entity_id: String,
    pub idp_entity_id: String,
    /// Base64 DER, no whitespace
    pub idp_signing_certificate: String,
    #[serde(rename = "allowIDPInitiatedLogin")]
    pub allow_idp_initiated_login: bool,
    pub enable_request_signing: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl SamlClient {
    pub fn allows_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|allowed| allowed == uri)
    }
}

/// Client registration input, after the metadata has been resolved to XML.
#[derive(Debug, Clone)]
pub struct SamlClientInput {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub sp_entity_id: String,
    pub default_redirect_uri: String,
    pub redirect_uris: Vec<String>,
    pub metadata_xml: Option<String>,
    pub metadata_url: Option<String>,
    pub allow_idp_initiated_login: bool,
    pub enable_request_signing: bool,
}

/// Request to create or update a SAML client.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateSamlClient {
    #[validate(length(min = 1, max = 128))]
    pub client_id: Option<String>,

    #[validate(length(min = 1, max = 1024))]
    pub client_secret: Option<String>,

    #[validate(length(min = 1, max = 1024))]
    pub sp_entity_id: String,

    #[serde(rename = "defaultRedirectURI")]
    #[validate(custom(function = "validate_redirect_uri"))]
    pub default_redirect_uri: String,

    #[serde(rename = "redirectURIs")]
    #[validate(custom(function = "validate_redirect_uris"))]
    pub redirect_uris: Vec<String>,

    /// IdP metadata XML, base64 encoded
    #[serde(rename = "metadataXML")]
    pub metadata_xml: Option<String>,

    #[serde(rename = "metadataURL")]
    #[validate(url, length(max = 2048))]
    pub metadata_url: Option<String>,

    #[serde(default, rename = "allowIDPInitiatedLogin")]
    pub allow_idp_initiated_login: bool,

    #[serde(default)]
    pub enable_request_signing: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdParams {
    #[validate(length(min = 1, max = 128))]
    pub client_id: String,
}

/// Request for an SP-initiated login redirect.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateLoginRedirect {
    #[validate(length(min = 1, max = 128))]
    pub client_id: String,

    #[serde(rename = "redirectURI")]
    #[validate(length(min = 1, max = 2048))]
    pub redirect_uri: String,

    #[validate(length(max = 4096))]
    pub state: Option<String>,

    #[serde(rename = "acsURL")]
    #[validate(url, length(max = 2048))]
    pub acs_url: String,
}

/// IdP POST to the assertion consumer service.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SamlCallback {
    #[serde(rename = "samlResponse", alias = "SAMLResponse")]
    #[validate(length(min = 1))]
    pub saml_response: String,

    #[serde(default, rename = "relayState", alias = "RelayState")]
    pub relay_state: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ExchangeCode {
    #[validate(length(min = 1, max = 256))]
    pub code: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserInfoRequest {
    #[validate(length(min = 1))]
    pub access_token: String,
}

/// Query of the legacy authorize route. Presence is checked by the handler.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyAuthorizeParams {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
}

/// Form the IdP posts to the legacy ACS.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyCallbackForm {
    #[serde(rename = "SAMLResponse")]
    pub saml_response: Option<String>,

    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyTokenForm {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code: Option<String>,
}
