//! HTTP surface of the SAML services.
//!
//! Every handler is scoped to the tenant named by the optional `X-App-Id`
//! and `X-Tenant-Id` headers. Successful bodies carry `"status": "OK"`.

use axum::{
    Form, Json,
    extract::{FromRequestParts, Query, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use axum_valid::Valid;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Serialize;

use crate::{
    AppState,
    models::{
        ClientIdParams, CreateLoginRedirect, CreateSamlClient, DEFAULT_APP_ID, DEFAULT_TENANT_ID,
        ExchangeCode, LegacyAuthorizeParams, LegacyCallbackForm, LegacyTokenForm, SamlCallback,
        SamlClient, SamlClientInput, Tenant, UserInfoRequest,
    },
    saml::{SamlError, SamlResult},
    services::UserInfo,
};

pub const APP_ID_HEADER: &str = "x-app-id";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";

const MAX_TENANT_PART_LEN: usize = 64;

impl<S: Send + Sync> FromRequestParts<S> for Tenant {
    type Rejection = SamlError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let app_id = tenant_part(parts, APP_ID_HEADER, DEFAULT_APP_ID)?;
        let tenant_id = tenant_part(parts, TENANT_ID_HEADER, DEFAULT_TENANT_ID)?;
        Ok(Tenant::new(app_id, tenant_id))
    }
}

fn tenant_part(parts: &Parts, header: &str, default: &str) -> SamlResult<String> {
    let Some(value) = parts.headers.get(header) else {
        return Ok(default.to_string());
    };
    let value = value
        .to_str()
        .map_err(|_| SamlError::BadRequest(format!("{header} must be ASCII")))?
        .trim();
    if value.is_empty() {
        return Ok(default.to_string());
    }
    if value.len() > MAX_TENANT_PART_LEN
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SamlError::BadRequest(format!(
            "{header} must be 1-{MAX_TENANT_PART_LEN} characters of [A-Za-z0-9_-]"
        )));
    }
    Ok(value.to_string())
}

/// `{"status": "OK", ...body}`
#[derive(Debug, Serialize)]
pub struct StatusOk<T> {
    status: &'static str,
    #[serde(flatten)]
    body: T,
}

fn ok<T: Serialize>(body: T) -> Json<StatusOk<T>> {
    Json(StatusOk { status: "OK", body })
}

#[derive(Debug, Serialize)]
pub struct ClientList {
    clients: Vec<SamlClient>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveResult {
    did_exist: bool,
}

#[derive(Debug, Serialize)]
pub struct LoginRedirect {
    #[serde(rename = "ssoRedirectURI")]
    sso_redirect_uri: String,
}

#[derive(Debug, Serialize)]
pub struct CallbackRedirect {
    #[serde(rename = "redirectURI")]
    redirect_uri: String,
}

#[derive(Debug, Serialize)]
pub struct IssuedToken {
    token: String,
}

#[derive(Debug, Serialize)]
pub struct LegacyAccessToken {
    access_token: String,
}

impl TryFrom<CreateSamlClient> for SamlClientInput {
    type Error = SamlError;

    fn try_from(input: CreateSamlClient) -> Result<Self, Self::Error> {
        let metadata_xml = input
            .metadata_xml
            .map(|encoded| {
                let bytes = STANDARD
                    .decode(encoded.trim())
                    .map_err(|_| SamlError::BadRequest("metadataXML must be base64".into()))?;
                String::from_utf8(bytes)
                    .map_err(|_| SamlError::MalformedMetadata("metadata is not UTF-8".into()))
            })
            .transpose()?;

        Ok(SamlClientInput {
            client_id: input.client_id,
            client_secret: input.client_secret,
            sp_entity_id: input.sp_entity_id,
            default_redirect_uri: input.default_redirect_uri,
            redirect_uris: input.redirect_uris,
            metadata_xml,
            metadata_url: input.metadata_url,
            allow_idp_initiated_login: input.allow_idp_initiated_login,
            enable_request_signing: input.enable_request_signing,
        })
    }
}

/// Create or update a SAML client
#[tracing::instrument(name = "saml.clients.upsert", skip(state, input), fields(%tenant))]
pub async fn create_or_update(
    State(state): State<AppState>,
    tenant: Tenant,
    Valid(Json(input)): Valid<Json<CreateSamlClient>>,
) -> Result<Json<StatusOk<SamlClient>>, SamlError> {
    let client = state
        .services
        .clients
        .create_or_update(&tenant, input.try_into()?)
        .await?;
    Ok(ok(client))
}

/// Get a SAML client by id
#[tracing::instrument(name = "saml.clients.get", skip(state, params), fields(%tenant))]
pub async fn get(
    State(state): State<AppState>,
    tenant: Tenant,
    Valid(Query(params)): Valid<Query<ClientIdParams>>,
) -> Result<Json<StatusOk<SamlClient>>, SamlError> {
    let client = state
        .services
        .clients
        .get(&tenant, &params.client_id)
        .await?
        .ok_or_else(|| SamlError::InvalidClient(format!("Unknown client '{}'", params.client_id)))?;
    Ok(ok(client))
}

/// List the tenant's SAML clients
#[tracing::instrument(name = "saml.clients.list", skip(state), fields(%tenant))]
pub async fn list(
    State(state): State<AppState>,
    tenant: Tenant,
) -> Result<Json<StatusOk<ClientList>>, SamlError> {
    let clients = state.services.clients.list(&tenant).await?;
    Ok(ok(ClientList { clients }))
}

/// Remove a SAML client
#[tracing::instrument(name = "saml.clients.remove", skip(state, input), fields(%tenant))]
pub async fn remove(
    State(state): State<AppState>,
    tenant: Tenant,
    Valid(Json(input)): Valid<Json<ClientIdParams>>,
) -> Result<Json<StatusOk<RemoveResult>>, SamlError> {
    let did_exist = state
        .services
        .clients
        .remove(&tenant, &input.client_id)
        .await?;
    Ok(ok(RemoveResult { did_exist }))
}

/// Re-fetch a client's IdP metadata from its metadata URL
#[tracing::instrument(name = "saml.clients.refresh", skip(state, input), fields(%tenant))]
pub async fn refresh(
    State(state): State<AppState>,
    tenant: Tenant,
    Valid(Json(input)): Valid<Json<ClientIdParams>>,
) -> Result<Json<StatusOk<SamlClient>>, SamlError> {
    let client = state
        .services
        .clients
        .refresh_from_metadata_url(&tenant, &input.client_id)
        .await?;
    Ok(ok(client))
}

/// Build the SSO redirect for an SP-initiated login
#[tracing::instrument(name = "saml.login", skip(state, input), fields(%tenant))]
pub async fn login(
    State(state): State<AppState>,
    tenant: Tenant,
    Valid(Json(input)): Valid<Json<CreateLoginRedirect>>,
) -> Result<Json<StatusOk<LoginRedirect>>, SamlError> {
    let sso_redirect_uri = state
        .services
        .requests
        .build_redirect_url(
            &tenant,
            &input.client_id,
            &input.redirect_uri,
            input.state,
            &input.acs_url,
        )
        .await?;
    Ok(ok(LoginRedirect { sso_redirect_uri }))
}

/// Verify an IdP response and return the caller redirect carrying the code
#[tracing::instrument(name = "saml.callback", skip(state, input), fields(%tenant))]
pub async fn callback(
    State(state): State<AppState>,
    tenant: Tenant,
    Valid(Json(input)): Valid<Json<SamlCallback>>,
) -> Result<Json<StatusOk<CallbackRedirect>>, SamlError> {
    let redirect_uri = state
        .services
        .callbacks
        .handle_callback(&tenant, &input.saml_response, input.relay_state.as_deref())
        .await?;
    Ok(ok(CallbackRedirect { redirect_uri }))
}

/// Redeem a one-time code for a signed token
#[tracing::instrument(name = "saml.token", skip(state, input), fields(%tenant))]
pub async fn token(
    State(state): State<AppState>,
    tenant: Tenant,
    Valid(Json(input)): Valid<Json<ExchangeCode>>,
) -> Result<Json<StatusOk<IssuedToken>>, SamlError> {
    let token = state
        .services
        .codes
        .exchange_code_for_token(&tenant, &input.code)
        .await?;
    Ok(ok(IssuedToken { token }))
}

/// Identity carried by a token minted by [`token`]
#[tracing::instrument(name = "saml.user", skip(state, input), fields(%tenant))]
pub async fn user_info(
    State(state): State<AppState>,
    tenant: Tenant,
    Valid(Json(input)): Valid<Json<UserInfoRequest>>,
) -> Result<Json<StatusOk<UserInfo>>, SamlError> {
    let info = state
        .services
        .codes
        .get_user_info(&tenant, &input.access_token)
        .await?;
    Ok(ok(info))
}

/// A present, non-empty field or the given error message.
fn required(value: Option<String>, missing: impl FnOnce() -> String) -> SamlResult<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SamlError::BadRequest(missing()))
}

fn missing_query_field(name: &str) -> impl FnOnce() -> String + '_ {
    move || format!("Field name '{name}' is missing in GET request")
}

fn missing_form_field(name: &str) -> impl FnOnce() -> String + '_ {
    move || format!("Missing form field: {name}")
}

/// Legacy: redirect the browser to the IdP
#[tracing::instrument(name = "saml.legacy.authorize", skip(state, params), fields(%tenant))]
pub async fn legacy_authorize(
    State(state): State<AppState>,
    tenant: Tenant,
    Query(params): Query<LegacyAuthorizeParams>,
) -> Result<Redirect, SamlError> {
    let client_id = required(params.client_id, missing_query_field("client_id"))?;
    let redirect_uri = required(params.redirect_uri, missing_query_field("redirect_uri"))?;
    let url = state
        .services
        .legacy
        .authorize(&tenant, &client_id, &redirect_uri, params.state)
        .await?;
    Ok(Redirect::temporary(&url))
}

/// Legacy: IdP form post, answered with a 302 to the caller
#[tracing::instrument(name = "saml.legacy.callback", skip(state, form), fields(%tenant))]
pub async fn legacy_callback(
    State(state): State<AppState>,
    tenant: Tenant,
    Form(form): Form<LegacyCallbackForm>,
) -> Result<Response, SamlError> {
    let saml_response = required(form.saml_response, missing_form_field("SAMLResponse"))?;
    let redirect_uri = state
        .services
        .callbacks
        .handle_callback(&tenant, &saml_response, form.relay_state.as_deref())
        .await?;
    Ok((StatusCode::FOUND, [(header::LOCATION, redirect_uri)]).into_response())
}

/// Legacy: exchange client credentials and a code for an access token
#[tracing::instrument(name = "saml.legacy.token", skip(state, form), fields(%tenant))]
pub async fn legacy_token(
    State(state): State<AppState>,
    tenant: Tenant,
    Form(form): Form<LegacyTokenForm>,
) -> Result<Json<StatusOk<LegacyAccessToken>>, SamlError> {
    let client_id = required(form.client_id, missing_form_field("client_id"))?;
    let client_secret = required(form.client_secret, missing_form_field("client_secret"))?;
    let code = required(form.code, missing_form_field("code"))?;
    let access_token = state
        .services
        .legacy
        .issue_access_token(&tenant, &client_id, &client_secret, &code)
        .await?;
    Ok(ok(LegacyAccessToken { access_token }))
}

/// Legacy: identity behind a bearer access token
#[tracing::instrument(name = "saml.legacy.userinfo", skip(state, headers), fields(%tenant))]
pub async fn legacy_user_info(
    State(state): State<AppState>,
    tenant: Tenant,
    headers: HeaderMap,
) -> Result<Json<StatusOk<UserInfo>>, SamlError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| {
            (value.len() > 7 && value[..7].eq_ignore_ascii_case("bearer ")).then(|| value[7..].trim())
        })
        .filter(|token| !token.is_empty())
        .ok_or_else(|| SamlError::BadRequest("Authorization header is required".into()))?;
    let info = state.services.legacy.user_info(&tenant, token).await?;
    Ok(ok(info))
}
