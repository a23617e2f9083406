use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::{
    config::MetadataFetchConfig,
    db::DbPool,
    models::{SamlClient, SamlClientInput, Tenant},
    saml::{SamlError, SamlResult, metadata::parse_idp_metadata},
    validation::url::{OutboundUrlPolicy, validate_outbound_url},
};

const CLIENT_ID_PREFIX: &str = "st_saml_";

/// Service layer for SAML client registration.
///
/// A client pairs an SP entity id and redirect allow-list with the IdP
/// described by its metadata: SSO endpoint, entity id and signing
/// certificate.
#[derive(Clone)]
pub struct ClientRegistry {
    db: Arc<DbPool>,
    http: reqwest::Client,
    fetch: MetadataFetchConfig,
}

impl ClientRegistry {
    pub fn new(db: Arc<DbPool>, fetch: MetadataFetchConfig) -> SamlResult<Self> {
        // Redirects are not followed: the target would bypass URL validation
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(fetch.timeout_secs))
            .build()
            .map_err(|e| SamlError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { db, http, fetch })
    }

    /// Create or fully replace a client from IdP metadata.
    ///
    /// `metadata_xml` wins over `metadata_url`; the URL is still stored for
    /// later refreshes.
    pub async fn create_or_update(
        &self,
        tenant: &Tenant,
        input: SamlClientInput,
    ) -> SamlResult<SamlClient> {
        let xml = match (&input.metadata_xml, &input.metadata_url) {
            (Some(xml), _) => xml.clone(),
            (None, Some(url)) => self.fetch_metadata(url).await?,
            (None, None) => {
                return Err(SamlError::BadRequest(
                    "Either metadataXML or metadataURL is required".into(),
                ));
            }
        };

        let metadata =
            parse_idp_metadata(&xml).map_err(|e| SamlError::MalformedMetadata(e.to_string()))?;

        let client_id = input.client_id.unwrap_or_else(generate_client_id);
        let client = SamlClient {
            client_id,
            client_secret: input.client_secret,
            sso_login_url: metadata.sso_redirect_url,
            redirect_uris: input.redirect_uris,
            default_redirect_uri: input.default_redirect_uri,
            metadata_url: input.metadata_url,
            sp_entity_id: input.sp_entity_id,
            idp_entity_id: metadata.entity_id,
            idp_signing_certificate: metadata.signing_certificate,
            allow_idp_initiated_login: input.allow_idp_initiated_login,
            enable_request_signing: input.enable_request_signing,
            created_at: Utc::now(),
        };

        let stored = self.db.saml_clients().upsert(tenant, client).await?;
        tracing::info!(
            tenant = %tenant,
            client_id = %stored.client_id,
            idp_entity_id = %stored.idp_entity_id,
            "SAML client saved"
        );
        Ok(stored)
    }

    /// Re-read the client's `metadata_url` and update the IdP fields.
    pub async fn refresh_from_metadata_url(
        &self,
        tenant: &Tenant,
        client_id: &str,
    ) -> SamlResult<SamlClient> {
        let client = self
            .get(tenant, client_id)
            .await?
            .ok_or_else(|| SamlError::InvalidClient(format!("Unknown client '{client_id}'")))?;
        let Some(url) = client.metadata_url.clone() else {
            return Err(SamlError::BadRequest(
                "Client has no metadataURL to refresh from".into(),
            ));
        };

        self.create_or_update(
            tenant,
            SamlClientInput {
                client_id: Some(client.client_id),
                client_secret: client.client_secret,
                sp_entity_id: client.sp_entity_id,
                default_redirect_uri: client.default_redirect_uri,
                redirect_uris: client.redirect_uris,
                metadata_xml: None,
                metadata_url: Some(url),
                allow_idp_initiated_login: client.allow_idp_initiated_login,
                enable_request_signing: client.enable_request_signing,
            },
        )
        .await
    }

    pub async fn get(&self, tenant: &Tenant, client_id: &str) -> SamlResult<Option<SamlClient>> {
        Ok(self.db.saml_clients().get(tenant, client_id).await?)
    }

    pub async fn get_by_idp_entity_id(
        &self,
        tenant: &Tenant,
        idp_entity_id: &str,
    ) -> SamlResult<Option<SamlClient>> {
        Ok(self
            .db
            .saml_clients()
            .get_by_idp_entity_id(tenant, idp_entity_id)
            .await?)
    }

    pub async fn list(&self, tenant: &Tenant) -> SamlResult<Vec<SamlClient>> {
        Ok(self.db.saml_clients().list(tenant).await?)
    }

    /// Delete a client; returns whether it existed.
    pub async fn remove(&self, tenant: &Tenant, client_id: &str) -> SamlResult<bool> {
        let existed = self.db.saml_clients().delete(tenant, client_id).await?;
        if existed {
            tracing::info!(tenant = %tenant, client_id = %client_id, "SAML client removed");
        }
        Ok(existed)
    }

    async fn fetch_metadata(&self, url: &str) -> SamlResult<String> {
        validate_outbound_url(url, OutboundUrlPolicy::from(&self.fetch))
            .await
            .map_err(|e| SamlError::MalformedMetadata(format!("metadata URL rejected: {e}")))?;

        tracing::debug!(url = %url, "Fetching IdP metadata");
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                tracing::warn!(url = %url, error = %e, "IdP metadata fetch failed");
                SamlError::MalformedMetadata(format!("failed to fetch metadata: {e}"))
            })?;

        if response
            .content_length()
            .is_some_and(|len| len > self.fetch.max_bytes as u64)
        {
            return Err(too_large(self.fetch.max_bytes));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            SamlError::MalformedMetadata(format!("failed to read metadata: {e}"))
        })? {
            if body.len() + chunk.len() > self.fetch.max_bytes {
                return Err(too_large(self.fetch.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        String::from_utf8(body)
            .map_err(|_| SamlError::MalformedMetadata("metadata is not valid UTF-8".into()))
    }
}

fn too_large(max: usize) -> SamlError {
    SamlError::MalformedMetadata(format!("metadata exceeds {max} bytes"))
}

fn generate_client_id() -> String {
    let bytes: [u8; 16] = rand::random();
    format!("{CLIENT_ID_PREFIX}{}", hex::encode(bytes))
}
