use async_trait::async_trait;

use crate::{
    db::error::DbResult,
    models::{SamlClient, Tenant},
};

/// Repository for registered SAML clients.
///
/// Clients are keyed by (app, tenant, client_id).
#[async_trait]
pub trait SamlClientRepo: Send + Sync {
    /// Insert or fully replace a client.
    ///
    /// An existing client keeps its original `created_at`; the stored row is
    /// returned.
    async fn upsert(&self, tenant: &Tenant, client: SamlClient) -> DbResult<SamlClient>;

    async fn get(&self, tenant: &Tenant, client_id: &str) -> DbResult<Option<SamlClient>>;

    /// Resolve the client trusting `idp_entity_id`.
    ///
    /// When several clients share the IdP entity id, the one with the lowest
    /// `client_id` wins.
    async fn get_by_idp_entity_id(
        &self,
        tenant: &Tenant,
        idp_entity_id: &str,
    ) -> DbResult<Option<SamlClient>>;

    /// List a tenant's clients ordered by creation time, then client id.
    async fn list(&self, tenant: &Tenant) -> DbResult<Vec<SamlClient>>;

    /// Delete a client. Returns whether it existed.
    async fn delete(&self, tenant: &Tenant, client_id: &str) -> DbResult<bool>;
}
