use std::sync::Arc;

use chrono::Utc;

use crate::{
    db::DbPool,
    models::{RelayStateRecord, Tenant},
    saml::SamlResult,
};

/// Correlates outgoing AuthnRequests with their callbacks.
#[derive(Clone)]
pub struct RelayStateTracker {
    db: Arc<DbPool>,
}

impl RelayStateTracker {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Record a new login attempt and return its relay state.
    pub async fn create(
        &self,
        tenant: &Tenant,
        client_id: &str,
        caller_state: Option<String>,
        redirect_uri: &str,
    ) -> SamlResult<String> {
        let relay_state = random_token();
        self.db
            .relay_states()
            .create(
                tenant,
                RelayStateRecord {
                    relay_state: relay_state.clone(),
                    client_id: client_id.to_string(),
                    caller_state,
                    redirect_uri: redirect_uri.to_string(),
                    created_at: Utc::now(),
                },
            )
            .await?;
        Ok(relay_state)
    }

    /// The record for `relay_state`. The record is left in place.
    pub async fn resolve(
        &self,
        tenant: &Tenant,
        relay_state: &str,
    ) -> SamlResult<Option<RelayStateRecord>> {
        Ok(self.db.relay_states().get(tenant, relay_state).await?)
    }
}

/// 256 random bits, hex encoded.
pub(crate) fn random_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}
