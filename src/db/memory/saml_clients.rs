use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    db::{error::DbResult, repos::SamlClientRepo},
    models::{SamlClient, Tenant},
};

#[derive(Default)]
pub struct MemorySamlClientRepo {
    clients: RwLock<HashMap<Tenant, HashMap<String, SamlClient>>>,
}

impl MemorySamlClientRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SamlClientRepo for MemorySamlClientRepo {
    async fn upsert(&self, tenant: &Tenant, mut client: SamlClient) -> DbResult<SamlClient> {
        let mut clients = self.clients.write().await;
        let tenant_clients = clients.entry(tenant.clone()).or_default();
        if let Some(existing) = tenant_clients.get(&client.client_id) {
            client.created_at = existing.created_at;
        }
        tenant_clients.insert(client.client_id.clone(), client.clone());
        Ok(client)
    }

    async fn get(&self, tenant: &Tenant, client_id: &str) -> DbResult<Option<SamlClient>> {
        let clients = self.clients.read().await;
        Ok(clients.get(tenant).and_then(|c| c.get(client_id)).cloned())
    }

    async fn get_by_idp_entity_id(
        &self,
        tenant: &Tenant,
        idp_entity_id: &str,
    ) -> DbResult<Option<SamlClient>> {
        let clients = self.clients.read().await;
        Ok(clients.get(tenant).and_then(|c| {
            c.values()
                .filter(|client| client.idp_entity_id == idp_entity_id)
                .min_by(|a, b| a.client_id.cmp(&b.client_id))
                .cloned()
        }))
    }

    async fn list(&self, tenant: &Tenant) -> DbResult<Vec<SamlClient>> {
        let clients = self.clients.read().await;
        let mut list: Vec<SamlClient> = clients
            .get(tenant)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default();
        list.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.client_id.cmp(&b.client_id))
        });
        Ok(list)
    }

    async fn delete(&self, tenant: &Tenant, client_id: &str) -> DbResult<bool> {
        let mut clients = self.clients.write().await;
        Ok(clients
            .get_mut(tenant)
            .and_then(|c| c.remove(client_id))
            .is_some())
    }
}
