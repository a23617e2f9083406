use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    db::{
        error::DbResult,
        repos::{RelayStateRepo, SamlClaimsRepo},
    },
    models::{ClaimsRecord, RelayStateRecord, Tenant},
};

#[derive(Default)]
pub struct MemoryRelayStateRepo {
    records: RwLock<HashMap<(Tenant, String), RelayStateRecord>>,
}

impl MemoryRelayStateRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelayStateRepo for MemoryRelayStateRepo {
    async fn create(&self, tenant: &Tenant, record: RelayStateRecord) -> DbResult<()> {
        let mut records = self.records.write().await;
        records.insert((tenant.clone(), record.relay_state.clone()), record);
        Ok(())
    }

    async fn get(&self, tenant: &Tenant, relay_state: &str) -> DbResult<Option<RelayStateRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(tenant.clone(), relay_state.to_string()))
            .cloned())
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.created_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemorySamlClaimsRepo {
    records: RwLock<HashMap<(Tenant, String), ClaimsRecord>>,
}

impl MemorySamlClaimsRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SamlClaimsRepo for MemorySamlClaimsRepo {
    async fn create(&self, tenant: &Tenant, record: ClaimsRecord) -> DbResult<()> {
        let mut records = self.records.write().await;
        records.insert((tenant.clone(), record.code.clone()), record);
        Ok(())
    }

    async fn get(&self, tenant: &Tenant, code: &str) -> DbResult<Option<ClaimsRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&(tenant.clone(), code.to_string())).cloned())
    }

    async fn take(&self, tenant: &Tenant, code: &str) -> DbResult<Option<ClaimsRecord>> {
        let mut records = self.records.write().await;
        Ok(records.remove(&(tenant.clone(), code.to_string())))
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.created_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}
