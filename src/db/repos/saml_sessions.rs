use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    db::error::DbResult,
    models::{ClaimsRecord, RelayStateRecord, Tenant},
};

/// Repository for relay-state records of SP-initiated logins.
#[async_trait]
pub trait RelayStateRepo: Send + Sync {
    async fn create(&self, tenant: &Tenant, record: RelayStateRecord) -> DbResult<()>;

    async fn get(&self, tenant: &Tenant, relay_state: &str) -> DbResult<Option<RelayStateRecord>>;

    /// Delete records created before `cutoff` across all tenants.
    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64>;
}

/// Repository for one-time claims codes.
#[async_trait]
pub trait SamlClaimsRepo: Send + Sync {
    async fn create(&self, tenant: &Tenant, record: ClaimsRecord) -> DbResult<()>;

    /// Read the record for `code` without consuming it.
    async fn get(&self, tenant: &Tenant, code: &str) -> DbResult<Option<ClaimsRecord>>;

    /// Read and delete the record for `code` atomically.
    ///
    /// Concurrent callers with the same code observe at most one `Some`.
    async fn take(&self, tenant: &Tenant, code: &str) -> DbResult<Option<ClaimsRecord>>;

    /// Delete records created before `cutoff` across all tenants.
    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64>;
}
