use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use super::common::parse_millis;
use crate::{
    db::{
        error::DbResult,
        repos::{RelayStateRepo, SamlClaimsRepo},
    },
    models::{ClaimsRecord, RelayStateRecord, Tenant},
};

pub struct SqliteRelayStateRepo {
    pool: SqlitePool,
}

impl SqliteRelayStateRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RelayStateRepo for SqliteRelayStateRepo {
    async fn create(&self, tenant: &Tenant, record: RelayStateRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO saml_relay_states (
                app_id, tenant_id, relay_state, client_id, caller_state, redirect_uri, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&tenant.app_id)
        .bind(&tenant.tenant_id)
        .bind(&record.relay_state)
        .bind(&record.client_id)
        .bind(&record.caller_state)
        .bind(&record.redirect_uri)
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, tenant: &Tenant, relay_state: &str) -> DbResult<Option<RelayStateRecord>> {
        let row = sqlx::query(
            r#"
            SELECT relay_state, client_id, caller_state, redirect_uri, created_at
            FROM saml_relay_states
            WHERE app_id = ? AND tenant_id = ? AND relay_state = ?
            "#,
        )
        .bind(&tenant.app_id)
        .bind(&tenant.tenant_id)
        .bind(relay_state)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(RelayStateRecord {
                relay_state: row.get("relay_state"),
                client_id: row.get("client_id"),
                caller_state: row.get("caller_state"),
                redirect_uri: row.get("redirect_uri"),
                created_at: parse_millis(row.get("created_at"))?,
            })),
            None => Ok(None),
        }
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM saml_relay_states WHERE created_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct SqliteSamlClaimsRepo {
    pool: SqlitePool,
}

impl SqliteSamlClaimsRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SamlClaimsRepo for SqliteSamlClaimsRepo {
    async fn create(&self, tenant: &Tenant, record: ClaimsRecord) -> DbResult<()> {
        let claims = serde_json::to_string(&record.claims)?;
        sqlx::query(
            r#"
            INSERT INTO saml_claims (app_id, tenant_id, code, client_id, claims, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&tenant.app_id)
        .bind(&tenant.tenant_id)
        .bind(&record.code)
        .bind(&record.client_id)
        .bind(&claims)
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, tenant: &Tenant, code: &str) -> DbResult<Option<ClaimsRecord>> {
        let row = sqlx::query(
            r#"
            SELECT code, client_id, claims, created_at
            FROM saml_claims
            WHERE app_id = ? AND tenant_id = ? AND code = ?
            "#,
        )
        .bind(&tenant.app_id)
        .bind(&tenant.tenant_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(claims_from_row).transpose()
    }

    async fn take(&self, tenant: &Tenant, code: &str) -> DbResult<Option<ClaimsRecord>> {
        // Single statement so two concurrent exchanges cannot both read the row
        let row = sqlx::query(
            r#"
            DELETE FROM saml_claims
            WHERE app_id = ? AND tenant_id = ? AND code = ?
            RETURNING code, client_id, claims, created_at
            "#,
        )
        .bind(&tenant.app_id)
        .bind(&tenant.tenant_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(claims_from_row).transpose()
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM saml_claims WHERE created_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn claims_from_row(row: SqliteRow) -> DbResult<ClaimsRecord> {
    let claims: String = row.get("claims");
    Ok(ClaimsRecord {
        code: row.get("code"),
        client_id: row.get("client_id"),
        claims: serde_json::from_str(&claims)?,
        created_at: parse_millis(row.get("created_at"))?,
    })
}
