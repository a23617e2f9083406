use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::common::parse_millis;
use crate::{
    db::{error::DbResult, repos::SamlClientRepo},
    models::{SamlClient, Tenant},
};

const CLIENT_COLUMNS: &str = r#"
    client_id, client_secret, sso_login_url, redirect_uris, default_redirect_uri,
    metadata_url, sp_entity_id, idp_entity_id, idp_signing_certificate,
    allow_idp_initiated_login, enable_request_signing, created_at
"#;

pub struct SqliteSamlClientRepo {
    pool: SqlitePool,
}

impl SqliteSamlClientRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_client(row: &sqlx::sqlite::SqliteRow) -> DbResult<SamlClient> {
        let redirect_uris: String = row.get("redirect_uris");
        Ok(SamlClient {
            client_id: row.get("client_id"),
            client_secret: row.get("client_secret"),
            sso_login_url: row.get("sso_login_url"),
            redirect_uris: serde_json::from_str(&redirect_uris)?,
            default_redirect_uri: row.get("default_redirect_uri"),
            metadata_url: row.get("metadata_url"),
            sp_entity_id: row.get("sp_entity_id"),
            idp_entity_id: row.get("idp_entity_id"),
            idp_signing_certificate: row.get("idp_signing_certificate"),
            allow_idp_initiated_login: row.get("allow_idp_initiated_login"),
            enable_request_signing: row.get("enable_request_signing"),
            created_at: parse_millis(row.get("created_at"))?,
        })
    }
}

#[async_trait]
impl SamlClientRepo for SqliteSamlClientRepo {
    async fn upsert(&self, tenant: &Tenant, client: SamlClient) -> DbResult<SamlClient> {
        let redirect_uris = serde_json::to_string(&client.redirect_uris)?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO saml_clients (
                app_id, tenant_id, client_id, client_secret, sso_login_url, redirect_uris,
                default_redirect_uri, metadata_url, sp_entity_id, idp_entity_id,
                idp_signing_certificate, allow_idp_initiated_login, enable_request_signing,
                created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (app_id, tenant_id, client_id) DO UPDATE SET
                client_secret = excluded.client_secret,
                sso_login_url = excluded.sso_login_url,
                redirect_uris = excluded.redirect_uris,
                default_redirect_uri = excluded.default_redirect_uri,
                metadata_url = excluded.metadata_url,
                sp_entity_id = excluded.sp_entity_id,
                idp_entity_id = excluded.idp_entity_id,
                idp_signing_certificate = excluded.idp_signing_certificate,
                allow_idp_initiated_login = excluded.allow_idp_initiated_login,
                enable_request_signing = excluded.enable_request_signing
            RETURNING {CLIENT_COLUMNS}
            "#
        ))
        .bind(&tenant.app_id)
        .bind(&tenant.tenant_id)
        .bind(&client.client_id)
        .bind(&client.client_secret)
        .bind(&client.sso_login_url)
        .bind(&redirect_uris)
        .bind(&client.default_redirect_uri)
        .bind(&client.metadata_url)
        .bind(&client.sp_entity_id)
        .bind(&client.idp_entity_id)
        .bind(&client.idp_signing_certificate)
        .bind(client.allow_idp_initiated_login)
        .bind(client.enable_request_signing)
        .bind(client.created_at.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        Self::parse_client(&row)
    }

    async fn get(&self, tenant: &Tenant, client_id: &str) -> DbResult<Option<SamlClient>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {CLIENT_COLUMNS}
            FROM saml_clients
            WHERE app_id = ? AND tenant_id = ? AND client_id = ?
            "#
        ))
        .bind(&tenant.app_id)
        .bind(&tenant.tenant_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_client).transpose()
    }

    async fn get_by_idp_entity_id(
        &self,
        tenant: &Tenant,
        idp_entity_id: &str,
    ) -> DbResult<Option<SamlClient>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {CLIENT_COLUMNS}
            FROM saml_clients
            WHERE app_id = ? AND tenant_id = ? AND idp_entity_id = ?
            ORDER BY client_id ASC
            LIMIT 1
            "#
        ))
        .bind(&tenant.app_id)
        .bind(&tenant.tenant_id)
        .bind(idp_entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_client).transpose()
    }

    async fn list(&self, tenant: &Tenant) -> DbResult<Vec<SamlClient>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CLIENT_COLUMNS}
            FROM saml_clients
            WHERE app_id = ? AND tenant_id = ?
            ORDER BY created_at ASC, client_id ASC
            "#
        ))
        .bind(&tenant.app_id)
        .bind(&tenant.tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_client).collect()
    }

    async fn delete(&self, tenant: &Tenant, client_id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "DELETE FROM saml_clients WHERE app_id = ? AND tenant_id = ? AND client_id = ?",
        )
        .bind(&tenant.app_id)
        .bind(&tenant.tenant_id)
        .bind(client_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
