use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::db::{
    error::{DbError, DbResult},
    repos::{KeyValueRepo, KvTransactionFn},
};

pub struct SqliteKeyValueRepo {
    pool: SqlitePool,
}

impl SqliteKeyValueRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueRepo for SqliteKeyValueRepo {
    async fn get(&self, app_id: &str, key: &str) -> DbResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM key_value WHERE app_id = ? AND name = ?")
            .bind(app_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn transact<'a>(
        &self,
        app_id: &str,
        keys: &[&str],
        op: KvTransactionFn<'a>,
    ) -> DbResult<HashMap<String, String>> {
        // BEGIN IMMEDIATE takes the database write lock before reading, so a
        // second process running the same transaction blocks until we commit
        // and then observes our writes. Dropping the transaction before
        // commit rolls it back.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let result = async {
            let mut current = HashMap::new();
            for key in keys {
                let row = sqlx::query("SELECT value FROM key_value WHERE app_id = ? AND name = ?")
                    .bind(app_id)
                    .bind(*key)
                    .fetch_optional(&mut *tx)
                    .await?;
                if let Some(row) = row {
                    current.insert(key.to_string(), row.get::<String, _>("value"));
                }
            }

            let writes = op(&current)?;
            let now = chrono::Utc::now().timestamp_millis();
            for (key, value) in writes {
                sqlx::query(
                    r#"
                    INSERT INTO key_value (app_id, name, value, updated_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT (app_id, name) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(app_id)
                .bind(&key)
                .bind(&value)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                current.insert(key, value);
            }

            Ok::<_, DbError>(current)
        }
        .await;

        match result {
            Ok(current) => {
                tx.commit().await?;
                Ok(current)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }
}
