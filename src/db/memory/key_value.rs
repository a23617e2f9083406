use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::db::{
    error::DbResult,
    repos::{KeyValueRepo, KvTransactionFn},
};

/// Key-value store guarded by a single mutex; transactions are serialized.
#[derive(Default)]
pub struct MemoryKeyValueRepo {
    values: Mutex<HashMap<(String, String), String>>,
}

impl MemoryKeyValueRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueRepo for MemoryKeyValueRepo {
    async fn get(&self, app_id: &str, key: &str) -> DbResult<Option<String>> {
        let values = self.values.lock().await;
        Ok(values
            .get(&(app_id.to_string(), key.to_string()))
            .cloned())
    }

    async fn transact<'a>(
        &self,
        app_id: &str,
        keys: &[&str],
        op: KvTransactionFn<'a>,
    ) -> DbResult<HashMap<String, String>> {
        let mut values = self.values.lock().await;

        let mut current: HashMap<String, String> = keys
            .iter()
            .filter_map(|key| {
                values
                    .get(&(app_id.to_string(), key.to_string()))
                    .map(|v| (key.to_string(), v.clone()))
            })
            .collect();

        let writes = op(&current)?;
        for (key, value) in writes {
            values.insert((app_id.to_string(), key.clone()), value.clone());
            current.insert(key, value);
        }
        Ok(current)
    }
}
