use std::collections::HashMap;

use async_trait::async_trait;

use crate::db::error::DbResult;

/// Body of a key-value transaction.
///
/// Receives the current values of the requested keys (absent keys are
/// missing from the map) and returns the values to write.
pub type KvTransactionFn<'a> =
    Box<dyn FnOnce(&HashMap<String, String>) -> DbResult<HashMap<String, String>> + Send + 'a>;

/// App-scoped key-value store with read-modify-write transactions.
#[async_trait]
pub trait KeyValueRepo: Send + Sync {
    async fn get(&self, app_id: &str, key: &str) -> DbResult<Option<String>>;

    /// Run `op` over `keys` atomically with respect to every other
    /// transaction on the same store, including other processes sharing a
    /// SQLite file.
    ///
    /// Returns the values of `keys` after the writes. If `op` fails nothing
    /// is written.
    async fn transact<'a>(
        &self,
        app_id: &str,
        keys: &[&str],
        op: KvTransactionFn<'a>,
    ) -> DbResult<HashMap<String, String>>;
}
