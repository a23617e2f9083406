mod error;
pub mod memory;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(test)]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    saml_clients: Arc<dyn SamlClientRepo>,
    relay_states: Arc<dyn RelayStateRepo>,
    saml_claims: Arc<dyn SamlClaimsRepo>,
    key_value: Arc<dyn KeyValueRepo>,
}

enum PoolStorage {
    Memory,
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
}

/// Storage backend: in-process memory or SQLite.
///
/// Repositories are cached at construction time to avoid allocation on each access.
pub struct DbPool {
    inner: PoolStorage,
    repos: CachedRepos,
}

impl DbPool {
    /// In-process storage. Nothing survives a restart and nothing is shared
    /// between processes.
    pub fn in_memory() -> Self {
        DbPool {
            inner: PoolStorage::Memory,
            repos: CachedRepos {
                saml_clients: Arc::new(memory::MemorySamlClientRepo::new()),
                relay_states: Arc::new(memory::MemoryRelayStateRepo::new()),
                saml_claims: Arc::new(memory::MemorySamlClaimsRepo::new()),
                key_value: Arc::new(memory::MemoryKeyValueRepo::new()),
            },
        }
    }

    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        let repos = CachedRepos {
            saml_clients: Arc::new(sqlite::SqliteSamlClientRepo::new(pool.clone())),
            relay_states: Arc::new(sqlite::SqliteRelayStateRepo::new(pool.clone())),
            saml_claims: Arc::new(sqlite::SqliteSamlClaimsRepo::new(pool.clone())),
            key_value: Arc::new(sqlite::SqliteKeyValueRepo::new(pool.clone())),
        };
        DbPool {
            inner: PoolStorage::Sqlite(pool),
            repos,
        }
    }

    /// Create a database pool from configuration
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Ok(Self::in_memory()),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .journal_mode(if cfg.wal_mode {
                                sqlx::sqlite::SqliteJournalMode::Wal
                            } else {
                                sqlx::sqlite::SqliteJournalMode::Delete
                            })
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;
                Ok(Self::from_sqlite(pool))
            }
        }
    }

    /// Run database migrations using sqlx's migration runner.
    /// No-op for in-memory storage.
    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.inner {
            PoolStorage::Memory => Ok(()),
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                tracing::info!("Running SQLite migrations");
                sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
                tracing::info!("SQLite migrations completed successfully");
                Ok(())
            }
        }
    }

    /// Health check for database connectivity
    pub async fn health_check(&self) -> DbResult<()> {
        match &self.inner {
            PoolStorage::Memory => Ok(()),
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.inner {
            PoolStorage::Memory => "memory",
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(_) => "sqlite",
        }
    }

    /// Close the underlying pool, waiting for connections to be released.
    pub async fn close(&self) {
        match &self.inner {
            PoolStorage::Memory => {}
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => pool.close().await,
        }
    }

    pub fn saml_clients(&self) -> Arc<dyn SamlClientRepo> {
        Arc::clone(&self.repos.saml_clients)
    }

    pub fn relay_states(&self) -> Arc<dyn RelayStateRepo> {
        Arc::clone(&self.repos.relay_states)
    }

    pub fn saml_claims(&self) -> Arc<dyn SamlClaimsRepo> {
        Arc::clone(&self.repos.saml_claims)
    }

    pub fn key_value(&self) -> Arc<dyn KeyValueRepo> {
        Arc::clone(&self.repos.key_value)
    }
}
