//! Named Postgres pools, created on first use and closed explicitly.
//!
//! Owned by the process bootstrap and handed to whatever needs a pool; there
//! is no global cache.

use std::collections::HashMap;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::postgres::PostgresBackend;

pub const DEFAULT_CONNECTION: &str = "default";

pub struct ConnectionRegistry {
    config: StoreConfig,
    pools: Mutex<HashMap<String, PgPool>>,
}

impl ConnectionRegistry {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The pool registered under `name`, connecting on first use.
    ///
    /// The lock is held across the connect so concurrent first callers share
    /// one pool instead of racing to open two.
    pub async fn pool(&self, name: &str) -> StoreResult<PgPool> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(name) {
            return Ok(pool.clone());
        }

        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .connect(&self.config.database_url)
            .await?;

        info!(connection = name, "Opened database pool");
        pools.insert(name.to_string(), pool.clone());
        Ok(pool)
    }

    /// A Postgres backend on the named pool.
    pub async fn backend(&self, name: &str) -> StoreResult<PostgresBackend> {
        Ok(PostgresBackend::new(self.pool(name).await?))
    }

    /// Register an already-open pool under `name`, replacing any previous one.
    pub async fn register(&self, name: &str, pool: PgPool) {
        if let Some(previous) = self.pools.lock().await.insert(name.to_string(), pool) {
            previous.close().await;
        }
    }

    /// Close and forget the named pool. Returns whether one was open.
    pub async fn close(&self, name: &str) -> bool {
        let removed = self.pools.lock().await.remove(name);
        match removed {
            Some(pool) => {
                pool.close().await;
                info!(connection = name, "Closed database pool");
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<(String, PgPool)> = self.pools.lock().await.drain().collect();
        for (name, pool) in drained {
            pool.close().await;
            info!(connection = %name, "Closed database pool");
        }
    }

    pub async fn open_connections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}
