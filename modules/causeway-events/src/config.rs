use std::str::FromStr;

use anyhow::{Context, Result};

/// Store configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub replay_page_size: usize,
}

impl StoreConfig {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
    pub const DEFAULT_REPLAY_PAGE_SIZE: usize = 100;

    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            replay_page_size: Self::DEFAULT_REPLAY_PAGE_SIZE,
        }
    }

    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", Self::DEFAULT_MAX_CONNECTIONS)?,
            replay_page_size: env_or("REPLAY_PAGE_SIZE", Self::DEFAULT_REPLAY_PAGE_SIZE)?,
        };

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let head: String = val.chars().take(11).collect();
            format!("{}...({} chars)", head, val.len())
        }

        tracing::info!("Store config loaded:");
        tracing::info!("  DATABASE_URL: {}", preview(&self.database_url));
        tracing::info!("  DATABASE_MAX_CONNECTIONS: {}", self.max_connections);
        tracing::info!("  REPLAY_PAGE_SIZE: {}", self.replay_page_size);
    }
}

/// Parse `key` from the environment, falling back to `default` when unset.
pub fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number, got {raw:?}")),
        Err(_) => Ok(default),
    }
}
