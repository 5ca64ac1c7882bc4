use std::time::Duration;

use anyhow::Result;
use causeway_events::config::env_or;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub dispatch_shards: usize,
    pub side_effect_shards: usize,
    /// How often an unchanged queue re-reports its depth.
    pub queue_heartbeat: Duration,
    /// Readings buffered per size subscriber before it lags.
    pub queue_signal_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_shards: 4,
            side_effect_shards: 2,
            queue_heartbeat: Duration::from_millis(25),
            queue_signal_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let heartbeat_ms: u64 = env_or(
            "QUEUE_HEARTBEAT_MS",
            defaults.queue_heartbeat.as_millis() as u64,
        )?;

        let config = Self {
            dispatch_shards: env_or("DISPATCH_SHARDS", defaults.dispatch_shards)?,
            side_effect_shards: env_or("SIDE_EFFECT_SHARDS", defaults.side_effect_shards)?,
            queue_heartbeat: Duration::from_millis(heartbeat_ms),
            queue_signal_capacity: env_or("QUEUE_SIGNAL_CAPACITY", defaults.queue_signal_capacity)?,
        };

        tracing::info!(
            dispatch_shards = config.dispatch_shards,
            side_effect_shards = config.side_effect_shards,
            heartbeat_ms,
            signal_capacity = config.queue_signal_capacity,
            "Engine config loaded"
        );
        Ok(config)
    }

    /// Single-shard queues with a fast heartbeat. Handy in tests.
    pub fn single_shard() -> Self {
        Self {
            dispatch_shards: 1,
            side_effect_shards: 1,
            queue_heartbeat: Duration::from_millis(5),
            ..Self::default()
        }
    }
}
