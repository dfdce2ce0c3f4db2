//! Engine configuration loaded from the environment.
use std::env;
use std::time::Duration;

use dotenv::dotenv;
use twin_sync_repository::StoreSource;

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Runtime configuration for the synchronization engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub store: StoreSource,
    /// How long a mutating operation waits for a per-twin lock.
    pub lock_timeout: Duration,
}

impl EngineConfig {
    /// Reads configuration from the environment.
    ///
    /// `TWIN_SYNC_DATABASE_URL` selects the PostgreSQL backend; without
    /// it the engine runs on the in-memory store.
    /// `TWIN_SYNC_LOCK_TIMEOUT_MS` overrides the lock deadline.
    pub fn from_env() -> Self {
        dotenv().ok();
        let store = match env::var("TWIN_SYNC_DATABASE_URL") {
            Ok(url) => StoreSource::live(url),
            Err(_) => StoreSource::Mock,
        };
        let lock_timeout = env::var("TWIN_SYNC_LOCK_TIMEOUT_MS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS));
        Self {
            store,
            lock_timeout,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreSource::Mock,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }
}
