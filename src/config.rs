use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Synchronization core configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Base URL of the sync service (diff RPC endpoint)
    pub sync_service_url: Option<String>,

    /// Diff protocol version sent with every fetch
    #[serde(default = "default_diff_protocol_version")]
    pub diff_protocol_version: u32,

    /// Fixed delay between "not ready" diff retries, in seconds
    #[serde(default = "default_diff_retry_delay_secs")]
    pub diff_retry_delay_secs: u64,

    /// Additional attempts after the initial "not ready" response
    #[serde(default = "default_diff_retry_attempts")]
    pub diff_retry_attempts: u32,

    /// Entries merged concurrently within one diff apply batch
    #[serde(default = "default_diff_apply_concurrency")]
    pub diff_apply_concurrency: usize,

    /// Upper bound on buffered row document seeds
    #[serde(default = "default_max_row_doc_seeds")]
    pub max_row_doc_seeds: usize,

    /// Rows pulled off the hydration queue per batch
    #[serde(default = "default_hydration_batch_size")]
    pub hydration_batch_size: usize,

    /// Document opens in flight at once during background hydration
    #[serde(default = "default_hydration_concurrency")]
    pub hydration_concurrency: usize,

    /// Capacity of the hydrated row document cache
    #[serde(default = "default_hydrated_row_cache_capacity")]
    pub hydrated_row_cache_capacity: u64,

    /// Idle eviction window of the hydrated row document cache, in seconds
    #[serde(default = "default_hydrated_row_cache_idle_secs")]
    pub hydrated_row_cache_idle_secs: u64,

    /// Workers resolving rollup relations and attaching observers
    #[serde(default = "default_rollup_worker_count")]
    pub rollup_worker_count: usize,

    /// Debounce window for rollup "conditions changed" callbacks, in ms
    #[serde(default = "default_rollup_debounce_ms")]
    pub rollup_debounce_ms: u64,

    /// Debounce window for cursor awareness re-publishes, in ms
    #[serde(default = "default_awareness_debounce_ms")]
    pub awareness_debounce_ms: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            log_level: default_log_level(),
            sync_service_url: None,
            diff_protocol_version: default_diff_protocol_version(),
            diff_retry_delay_secs: default_diff_retry_delay_secs(),
            diff_retry_attempts: default_diff_retry_attempts(),
            diff_apply_concurrency: default_diff_apply_concurrency(),
            max_row_doc_seeds: default_max_row_doc_seeds(),
            hydration_batch_size: default_hydration_batch_size(),
            hydration_concurrency: default_hydration_concurrency(),
            hydrated_row_cache_capacity: default_hydrated_row_cache_capacity(),
            hydrated_row_cache_idle_secs: default_hydrated_row_cache_idle_secs(),
            rollup_worker_count: default_rollup_worker_count(),
            rollup_debounce_ms: default_rollup_debounce_ms(),
            awareness_debounce_ms: default_awareness_debounce_ms(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_diff_protocol_version() -> u32 {
    1
}

fn default_diff_retry_delay_secs() -> u64 {
    5
}

fn default_diff_retry_attempts() -> u32 {
    2
}

fn default_diff_apply_concurrency() -> usize {
    6
}

fn default_max_row_doc_seeds() -> usize {
    2000
}

fn default_hydration_batch_size() -> usize {
    24
}

fn default_hydration_concurrency() -> usize {
    6
}

fn default_hydrated_row_cache_capacity() -> u64 {
    4096
}

fn default_hydrated_row_cache_idle_secs() -> u64 {
    300
}

fn default_rollup_worker_count() -> usize {
    4
}

fn default_rollup_debounce_ms() -> u64 {
    200
}

fn default_awareness_debounce_ms() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.diff_retry_delay_secs, 5);
        assert_eq!(config.diff_retry_attempts, 2);
        assert_eq!(config.diff_apply_concurrency, 6);
        assert_eq!(config.max_row_doc_seeds, 2000);
        assert_eq!(config.hydration_batch_size, 24);
        assert_eq!(config.hydration_concurrency, 6);
        assert_eq!(config.rollup_worker_count, 4);
        assert_eq!(config.rollup_debounce_ms, 200);
        assert_eq!(config.awareness_debounce_ms, 100);
    }
}
