use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_RPC_BYTES: usize = 8 * 1024 * 1024; // upload chunks travel hex-encoded
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Top-level config (spinpost.toml + SPINPOST_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpinpostConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub entitlement: EntitlementConfig,
    #[serde(default)]
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Tuning knobs for the campaign run loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Attempts to open a destination context before the destination is failed.
    #[serde(default = "default_acquire_attempts")]
    pub acquire_attempts: u32,
    /// First backoff delay; doubles after every failed attempt.
    #[serde(default = "default_acquire_backoff_base_ms")]
    pub acquire_backoff_base_ms: u64,
    /// Upper bound on waiting for a submit's terminal signal.
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,
    /// Granularity at which a pacing wait re-checks the stop flag.
    #[serde(default = "default_pacing_poll_secs")]
    pub pacing_poll_secs: u64,
    /// Short pause between destinations even when pacing is continuous.
    #[serde(default = "default_inter_post_yield_ms")]
    pub inter_post_yield_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            acquire_attempts: default_acquire_attempts(),
            acquire_backoff_base_ms: default_acquire_backoff_base_ms(),
            submit_timeout_secs: default_submit_timeout_secs(),
            pacing_poll_secs: default_pacing_poll_secs(),
            inter_post_yield_ms: default_inter_post_yield_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// How long after its fire time an occurrence is still considered due.
    #[serde(default = "default_trigger_window_secs")]
    pub trigger_window_secs: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Triggered-ledger entries older than this are pruned on engine start.
    #[serde(default = "default_ledger_retention_days")]
    pub ledger_retention_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            trigger_window_secs: default_trigger_window_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            ledger_retention_days: default_ledger_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    /// Upper bound on a single upload's announced chunk count.
    #[serde(default = "default_max_chunks")]
    pub max_chunks: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            ack_timeout_secs: default_ack_timeout_secs(),
            max_chunks: default_max_chunks(),
        }
    }
}

/// Remote premium/credit service. Cached answers are display-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementConfig {
    #[serde(default = "default_entitlement_url")]
    pub base_url: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self {
            base_url: default_entitlement_url(),
            account_id: String::new(),
            api_token: None,
        }
    }
}

/// Automation agent that opens destination contexts and performs submits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default = "default_driver_url")]
    pub base_url: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            base_url: default_driver_url(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_acquire_attempts() -> u32 {
    3
}
fn default_acquire_backoff_base_ms() -> u64 {
    1_000
}
fn default_submit_timeout_secs() -> u64 {
    120
}
fn default_pacing_poll_secs() -> u64 {
    10
}
fn default_inter_post_yield_ms() -> u64 {
    500
}
fn default_tick_secs() -> u64 {
    30
}
fn default_trigger_window_secs() -> u64 {
    600
}
fn default_cache_ttl_secs() -> u64 {
    5
}
fn default_ledger_retention_days() -> i64 {
    45
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_ack_timeout_secs() -> u64 {
    30
}
fn default_max_chunks() -> u32 {
    4096
}
fn default_entitlement_url() -> String {
    "http://127.0.0.1:3000/api".to_string()
}
fn default_driver_url() -> String {
    "http://127.0.0.1:9515".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.spinpost/spinpost.db", home)
}

impl SpinpostConfig {
    /// Load config from a TOML file with SPINPOST_* env var overrides.
    ///
    /// Uses the explicit path when given, otherwise `~/.spinpost/spinpost.toml`.
    /// A missing file is not an error: every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: SpinpostConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SPINPOST_").split("__"))
            .extract()
            .map_err(|e| crate::error::SpinpostError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.spinpost/spinpost.toml", home)
}
