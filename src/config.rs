//! Configuration management for Turnstile.
//!
//! Configuration is layered: built-in defaults, then an optional file
//! (any format the `config` crate understands by extension), then
//! environment variables prefixed with `TURNSTILE_`, using `__` between
//! section and field, e.g. `TURNSTILE_RATE_LIMITING__LIMIT=20`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Audit journal configuration
    #[serde(default)]
    pub journal: JournalConfig,

    /// Log shipping configuration
    #[serde(default)]
    pub shipping: ShippingConfig,

    /// Remote store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

/// Sliding-window rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Requests admitted per window
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// How often idle client windows are swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            limit: default_limit(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_window_ms() -> u64 {
    10_000
}

fn default_limit() -> usize {
    10
}

fn default_sweep_interval() -> u64 {
    60
}

impl RateLimitingConfig {
    /// Interval between window sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Audit journal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Directory holding the active and sealed segments
    #[serde(default = "default_journal_dir")]
    pub dir: PathBuf,

    /// File name of the active segment
    #[serde(default = "default_active_name")]
    pub active_name: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: default_journal_dir(),
            active_name: default_active_name(),
        }
    }
}

fn default_journal_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_active_name() -> String {
    "audit.log".to_string()
}

/// Log shipping configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingConfig {
    /// Seconds between shipping cycles
    #[serde(default = "default_ship_interval")]
    pub interval_secs: u64,

    /// Hard upper bound on the persistence phase of one cycle, in seconds
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_secs: u64,

    /// Bulk-insert attempts per segment within one cycle
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles afterwards
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Re-ship sealed segments left behind by earlier failed cycles
    #[serde(default = "default_true")]
    pub retry_orphans: bool,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_ship_interval(),
            cycle_timeout_secs: default_cycle_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            retry_orphans: true,
        }
    }
}

fn default_ship_interval() -> u64 {
    60
}

fn default_cycle_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

impl ShippingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

/// Remote store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URI of the document store; records stay in memory when unset
    #[serde(default)]
    pub uri: Option<String>,

    /// Database holding the audit collection
    #[serde(default = "default_database")]
    pub database: String,

    /// Collection receiving audit records
    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Per-request timeout for store calls, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: None,
            database: default_database(),
            collection: default_collection(),
            username: None,
            password: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_database() -> String {
    "PimjoLogger".to_string()
}

fn default_collection() -> String {
    "Logs".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl StoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl TurnstileConfig {
    /// Load configuration from defaults, an optional file, and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: TurnstileConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.limit == 0 {
            return Err(TurnstileError::Config(
                "rate_limiting.limit must be at least 1".to_string(),
            ));
        }
        if self.rate_limiting.window_ms == 0 {
            return Err(TurnstileError::Config(
                "rate_limiting.window_ms must be at least 1".to_string(),
            ));
        }
        if self.rate_limiting.sweep_interval_secs == 0 {
            return Err(TurnstileError::Config(
                "rate_limiting.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.shipping.interval_secs == 0 {
            return Err(TurnstileError::Config(
                "shipping.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.shipping.max_attempts == 0 {
            return Err(TurnstileError::Config(
                "shipping.max_attempts must be at least 1".to_string(),
            ));
        }
        let name = &self.journal.active_name;
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(TurnstileError::Config(format!(
                "journal.active_name must be a bare file name, got {:?}",
                name
            )));
        }
        Ok(())
    }
}
