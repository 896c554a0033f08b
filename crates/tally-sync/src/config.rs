//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_DEVICE_ID=abc-123                                            │
//! │     TALLY_MAX_ATTEMPTS=3                                               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tally/sync.toml (Linux)                                  │
//! │     ~/Library/Application Support/com.tally.pos/sync.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     3 attempts, 5s first retry, 10s sale window                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Register 1"
//!
//! [queue]
//! database_path = "/var/lib/tally/queue.db"
//!
//! [retry]
//! max_attempts = 3
//! initial_backoff_ms = 5000
//! max_backoff_secs = 60
//! multiplier = 2.0
//! randomization_factor = 0.5
//!
//! [reconcile]
//! pending_ttl_secs = 60
//! sale_window_secs = 10
//! ```

use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tally_core::{KeyPolicy, DEFAULT_SALE_WINDOW_SECS, MAX_SALE_WINDOW_SECS, MAX_SYNC_ATTEMPTS};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Register 1").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "POS Terminal".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Queue Settings
// =============================================================================

/// Where and under which keys the queue is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Key holding the active operation list.
    #[serde(default = "default_queue_key")]
    pub queue_key: String,

    /// Key holding operations that exhausted their retries.
    #[serde(default = "default_failed_key")]
    pub failed_key: String,

    /// Key holding the last clean drain timestamp.
    #[serde(default = "default_last_sync_key")]
    pub last_sync_key: String,

    /// SQLite file for the Durable Queue Store. In-memory when absent.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_queue_key() -> String {
    "pendingOperations".to_string()
}

fn default_failed_key() -> String {
    "failedOperations".to_string()
}

fn default_last_sync_key() -> String {
    "lastSyncTime".to_string()
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            queue_key: default_queue_key(),
            failed_key: default_failed_key(),
            last_sync_key: default_last_sync_key(),
            database_path: None,
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Retry budget and the backoff between flush passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts per operation before it moves to the failed list.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry pass (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound for a single retry delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Growth factor between consecutive retry delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter: each delay is drawn from `d * (1 ± randomization_factor)`.
    #[serde(default = "default_randomization")]
    pub randomization_factor: f64,
}

fn default_max_attempts() -> u32 {
    MAX_SYNC_ATTEMPTS
}
fn default_initial_backoff() -> u64 {
    5000
}
fn default_max_backoff() -> u64 {
    60
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_randomization() -> f64 {
    0.5
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            multiplier: default_multiplier(),
            randomization_factor: default_randomization(),
        }
    }
}

impl RetrySettings {
    /// Builds the backoff schedule used between retry passes.
    ///
    /// Never gives up on its own: the per-operation attempt cap is what
    /// bounds retries.
    pub fn backoff(&self) -> ExponentialBackoff {
        let initial = Duration::from_millis(self.initial_backoff_ms);
        ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            max_interval: Duration::from_secs(self.max_backoff_secs),
            multiplier: self.multiplier,
            randomization_factor: self.randomization_factor,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

// =============================================================================
// Reconcile Settings
// =============================================================================

/// Tunables for the reconciler and duplicate guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Pending ids with no queued operation are released after this long.
    #[serde(default = "default_pending_ttl")]
    pub pending_ttl_secs: u64,

    /// How often the worker looks for stale pending ids.
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,

    /// Width of the sale uniqueness bucket.
    #[serde(default = "default_sale_window")]
    pub sale_window_secs: i64,
}

fn default_pending_ttl() -> u64 {
    60
}
fn default_maintenance_interval() -> u64 {
    60
}
fn default_sale_window() -> i64 {
    DEFAULT_SALE_WINDOW_SECS
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        ReconcileSettings {
            pending_ttl_secs: default_pending_ttl(),
            maintenance_interval_secs: default_maintenance_interval(),
            sale_window_secs: default_sale_window(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub reconcile: ReconcileSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        if self.retry.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }

        if self.retry.multiplier < 1.0 {
            return Err(SyncError::InvalidConfig(
                "multiplier must be at least 1.0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.randomization_factor) {
            return Err(SyncError::InvalidConfig(
                "randomization_factor must be between 0 and 1".into(),
            ));
        }

        if self.reconcile.sale_window_secs <= 0 {
            return Err(SyncError::InvalidConfig(
                "sale_window_secs must be greater than 0".into(),
            ));
        }

        if self.reconcile.sale_window_secs > MAX_SALE_WINDOW_SECS {
            return Err(SyncError::InvalidConfig(format!(
                "sale_window_secs must be at most {MAX_SALE_WINDOW_SECS}"
            )));
        }

        if self.reconcile.maintenance_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "maintenance_interval_secs must be greater than 0".into(),
            ));
        }

        let keys = [
            &self.queue.queue_key,
            &self.queue.failed_key,
            &self.queue.last_sync_key,
        ];
        if keys.iter().any(|k| k.is_empty()) {
            return Err(SyncError::InvalidConfig("queue keys must not be empty".into()));
        }
        if keys[0] == keys[1] || keys[0] == keys[2] || keys[1] == keys[2] {
            return Err(SyncError::InvalidConfig("queue keys must be distinct".into()));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("TALLY_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(name) = std::env::var("TALLY_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(path) = std::env::var("TALLY_DATABASE_PATH") {
            debug!(path = %path, "Overriding queue database path from environment");
            self.queue.database_path = Some(PathBuf::from(path));
        }

        if let Ok(attempts) = std::env::var("TALLY_MAX_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(n) => self.retry.max_attempts = n,
                Err(_) => warn!(value = %attempts, "Ignoring invalid TALLY_MAX_ATTEMPTS"),
            }
        }

        if let Ok(ms) = std::env::var("TALLY_INITIAL_BACKOFF_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                self.retry.initial_backoff_ms = ms;
            }
        }

        if let Ok(secs) = std::env::var("TALLY_SALE_WINDOW_SECS") {
            if let Ok(secs) = secs.parse::<i64>() {
                self.reconcile.sale_window_secs = secs;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tally", "pos")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns the key derivation policy.
    pub fn key_policy(&self) -> KeyPolicy {
        KeyPolicy {
            sale_window_secs: self.reconcile.sale_window_secs,
        }
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.reconcile.pending_ttl_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile.maintenance_interval_secs)
    }
}
