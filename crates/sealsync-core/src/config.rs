//! Configuration module for SealSync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Environment variable that overrides [`Config::default_path`].
pub const CONFIG_PATH_ENV: &str = "SEALSYNC_CONFIG";

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for SealSync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub watch: WatchConfig,
    pub stability: StabilityConfig,
    pub locks: LockConfig,
    pub retry: RetryConfig,
    pub transfer: TransferConfig,
    pub crypto: CryptoConfig,
    pub logging: LoggingConfig,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root directory that is watched and mirrored.
    pub root: PathBuf,
    /// Name of the configured rclone remote (without the trailing `:`).
    pub remote: String,
    /// Folder on the remote that mirrors `root`.
    pub remote_folder: String,
    /// Seconds of quiet before a batch reconciliation starts (debounce).
    pub debounce_delay: u64,
    /// Seconds between periodic local→remote reconciliations (0 disables).
    pub reconcile_interval: u64,
    /// Drop every local filesystem event (set while pulling from the remote).
    pub ignore_local_events: bool,
    /// Run a remote→local baseline pull before watching.
    pub initial_pull: bool,
    /// Upper bound on concurrently running upload pipelines (0 = unbounded).
    pub max_concurrent_uploads: usize,
    /// Seconds within which a repeated event for an in-flight path is a duplicate.
    pub duplicate_window: u64,
    /// Seconds after which a pending-operation entry is considered abandoned.
    pub pending_stale_after: u64,
    /// Seconds between sweeps of abandoned pending-operation entries.
    pub pending_sweep_interval: u64,
    /// Extra glob patterns excluded from bulk synchronization.
    pub exclude: Vec<String>,
}

/// Directory watch registration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Deepest directory level (below the root) that receives a watch.
    pub max_depth: usize,
    /// Number of workers draining the priority queues.
    pub workers: usize,
    /// Capacity of the high-priority queue.
    pub high_capacity: usize,
    /// Capacity of the medium-priority queue.
    pub medium_capacity: usize,
    /// Capacity of the low-priority queue.
    pub low_capacity: usize,
    /// Pause (ms) before registering a medium-priority directory.
    pub medium_delay_ms: u64,
    /// Pause (ms) before registering a low-priority directory.
    pub low_delay_ms: u64,
    /// Attempts per watch registration before giving up.
    pub add_attempts: u32,
    /// Lower-case name fragments that promote a directory to medium priority.
    pub keywords: Vec<String>,
}

/// Write-stability detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Milliseconds between two size polls.
    pub interval_ms: u64,
    /// Tries multiplier; the detector gives up after `tries * 3` polls.
    pub tries: u32,
}

/// Cross-process file lock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Directory holding lock marker files.
    pub dir: PathBuf,
    /// Seconds after which a marker is stale and may be reclaimed.
    pub stale_after: u64,
    /// Seconds a pipeline waits for a lock before giving up.
    pub wait_timeout: u64,
    /// Milliseconds between acquisition attempts.
    pub poll_interval_ms: u64,
}

/// Retry/backoff settings shared by uploads and batch syncs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per single-file upload.
    pub upload_attempts: u32,
    /// Attempts per batch synchronization.
    pub sync_attempts: u32,
    /// Ceiling (seconds) for a single backoff delay.
    pub max_delay: u64,
}

/// External transfer tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Path or name of the rclone binary.
    pub binary: String,
    /// Parallel file transfers for bulk syncs.
    pub transfers: u32,
    /// Parallel checkers for bulk syncs.
    pub checkers: u32,
    /// Seconds before a bulk sync or single copy is killed.
    pub bulk_timeout: u64,
    /// Seconds before a tree listing is killed.
    pub list_timeout: u64,
    /// Seconds before a single-object verification or connection test is killed.
    pub verify_timeout: u64,
    /// Recursion depth of the remote listing used to verify a bulk sync.
    pub verify_max_depth: u32,
}

/// How `crypto.key` is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFormat {
    /// Raw 32 bytes, else base64 of 32 bytes, else a passphrase.
    #[default]
    Auto,
    /// The key string itself is the 32-byte key.
    Raw,
    /// Standard base64 encoding of 32 bytes.
    Base64,
    /// Any string; the key is its SHA-256 digest.
    Passphrase,
}

/// Encryption key settings.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Secret key material.
    pub key: String,
    /// Interpretation of `key`.
    pub key_format: KeyFormat,
}

impl std::fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("key", &"<redacted>")
            .field("key_format", &self.key_format)
            .finish()
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Optional log file; stderr when unset.
    pub file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path`, or [`Config::default`] when no file exists there.
    ///
    /// # Errors
    /// A file that exists but cannot be read or parsed is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// `$SEALSYNC_CONFIG` when set, otherwise
    /// `$XDG_CONFIG_HOME/sealsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("sealsync")
            .join("config.yaml")
    }

    /// Remote root in rclone syntax, e.g. `backup:/Watched_folder`.
    pub fn remote_root(&self) -> String {
        format!(
            "{}:/{}",
            self.sync.remote,
            self.sync.remote_folder.trim_matches('/')
        )
    }
}

// ---------------------------------------------------------------------------
// Duration accessors
// ---------------------------------------------------------------------------

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_delay)
    }

    /// `None` when periodic reconciliation is disabled.
    pub fn reconcile_every(&self) -> Option<Duration> {
        (self.reconcile_interval > 0).then(|| Duration::from_secs(self.reconcile_interval))
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_secs(self.duplicate_window)
    }

    pub fn pending_stale_after(&self) -> Duration {
        Duration::from_secs(self.pending_stale_after)
    }

    pub fn pending_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.pending_sweep_interval)
    }
}

impl LockConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl TransferConfig {
    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_timeout)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout)
    }
}

// ---------------------------------------------------------------------------
// Config::default()
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("SealSync"),
            remote: String::new(),
            remote_folder: "Watched_folder".to_string(),
            debounce_delay: 10,
            reconcile_interval: 1800,
            ignore_local_events: false,
            initial_pull: true,
            max_concurrent_uploads: 8,
            duplicate_window: 5,
            pending_stale_after: 600,
            pending_sweep_interval: 300,
            exclude: Vec::new(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            workers: 4,
            high_capacity: 1000,
            medium_capacity: 3000,
            low_capacity: 6000,
            medium_delay_ms: 10,
            low_delay_ms: 50,
            add_attempts: 3,
            keywords: ["active", "current", "client", "matter", "case", "urgent"]
                .iter()
                .map(|k| (*k).to_string())
                .collect(),
        }
    }
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            tries: 3,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("sealsync")
                .join(".synclocks"),
            stale_after: 120,
            wait_timeout: 30,
            poll_interval_ms: 500,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            upload_attempts: 3,
            sync_attempts: 3,
            max_delay: 30,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            binary: "rclone".to_string(),
            transfers: 4,
            checkers: 8,
            bulk_timeout: 600,
            list_timeout: 60,
            verify_timeout: 30,
            verify_max_depth: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.remote"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        let root_str = self.sync.root.to_string_lossy();
        if root_str.is_empty() {
            errors.push(ValidationError {
                field: "sync.root".into(),
                message: "must not be empty".into(),
            });
        } else if !root_str.starts_with('~') {
            // Tilde paths are expanded by the daemon before use.
            if !self.sync.root.is_absolute() {
                errors.push(ValidationError {
                    field: "sync.root".into(),
                    message: format!("must be an absolute path: {}", self.sync.root.display()),
                });
            } else if !self.sync.root.is_dir() {
                errors.push(ValidationError {
                    field: "sync.root".into(),
                    message: format!("directory does not exist: {}", self.sync.root.display()),
                });
            }
        }
        if self.sync.remote.trim().is_empty() {
            errors.push(ValidationError {
                field: "sync.remote".into(),
                message: "must name a configured remote".into(),
            });
        }
        if self.sync.remote.contains(':') {
            errors.push(ValidationError {
                field: "sync.remote".into(),
                message: "must not contain ':'".into(),
            });
        }
        positive(&mut errors, "sync.debounce_delay", self.sync.debounce_delay);
        positive(&mut errors, "sync.duplicate_window", self.sync.duplicate_window);
        positive(
            &mut errors,
            "sync.pending_stale_after",
            self.sync.pending_stale_after,
        );
        positive(
            &mut errors,
            "sync.pending_sweep_interval",
            self.sync.pending_sweep_interval,
        );

        // --- watch ---
        positive(&mut errors, "watch.max_depth", self.watch.max_depth as u64);
        positive(&mut errors, "watch.workers", self.watch.workers as u64);
        positive(&mut errors, "watch.high_capacity", self.watch.high_capacity as u64);
        positive(
            &mut errors,
            "watch.medium_capacity",
            self.watch.medium_capacity as u64,
        );
        positive(&mut errors, "watch.low_capacity", self.watch.low_capacity as u64);
        positive(&mut errors, "watch.add_attempts", u64::from(self.watch.add_attempts));

        // --- stability ---
        positive(&mut errors, "stability.interval_ms", self.stability.interval_ms);
        positive(&mut errors, "stability.tries", u64::from(self.stability.tries));

        // --- locks ---
        if self.locks.dir.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "locks.dir".into(),
                message: "must not be empty".into(),
            });
        }
        positive(&mut errors, "locks.stale_after", self.locks.stale_after);
        positive(&mut errors, "locks.wait_timeout", self.locks.wait_timeout);
        positive(&mut errors, "locks.poll_interval_ms", self.locks.poll_interval_ms);

        // --- retry ---
        positive(&mut errors, "retry.upload_attempts", u64::from(self.retry.upload_attempts));
        positive(&mut errors, "retry.sync_attempts", u64::from(self.retry.sync_attempts));
        positive(&mut errors, "retry.max_delay", self.retry.max_delay);

        // --- transfer ---
        if self.transfer.binary.trim().is_empty() {
            errors.push(ValidationError {
                field: "transfer.binary".into(),
                message: "must not be empty".into(),
            });
        }
        positive(&mut errors, "transfer.transfers", u64::from(self.transfer.transfers));
        positive(&mut errors, "transfer.checkers", u64::from(self.transfer.checkers));
        positive(&mut errors, "transfer.bulk_timeout", self.transfer.bulk_timeout);
        positive(&mut errors, "transfer.list_timeout", self.transfer.list_timeout);
        positive(&mut errors, "transfer.verify_timeout", self.transfer.verify_timeout);

        // --- crypto ---
        if self.crypto.key.is_empty() {
            errors.push(ValidationError {
                field: "crypto.key".into(),
                message: "encryption key material is required".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use sealsync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .sync_root(PathBuf::from("/home/user/Vault"))
///     .sync_remote("backup")
///     .crypto_key("correct horse battery staple")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_root(mut self, root: PathBuf) -> Self {
        self.config.sync.root = root;
        self
    }

    pub fn sync_remote(mut self, remote: impl Into<String>) -> Self {
        self.config.sync.remote = remote.into();
        self
    }

    pub fn sync_remote_folder(mut self, folder: impl Into<String>) -> Self {
        self.config.sync.remote_folder = folder.into();
        self
    }

    pub fn sync_debounce_delay(mut self, seconds: u64) -> Self {
        self.config.sync.debounce_delay = seconds;
        self
    }

    pub fn sync_reconcile_interval(mut self, seconds: u64) -> Self {
        self.config.sync.reconcile_interval = seconds;
        self
    }

    pub fn sync_initial_pull(mut self, enabled: bool) -> Self {
        self.config.sync.initial_pull = enabled;
        self
    }

    pub fn sync_max_concurrent_uploads(mut self, n: usize) -> Self {
        self.config.sync.max_concurrent_uploads = n;
        self
    }

    pub fn sync_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.config.sync.exclude.push(pattern.into());
        self
    }

    // --- watch ---

    pub fn watch_max_depth(mut self, depth: usize) -> Self {
        self.config.watch.max_depth = depth;
        self
    }

    pub fn watch_workers(mut self, n: usize) -> Self {
        self.config.watch.workers = n;
        self
    }

    // --- stability ---

    pub fn stability_interval_ms(mut self, ms: u64) -> Self {
        self.config.stability.interval_ms = ms;
        self
    }

    pub fn stability_tries(mut self, tries: u32) -> Self {
        self.config.stability.tries = tries;
        self
    }

    // --- locks ---

    pub fn locks_dir(mut self, dir: PathBuf) -> Self {
        self.config.locks.dir = dir;
        self
    }

    pub fn locks_wait_timeout(mut self, seconds: u64) -> Self {
        self.config.locks.wait_timeout = seconds;
        self
    }

    pub fn locks_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.locks.poll_interval_ms = ms;
        self
    }

    // --- retry ---

    pub fn retry_upload_attempts(mut self, n: u32) -> Self {
        self.config.retry.upload_attempts = n;
        self
    }

    pub fn retry_sync_attempts(mut self, n: u32) -> Self {
        self.config.retry.sync_attempts = n;
        self
    }

    // --- transfer ---

    pub fn transfer_binary(mut self, binary: impl Into<String>) -> Self {
        self.config.transfer.binary = binary.into();
        self
    }

    // --- crypto ---

    pub fn crypto_key(mut self, key: impl Into<String>) -> Self {
        self.config.crypto.key = key.into();
        self
    }

    pub fn crypto_key_format(mut self, format: KeyFormat) -> Self {
        self.config.crypto.key_format = format;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: LogFormat) -> Self {
        self.config.logging.format = format;
        self
    }

    pub fn logging_file(mut self, file: PathBuf) -> Self {
        self.config.logging.file = Some(file);
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
