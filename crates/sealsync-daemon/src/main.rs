//! SealSync Daemon - Background watch-and-sync service
//!
//! This binary runs as a user service and:
//! - Loads and validates the YAML configuration
//! - Loads the encryption key and checks the rclone remote is reachable
//! - Pulls the remote baseline and restores encrypted files
//! - Watches the local tree, uploading encrypted copies of changed files
//! - Shuts down gracefully on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! All work happens inside [`start_watcher`], which runs until the shared
//! `CancellationToken` is cancelled by the signal handler.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use sealsync_core::config::{Config, LogFormat, LoggingConfig};
use sealsync_core::ports::IRemoteStorage;
use sealsync_crypto::{AesGcmFileCipher, EncryptionKey};
use sealsync_rclone::RcloneStorage;
use sealsync_sync::start_watcher;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Replace a leading `~` with the home directory
fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Expand every user-supplied path in place
fn expand_paths(config: &mut Config) {
    config.sync.root = expand_tilde(&config.sync.root);
    config.locks.dir = expand_tilde(&config.locks.dir);
    if let Some(file) = config.logging.file.as_mut() {
        *file = expand_tilde(file);
    }
}

/// Filter from `RUST_LOG` when it parses, else from `logging.level`
fn env_filter(rust_log: Option<&str>, level: &str) -> Result<EnvFilter> {
    let from_env = rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok());
    match from_env {
        Some(filter) => Ok(filter),
        None => EnvFilter::try_new(level).with_context(|| format!("Invalid log level: {level}")),
    }
}

/// Install the global subscriber
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let env_filter = env_filter(rust_log.as_deref(), &logging.level)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    let installed = match (logging.format, &logging.file) {
        (LogFormat::Json, Some(path)) => builder
            .json()
            .with_writer(Mutex::new(open_log_file(path)?))
            .try_init(),
        (LogFormat::Json, None) => builder.json().try_init(),
        (LogFormat::Pretty, Some(path)) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(open_log_file(path)?))
            .try_init(),
        (LogFormat::Pretty, None) => builder.try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to initialise logging: {e}"))
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

async fn run(config: Config, shutdown: CancellationToken) -> Result<()> {
    let key = EncryptionKey::from_material(&config.crypto.key, config.crypto.key_format)
        .context("Failed to load encryption key")?;
    let cipher = Arc::new(AesGcmFileCipher::new(&key));

    let storage = Arc::new(RcloneStorage::new(&config.transfer, config.sync.remote.clone()));
    match storage.test_connection().await {
        Ok(()) => info!(remote = %storage.remote(), "Remote reachable"),
        Err(e) => warn!(
            remote = %storage.remote(),
            error = %e,
            "Remote not reachable, continuing; transfers will retry"
        ),
    }

    start_watcher(shutdown, config, storage, cipher).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let mut config = Config::load_or_default(&config_path)?;
    expand_paths(&mut config);

    init_tracing(&config.logging)?;
    info!(config_path = %config_path.display(), "SealSync daemon starting (sealsyncd)");

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!(%problem, "Invalid configuration");
        }
        anyhow::bail!(
            "Configuration at {} has {} error(s)",
            config_path.display(),
            problems.len()
        );
    }

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let result = run(config, shutdown_token).await;

    match &result {
        Ok(()) => info!("SealSync daemon shut down gracefully"),
        Err(e) => error!(error = %format!("{e:#}"), "SealSync daemon exiting with error"),
    }

    result
}
