//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sealsync_core::config::{Config, ConfigBuilder};
use sealsync_core::ports::IFileCipher;
use sealsync_sync::scheduler::WatchRegistrar;
use sealsync_sync::watcher::FsEvent;
use sealsync_sync::WatchEngine;

pub use sealsync_sync::testing::{MemoryStorage, RecordingRegistrar};

/// Fast-cadence engine config rooted at `<base>/vault`
pub fn engine_config(base: &Path) -> ConfigBuilder {
    let root = base.join("vault");
    std::fs::create_dir_all(&root).unwrap();
    ConfigBuilder::new()
        .sync_root(root)
        .sync_remote("backup")
        .sync_initial_pull(false)
        .sync_debounce_delay(1)
        .sync_reconcile_interval(0)
        .stability_interval_ms(10)
        .locks_dir(base.join("locks"))
        .locks_poll_interval_ms(10)
        .crypto_key("integration-test-passphrase")
}

/// A running engine fed by an in-memory event channel
pub struct RunningEngine {
    pub engine: Arc<WatchEngine>,
    pub events: mpsc::Sender<FsEvent>,
    pub registrar: Arc<RecordingRegistrar>,
    pub cancel: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
    _errors: mpsc::Sender<notify::Error>,
}

impl RunningEngine {
    pub fn start(
        config: Config,
        storage: Arc<MemoryStorage>,
        cipher: Arc<dyn IFileCipher>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let engine = Arc::new(WatchEngine::new(config, storage, cipher, cancel.clone()).unwrap());
        let registrar = Arc::new(RecordingRegistrar::default());
        let (events, event_rx) = mpsc::channel(64);
        let (errors, error_rx) = mpsc::channel(8);

        let handle = {
            let engine = Arc::clone(&engine);
            let registrar: Arc<dyn WatchRegistrar> = registrar.clone();
            tokio::spawn(async move { engine.run_with(registrar, event_rx, error_rx).await })
        };

        Self {
            engine,
            events,
            registrar,
            cancel,
            handle,
            _errors: errors,
        }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("engine did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Poll `check` every 10ms for up to 5s
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
