//! End-to-end behaviour of the watch engine and its parts

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use sealsync_core::config::WatchConfig;
use sealsync_core::domain::{SyncDirection, SyncPath, WatchPriority};
use sealsync_crypto::{AesGcmFileCipher, EncryptionKey};
use sealsync_sync::lock::LockManager;
use sealsync_sync::scheduler::{EnqueueOutcome, PriorityWatchScheduler};
use sealsync_sync::watcher::{FsEvent, FsEventKind};

use common::{engine_config, wait_until, RecordingRegistrar, MemoryStorage, RunningEngine};

fn cipher() -> Arc<AesGcmFileCipher> {
    Arc::new(AesGcmFileCipher::new(&EncryptionKey::from_bytes([42u8; 32])))
}

#[tokio::test]
async fn new_file_is_encrypted_uploaded_once_and_cleaned_up() {
    let dir = TempDir::new().unwrap();
    let config = engine_config(dir.path()).build();
    let root = config.sync.root.clone();
    let storage = Arc::new(MemoryStorage::default());
    let running = RunningEngine::start(config, storage.clone(), cipher());

    let file = root.join("brief.txt");
    std::fs::write(&file, b"0123456789").unwrap();
    running
        .events
        .send(FsEvent::new(file.clone(), FsEventKind::Create))
        .await
        .unwrap();
    running
        .events
        .send(FsEvent::new(file.clone(), FsEventKind::Write))
        .await
        .unwrap();

    wait_until(|| storage.copies().len() == 1).await;
    let artifact = root.join("brief.txt.enc");
    wait_until(|| !artifact.exists()).await;
    // Let any stray duplicate pipeline surface before counting
    tokio::time::sleep(Duration::from_millis(200)).await;

    let copies = storage.copies();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].local, artifact);
    assert!(copies[0].local_existed);
    assert_eq!(copies[0].remote, "backup:/Watched_folder/brief.txt.enc");
    assert!(!artifact.exists());
    assert_eq!(std::fs::read(&file).unwrap(), b"0123456789");

    running.stop().await;
}

#[tokio::test]
async fn keyword_directory_is_watched_before_earlier_low_tier_work() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let medium = root.join("a/b/Client_Active_2024");
    let low = root.join("x/y/plain");

    let registrar = Arc::new(RecordingRegistrar::default());
    let scheduler = Arc::new(PriorityWatchScheduler::new(
        SyncPath::new(root.clone()).unwrap(),
        WatchConfig {
            workers: 1,
            ..WatchConfig::default()
        },
        registrar.clone(),
    ));

    assert_eq!(scheduler.classify(&medium), WatchPriority::Medium);
    assert_eq!(scheduler.classify(&low), WatchPriority::Low);
    assert_eq!(
        scheduler.enqueue(&low),
        EnqueueOutcome::Queued(WatchPriority::Low)
    );
    assert_eq!(
        scheduler.enqueue(&medium),
        EnqueueOutcome::Queued(WatchPriority::Medium)
    );

    let cancel = CancellationToken::new();
    let worker = {
        let scheduler = Arc::clone(&scheduler);
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run_worker(0, cancel).await })
    };

    wait_until(|| registrar.added().len() == 2).await;
    cancel.cancel();
    worker.await.unwrap();

    assert_eq!(registrar.added(), vec![medium, low]);
}

#[tokio::test]
async fn lock_left_by_crashed_holder_is_reclaimed() {
    let dir = TempDir::new().unwrap();
    let locks = LockManager::new(dir.path().join("locks"), Duration::from_secs(120));
    let path = Path::new("/a/b.txt");

    std::fs::create_dir_all(locks.dir()).unwrap();
    let three_minutes_ago = Utc::now() - chrono::Duration::minutes(3);
    std::fs::write(locks.marker_path(path), three_minutes_ago.to_rfc3339()).unwrap();

    assert!(locks.acquire(path).await.unwrap());
    // The reclaimed lock is ours now
    assert!(!locks.acquire(path).await.unwrap());
    locks.release(path).await.unwrap();
}

#[tokio::test]
async fn burst_of_deletes_runs_one_reconcile() {
    let dir = TempDir::new().unwrap();
    let config = engine_config(dir.path()).build();
    let root = config.sync.root.clone();
    let storage = Arc::new(MemoryStorage::default());
    let running = RunningEngine::start(config, storage.clone(), cipher());

    let gone = root.join("old.txt");
    for _ in 0..2 {
        running
            .events
            .send(FsEvent::new(gone.clone(), FsEventKind::Remove))
            .await
            .unwrap();
    }

    let reconciler = Arc::clone(running.engine.reconciler());
    wait_until(|| reconciler.is_active(SyncDirection::LocalToRemote)).await;
    wait_until(|| !reconciler.is_active(SyncDirection::LocalToRemote)).await;
    // Past a second debounce window, in case a second run had been scheduled
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(storage.syncs(), vec![SyncDirection::LocalToRemote]);

    running.stop().await;
}

#[tokio::test]
async fn file_deleted_locally_is_not_restored_by_the_next_pull() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(MemoryStorage::default());
    let config = engine_config(dir.path()).build();
    let root = config.sync.root.clone();
    let running = RunningEngine::start(config, storage.clone(), cipher());

    let kept = root.join("kept.txt");
    let deleted = root.join("deleted.txt");
    for file in [&kept, &deleted] {
        std::fs::write(file, b"0123456789").unwrap();
        running
            .events
            .send(FsEvent::new(file.clone(), FsEventKind::Create))
            .await
            .unwrap();
    }
    wait_until(|| {
        storage.has_object("backup:/Watched_folder/kept.txt.enc")
            && storage.has_object("backup:/Watched_folder/deleted.txt.enc")
    })
    .await;

    std::fs::remove_file(&deleted).unwrap();
    running
        .events
        .send(FsEvent::new(deleted.clone(), FsEventKind::Remove))
        .await
        .unwrap();
    wait_until(|| !storage.has_object("backup:/Watched_folder/deleted.txt.enc")).await;
    running.stop().await;

    // Lost while the engine was down; the pull brings it back
    std::fs::remove_file(&kept).unwrap();

    let config = engine_config(dir.path()).sync_initial_pull(true).build();
    let running = RunningEngine::start(config, storage.clone(), cipher());
    wait_until(|| storage.syncs().contains(&SyncDirection::RemoteToLocal)).await;
    wait_until(|| !running.engine.ignoring_local_events()).await;

    assert_eq!(std::fs::read(&kept).unwrap(), b"0123456789");
    assert!(!deleted.exists());
    assert!(!root.join("deleted.txt.enc").exists());

    running.stop().await;
}
