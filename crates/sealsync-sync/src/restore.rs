//! Restore of pulled encrypted files
//!
//! After a remote→local pull the watched tree contains `<name>.enc` objects
//! uploaded by the pipeline. Each one is decrypted to `<name>` and removed.
//! Failures are counted and logged; the `.enc` file is left in place so a
//! later run can retry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use walkdir::WalkDir;

use sealsync_core::ports::IFileCipher;

use crate::ENC_SUFFIX;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub restored: usize,
    pub failed: usize,
}

/// Decrypt every `*.enc` file under `root` next to itself
///
/// # Errors
/// Only fails if the blocking walk cannot be joined; per-file failures are
/// reported in the summary.
#[tracing::instrument(skip(cipher), fields(root = %root.display()))]
pub async fn restore_encrypted(root: &Path, cipher: Arc<dyn IFileCipher>) -> Result<RestoreSummary> {
    let root = root.to_path_buf();
    let summary = tokio::task::spawn_blocking(move || restore_tree(&root, cipher.as_ref()))
        .await
        .context("Restore task failed")?;

    info!(
        restored = summary.restored,
        failed = summary.failed,
        "Encrypted files restored"
    );
    Ok(summary)
}

fn restore_tree(root: &Path, cipher: &dyn IFileCipher) -> RestoreSummary {
    let mut summary = RestoreSummary::default();

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry during restore");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let encrypted = entry.path();
        let Some(plain) = decrypted_name(encrypted) else {
            continue;
        };

        if let Err(e) = cipher.decrypt_file(encrypted, &plain) {
            warn!(path = %encrypted.display(), error = %format!("{e:#}"), "Failed to decrypt");
            summary.failed += 1;
            continue;
        }
        if let Err(e) = std::fs::remove_file(encrypted) {
            warn!(path = %encrypted.display(), error = %e, "Decrypted but could not remove encrypted copy");
        }
        summary.restored += 1;
    }

    summary
}

/// `a/b.txt.enc` → `a/b.txt`; `None` for anything else
fn decrypted_name(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(ENC_SUFFIX)?;
    (!stem.is_empty()).then(|| path.with_file_name(stem))
}
