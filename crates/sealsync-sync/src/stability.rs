//! Write-stability detection
//!
//! A file is considered stable once its size reads the same on three
//! consecutive polls. After `tries × 3` polls the detector stops waiting and
//! reports success anyway; a file that keeps growing is uploaded as-is
//! rather than blocking its pipeline forever.

use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use sealsync_core::config::StabilityConfig;

use crate::SyncError;

/// Polls a file's size until it stops changing
#[derive(Debug, Clone, Copy)]
pub struct StabilityDetector {
    interval: Duration,
    tries: u32,
}

impl StabilityDetector {
    #[must_use]
    pub fn new(interval: Duration, tries: u32) -> Self {
        Self { interval, tries }
    }

    #[must_use]
    pub fn from_config(config: &StabilityConfig) -> Self {
        Self::new(Duration::from_millis(config.interval_ms), config.tries)
    }

    /// Wait until `path` stops growing, or the poll budget runs out
    ///
    /// # Errors
    /// Returns the stat error if the file cannot be read, or
    /// `SyncError::Cancelled` on shutdown.
    pub async fn wait_for_stable(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let mut last_size: Option<u64> = None;
        let mut unchanged = 0u32;

        for poll in 0..self.tries.saturating_mul(3) {
            let size = tokio::fs::metadata(path).await?.len();

            if last_size == Some(size) {
                unchanged += 1;
                if unchanged >= 2 {
                    debug!(path = %path.display(), size, poll, "File is stable");
                    return Ok(());
                }
            } else {
                unchanged = 0;
                last_size = Some(size);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        debug!(path = %path.display(), "File still changing, proceeding anyway");
        Ok(())
    }
}
