//! rclone process execution
//!
//! Every invocation is bounded by a timeout and the child is killed if the
//! future is dropped. Failures are classified from stderr so callers can
//! tell a missing path apart from a broken transport.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use sealsync_core::ports::{StorageError, TransferOutput};

/// stderr fragments rclone emits when a path does not exist
const NOT_FOUND_MARKERS: &[&str] = &[
    "directory not found",
    "object not found",
    "file not found",
    "doesn't exist",
];

/// stderr fragments for a remote missing from the rclone config, which
/// would otherwise read like a missing path
const CONFIG_MARKERS: &[&str] = &["didn't find section", "Couldn't find section"];

/// Run `binary args...` and capture its output
///
/// `operation` names the call in errors and logs.
pub async fn run(
    binary: &str,
    operation: &str,
    args: &[String],
    timeout: Duration,
) -> Result<TransferOutput, StorageError> {
    debug!(binary, operation, ?args, "Running transfer command");

    let mut command = Command::new(binary);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(StorageError::Io(format!("failed to run {binary}: {e}")));
        }
        Err(_) => {
            warn!(operation, ?timeout, "Transfer command timed out");
            return Err(StorageError::Timeout {
                operation: operation.to_string(),
                after: timeout,
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        return Ok(TransferOutput { stdout, stderr });
    }

    Err(classify_failure(
        operation,
        &stderr,
        &output.status.to_string(),
    ))
}

/// Map a failed call's stderr to a [`StorageError`]
#[must_use]
pub fn classify_failure(operation: &str, stderr: &str, status: &str) -> StorageError {
    let trimmed = stderr.trim();

    let config_problem = CONFIG_MARKERS.iter().any(|m| trimmed.contains(m));
    if !config_problem && NOT_FOUND_MARKERS.iter().any(|m| trimmed.contains(m)) {
        return StorageError::NotFound(trimmed.to_string());
    }

    let message = if trimmed.is_empty() {
        status.to_string()
    } else {
        trimmed.to_string()
    };
    StorageError::Transport {
        operation: operation.to_string(),
        message,
    }
}
