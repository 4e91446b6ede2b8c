//! Rendezvous endpoint naming and artifact cleanup.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::{AppError, Result};

/// Socket path for a canvas instance: `<socket_dir>/canvas-<instance_id>.sock`.
#[must_use]
pub fn endpoint_path(socket_dir: &Path, instance_id: &str) -> PathBuf {
    socket_dir.join(format!("canvas-{instance_id}.sock"))
}

/// Remove a leftover socket file. A missing file is not an error.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the path exists but cannot be removed, or if
/// it names a directory.
pub fn remove_artifact(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Err(AppError::Ipc(format!(
            "endpoint {} is a directory",
            path.display()
        )));
    }

    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Ipc(format!(
            "failed to remove stale endpoint {}: {err}",
            path.display()
        ))),
    }
}
