//! Cross-process lock on the update working directory.
//!
//! The in-process single-flight flag rejects overlapping requests inside one
//! agent. This lock additionally serialises cycles started by separate
//! processes, such as `configflow-agent update` run by hand while the daemon
//! is applying a pushed update, so the two never write the staging or backup
//! slots at the same time.

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive file lock held for the duration of one update cycle.
///
/// Released on drop.
pub struct UpdateLock {
    file: File,
    path: PathBuf,
}

impl UpdateLock {
    /// Block until the lock at `lock_path` is acquired, creating the
    /// directory and lock file as needed.
    pub async fn acquire(lock_path: &Path) -> Result<Self> {
        if let Some(dir) = lock_path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    anyhow::anyhow!("Permission denied: cannot create {}", dir.display())
                } else if e.raw_os_error() == Some(28) {
                    // ENOSPC
                    anyhow::anyhow!("No space left on device to create {}", dir.display())
                } else {
                    anyhow::anyhow!("Failed to create directory {}: {}", dir.display(), e)
                }
            })?;
        }

        let path = lock_path.to_path_buf();
        let path_clone = path.clone();

        let file = tokio::task::spawn_blocking(move || -> Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path_clone)
                .with_context(|| format!("Failed to open lock file: {}", path_clone.display()))?;

            file.lock_exclusive()
                .with_context(|| format!("Failed to lock {}", path_clone.display()))?;

            Ok(file)
        })
        .await
        .context("Failed to spawn blocking task for lock acquisition")??;

        tracing::debug!(target: "upgrade", "Acquired update lock {}", path.display());

        Ok(Self {
            file,
            path,
        })
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        #[allow(unstable_name_collisions)]
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}
