//! Backup management for the live binary.
//!
//! There is exactly one backup slot. Every cycle overwrites it with the
//! binary that is about to be replaced, and nothing ever deletes it, so after
//! a successful update it still holds the previous version for a manual
//! `rollback`.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::core::UpdateError;
use crate::utils::fs::atomic_copy;

const MAX_RESTORE_ATTEMPTS: u32 = 3;
const RESTORE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Copies the live binary to and from the fixed backup slot.
#[derive(Debug, Clone)]
pub struct BackupManager {
    live_path: PathBuf,
    backup_path: PathBuf,
}

impl BackupManager {
    pub fn new(live_path: PathBuf, backup_path: PathBuf) -> Self {
        Self {
            live_path,
            backup_path,
        }
    }

    /// Copy the live binary into the backup slot, replacing any previous
    /// backup. Permissions are preserved.
    ///
    /// # Errors
    ///
    /// [`UpdateError::BackupFailed`] if the live binary cannot be read or the
    /// slot cannot be written. The update must not continue in that case.
    pub async fn create_backup(&self) -> Result<(), UpdateError> {
        info!("Backing up {} to {}", self.live_path.display(), self.backup_path.display());

        let (src, dst) = (self.live_path.clone(), self.backup_path.clone());
        copy_blocking(src, dst).await.map_err(|reason| UpdateError::BackupFailed {
            path: self.live_path.clone(),
            reason,
        })?;

        info!("Backup created successfully");
        Ok(())
    }

    /// Copy the backup over the live binary.
    ///
    /// The copy goes through a sibling temp file and a rename, so it works
    /// while the live binary is executing and a crash mid-restore never
    /// leaves a truncated binary behind. Transient failures are retried.
    pub async fn restore_backup(&self) -> Result<(), UpdateError> {
        let failed = |reason: String| UpdateError::RollbackFailed {
            backup: self.backup_path.clone(),
            reason,
        };

        if !self.backup_path.exists() {
            return Err(failed("no backup present".to_string()));
        }

        warn!("Restoring {} from {}", self.live_path.display(), self.backup_path.display());

        let mut attempt = 1;
        loop {
            let (src, dst) = (self.backup_path.clone(), self.live_path.clone());
            match copy_blocking(src, dst).await {
                Ok(()) => {
                    info!("Successfully restored from backup");
                    return Ok(());
                }
                Err(e) if attempt < MAX_RESTORE_ATTEMPTS => {
                    warn!("Restore attempt {} failed: {}. Retrying...", attempt, e);
                    tokio::time::sleep(RESTORE_RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(failed(format!("{e} (after {MAX_RESTORE_ATTEMPTS} attempts)")));
                }
            }
        }
    }

    pub fn backup_exists(&self) -> bool {
        self.backup_path.exists()
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn live_path(&self) -> &Path {
        &self.live_path
    }
}

async fn copy_blocking(src: PathBuf, dst: PathBuf) -> Result<(), String> {
    tokio::task::spawn_blocking(move || atomic_copy(&src, &dst))
        .await
        .map_err(|e| format!("copy task failed: {e}"))?
        .map_err(|e| format!("{e:#}"))
}
