//! Atomic replacement of the live binary.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::core::UpdateError;
use crate::utils::fs::{atomic_copy, is_cross_device};

/// Moves a verified staging file over the live binary in one step.
#[derive(Debug, Clone)]
pub struct AtomicInstaller {
    live_path: PathBuf,
}

impl AtomicInstaller {
    pub fn new(live_path: PathBuf) -> Self {
        Self {
            live_path,
        }
    }

    pub fn live_path(&self) -> &Path {
        &self.live_path
    }

    /// Mark `staged` executable and rename it onto the live path.
    ///
    /// When the staging directory sits on a different filesystem the rename
    /// is replaced by a copy into a sibling of the live binary followed by a
    /// rename, which keeps the swap atomic. On failure the staging file is
    /// removed and the live binary is left exactly as it was.
    pub async fn install(&self, staged: &Path) -> Result<(), UpdateError> {
        let result = self.swap(staged).await;
        if let Err(e) = &result {
            warn!("Install failed, live binary untouched: {}", e);
            if let Err(remove_err) = fs::remove_file(staged).await {
                debug!("Could not remove {}: {}", staged.display(), remove_err);
            }
        }
        result
    }

    async fn swap(&self, staged: &Path) -> Result<(), UpdateError> {
        let failed = |reason: String| UpdateError::InstallFailed {
            staged: staged.to_path_buf(),
            live: self.live_path.clone(),
            reason,
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(staged, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| failed(format!("cannot make executable: {e}")))?;
        }

        info!("Installing {} over {}", staged.display(), self.live_path.display());

        match fs::rename(staged, &self.live_path).await {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) => {
                debug!("Staging is on another filesystem, copying next to the live binary");
                let (src, dst) = (staged.to_path_buf(), self.live_path.clone());
                tokio::task::spawn_blocking(move || atomic_copy(&src, &dst))
                    .await
                    .map_err(|e| failed(format!("copy task failed: {e}")))?
                    .map_err(|e| failed(format!("{e:#}")))?;
                let _ = fs::remove_file(staged).await;
                Ok(())
            }
            Err(e) => Err(failed(e.to_string())),
        }
    }
}
