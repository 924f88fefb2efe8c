//! Recovery after a failed restart.

use tracing::{error, info, warn};

use crate::core::UpdateError;
use crate::service::RestartController;
use crate::upgrade::backup::BackupManager;

/// Result of a rollback that managed to put the old binary back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Old binary restored and the service is active again.
    Recovered,
    /// Old binary restored but the service did not come back. The host is no
    /// worse off than before the update, yet needs attention.
    Degraded(UpdateError),
}

/// Restores the backup and restarts once.
#[derive(Clone)]
pub struct RollbackController {
    backup: BackupManager,
    restart: RestartController,
}

impl RollbackController {
    pub fn new(backup: BackupManager, restart: RestartController) -> Self {
        Self {
            backup,
            restart,
        }
    }

    /// Put the backup back over the live binary and restart `service` once.
    ///
    /// Never retries the restart, so a binary that cannot start does not
    /// trigger a loop.
    ///
    /// # Errors
    ///
    /// [`UpdateError::RollbackFailed`] when the backup cannot be restored.
    /// The live binary is then in an unknown state and the error is logged
    /// with `alert = true`.
    pub async fn rollback(&self, service: &str) -> Result<RollbackOutcome, UpdateError> {
        warn!("Rolling back {} to the previous binary", service);

        if let Err(e) = self.backup.restore_backup().await {
            error!(alert = true, kind = e.kind(), "Rollback failed, agent binary may be unusable: {}", e);
            return Err(e);
        }

        match self.restart.restart_and_verify(service).await {
            Ok(_) => {
                info!("Rollback complete, {} is running the previous binary", service);
                Ok(RollbackOutcome::Recovered)
            }
            Err(e) => {
                error!(
                    alert = true,
                    kind = e.kind(),
                    "Previous binary restored but {} did not come back: {}",
                    service,
                    e
                );
                Ok(RollbackOutcome::Degraded(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{CommandOutput, StatusResolver};
    use crate::test_utils::FakeRunner;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn controller(temp: &TempDir, runner: FakeRunner) -> (Arc<FakeRunner>, RollbackController) {
        let runner = Arc::new(runner);
        let backup = BackupManager::new(temp.path().join("agent"), temp.path().join("agent.bak"));
        let restart = RestartController::new(StatusResolver::with_default_chain(runner.clone()))
            .with_grace_period(Duration::ZERO);
        (runner, RollbackController::new(backup, restart))
    }

    #[tokio::test]
    async fn test_rollback_restores_and_restarts() {
        let temp = TempDir::new().unwrap();
        let (runner, ctl) = controller(&temp, FakeRunner::systemd_healthy("agent"));
        std::fs::write(temp.path().join("agent.bak"), b"v1").unwrap();
        std::fs::write(temp.path().join("agent"), b"v2").unwrap();

        assert_eq!(ctl.rollback("agent").await.unwrap(), RollbackOutcome::Recovered);
        assert_eq!(std::fs::read(temp.path().join("agent")).unwrap(), b"v1");
        assert_eq!(runner.count("systemctl restart"), 1);
    }

    #[tokio::test]
    async fn test_failed_restart_after_rollback_is_degraded() {
        let temp = TempDir::new().unwrap();
        let (runner, ctl) = controller(
            &temp,
            FakeRunner::new()
                .with_tool("systemctl")
                .respond("systemctl restart agent", CommandOutput::failed(1, "")),
        );
        std::fs::write(temp.path().join("agent.bak"), b"v1").unwrap();
        std::fs::write(temp.path().join("agent"), b"v2").unwrap();

        let outcome = ctl.rollback("agent").await.unwrap();

        assert!(matches!(outcome, RollbackOutcome::Degraded(UpdateError::RestartCommandFailed { .. })));
        assert_eq!(std::fs::read(temp.path().join("agent")).unwrap(), b"v1");
        // Exactly one restart attempt, no loop
        assert_eq!(runner.count("systemctl restart"), 1);
    }

    #[tokio::test]
    async fn test_missing_backup_is_fatal() {
        let temp = TempDir::new().unwrap();
        let (runner, ctl) = controller(&temp, FakeRunner::systemd_healthy("agent"));

        let err = ctl.rollback("agent").await.unwrap_err();

        assert!(err.is_fatal());
        assert!(runner.calls().is_empty());
    }
}
