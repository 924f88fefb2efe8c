//! The self-update cycle.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tracing::{error, info, warn};

use crate::constants::DOWNLOAD_ENDPOINT;
use crate::core::UpdateError;
use crate::service::{CommandRunner, ExitHandler, RestartController, ServiceStatus, StatusResolver};
use crate::upgrade::arch::ArchTag;
use crate::upgrade::backup::BackupManager;
use crate::upgrade::config::UpdateSettings;
use crate::upgrade::fetch::ArtifactFetcher;
use crate::upgrade::install::AtomicInstaller;
use crate::upgrade::lock::UpdateLock;
use crate::upgrade::rollback::{RollbackController, RollbackOutcome};
use crate::upgrade::verification::IntegrityVerifier;

/// A request to replace the running agent with a new build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Advisory label, only logged.
    pub version: String,

    /// Used when no server address is configured.
    #[serde(default)]
    pub download_url: String,

    /// Bare hex MD5, or `sha256:<hex>`. Empty means none.
    #[serde(default)]
    pub md5sum: Option<String>,
}

impl UpdateRequest {
    fn checksum(&self) -> Option<&str> {
        self.md5sum.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// How a cycle that got past the swap ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// New binary installed and the service verified active.
    Updated {
        version: String,
        status: ServiceStatus,
    },
    /// The new binary failed; the old one is back and running.
    RolledBack {
        cause: UpdateError,
    },
    /// The old binary is back but the service did not come up.
    Degraded {
        cause: UpdateError,
        restart_error: UpdateError,
    },
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Updated {
                version,
                status,
            } => write!(f, "updated to {version}, service {status}"),
            Self::RolledBack {
                cause,
            } => write!(f, "rolled back after: {cause}"),
            Self::Degraded {
                cause,
                restart_error,
            } => write!(f, "rolled back after: {cause}; restart still failing: {restart_error}"),
        }
    }
}

/// Proof that the caller holds the single update slot.
///
/// Dropping it frees the slot, whether the cycle finished, failed or
/// panicked.
#[derive(Debug)]
pub struct UpdateGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Runs self-update cycles: fetch, verify, back up, swap, restart, verify,
/// and roll back when the new binary does not come up.
///
/// At most one cycle runs at a time per updater; [`SelfUpdater::try_begin`]
/// rejects a second one instead of queueing it. Every failure before the swap
/// leaves the live binary untouched.
pub struct SelfUpdater {
    settings: UpdateSettings,
    fetcher: ArtifactFetcher,
    backup: BackupManager,
    installer: AtomicInstaller,
    restart: RestartController,
    rollback: RollbackController,
    in_flight: Arc<AtomicBool>,
}

impl SelfUpdater {
    pub fn new(settings: UpdateSettings, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let resolver = StatusResolver::with_default_chain(runner);
        let restart = RestartController::new(resolver)
            .with_grace_period(settings.restart_grace)
            .with_self_exit_delay(settings.self_exit_delay);
        Self::with_restart_controller(settings, restart)
    }

    /// Build with a preconfigured restart controller, e.g. one with a custom
    /// exit handler.
    pub fn with_restart_controller(
        settings: UpdateSettings,
        restart: RestartController,
    ) -> Result<Self> {
        let fetcher = ArtifactFetcher::new(settings.download_timeout)?;
        let backup = BackupManager::new(settings.live_binary.clone(), settings.backup_path());
        let installer = AtomicInstaller::new(settings.live_binary.clone());
        let rollback = RollbackController::new(backup.clone(), restart.clone());

        Ok(Self {
            settings,
            fetcher,
            backup,
            installer,
            restart,
            rollback,
            in_flight: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Replace the exit handler used when no supervisor is present.
    pub fn with_exit_handler(self, handler: ExitHandler) -> Result<Self> {
        let restart = self.restart.clone().with_exit_handler(handler);
        Self::with_restart_controller(self.settings, restart)
    }

    pub fn settings(&self) -> &UpdateSettings {
        &self.settings
    }

    pub fn resolver(&self) -> &StatusResolver {
        self.restart.resolver()
    }

    pub fn restart_controller(&self) -> &RestartController {
        &self.restart
    }

    pub fn backup(&self) -> &BackupManager {
        &self.backup
    }

    pub fn is_updating(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Claim the update slot.
    ///
    /// # Errors
    ///
    /// [`UpdateError::UpdateInProgress`] when another cycle holds it.
    pub fn try_begin(&self) -> Result<UpdateGuard, UpdateError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| UpdateError::UpdateInProgress)?;
        Ok(UpdateGuard {
            flag: Arc::clone(&self.in_flight),
        })
    }

    /// Where to fetch the artifact for `request` on this host.
    ///
    /// With a server address configured the URL is
    /// `{server}/api/agents/download/configflow-agent-{arch}`; otherwise the
    /// request's own URL is used.
    pub fn download_url(&self, request: &UpdateRequest, arch: ArchTag) -> Result<String, UpdateError> {
        if let Some(server) = &self.settings.server_url {
            let base = server.trim_end_matches('/');
            return Ok(format!("{base}{DOWNLOAD_ENDPOINT}/{}", arch.artifact_name()));
        }

        let url = request.download_url.trim();
        if url.is_empty() {
            return Err(UpdateError::Unconfigured {
                reason: "no server_url configured and the request carries no download_url"
                    .to_string(),
            });
        }
        Ok(url.to_string())
    }

    /// Claim the slot and run one full cycle.
    pub async fn update(&self, request: UpdateRequest) -> Result<UpdateOutcome, UpdateError> {
        let guard = self.try_begin()?;
        self.run(request, guard).await
    }

    /// Run one full cycle while holding `guard`.
    ///
    /// `Err` means the cycle was aborted before the swap, or that rollback
    /// itself failed ([`UpdateError::is_fatal`]). Failures after the swap
    /// that were recovered are reported through [`UpdateOutcome`].
    pub async fn run(
        &self,
        request: UpdateRequest,
        _guard: UpdateGuard,
    ) -> Result<UpdateOutcome, UpdateError> {
        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }

        let _lock = self.lock_workspace().await?;

        let result = self.run_locked(&request).await;
        match &result {
            Ok(outcome @ UpdateOutcome::Updated { .. }) => info!("Update finished: {}", outcome),
            Ok(outcome @ UpdateOutcome::RolledBack { .. }) => warn!("Update failed: {}", outcome),
            Ok(outcome @ UpdateOutcome::Degraded { .. }) => {
                error!(alert = true, "Update failed and service is down: {}", outcome);
            }
            Err(e) if e.is_fatal() => error!(alert = true, kind = e.kind(), "Update failed: {}", e),
            Err(e) => warn!(kind = e.kind(), "Update aborted: {}", e),
        }
        result
    }

    async fn run_locked(&self, request: &UpdateRequest) -> Result<UpdateOutcome, UpdateError> {
        let arch = ArchTag::detect();
        let url = self.download_url(request, arch)?;
        let staging = self.settings.staging_path();

        info!(version = %request.version, arch = %arch, "Starting agent update");

        self.fetcher.download(&url, &staging).await?;
        IntegrityVerifier::verify(&staging, request.checksum()).await?;

        if let Err(e) = self.backup.create_backup().await {
            let _ = fs::remove_file(&staging).await;
            return Err(e);
        }

        self.installer.install(&staging).await?;
        info!("New binary installed, restarting {}", self.settings.agent_service);

        let service = self.settings.agent_service.as_str();
        let cause = match self.restart.restart_and_verify(service).await {
            Ok(status) => {
                return Ok(UpdateOutcome::Updated {
                    version: request.version.clone(),
                    status,
                });
            }
            Err(e) => e,
        };

        warn!(kind = cause.kind(), "New binary did not come up: {}", cause);

        match self.rollback.rollback(service).await? {
            RollbackOutcome::Recovered => Ok(UpdateOutcome::RolledBack {
                cause,
            }),
            RollbackOutcome::Degraded(restart_error) => Ok(UpdateOutcome::Degraded {
                cause,
                restart_error,
            }),
        }
    }

    /// Restore the backup and restart the agent service, outside an update.
    ///
    /// Holds the same workspace lock as [`SelfUpdater::run`], so it waits for
    /// a cycle running in another process.
    pub async fn rollback(&self) -> Result<RollbackOutcome, UpdateError> {
        let _guard = self.try_begin()?;
        let _lock = self.lock_workspace().await?;
        self.rollback.rollback(&self.settings.agent_service).await
    }

    async fn lock_workspace(&self) -> Result<UpdateLock, UpdateError> {
        UpdateLock::acquire(&self.settings.lock_path()).await.map_err(|e| {
            UpdateError::WorkspaceUnavailable {
                path: self.settings.work_dir.clone(),
                reason: format!("{e:#}"),
            }
        })
    }
}
