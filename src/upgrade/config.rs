//! Settings for the self-update cycle.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::AgentConfig;
use crate::constants::{
    AGENT_SERVICE_NAME, AGENT_WORK_DIR, BACKUP_FILE_NAME, DOWNLOAD_TIMEOUT, RESTART_GRACE_PERIOD,
    SELF_EXIT_DELAY, STAGING_FILE_NAME, UPDATE_LOCK_FILE_NAME, UPDATE_SETTLE_DELAY,
};
use crate::utils::platform::current_executable;

/// Where the update cycle reads and writes, and how long it waits.
///
/// The backup and staging files live at fixed names inside `work_dir`, so a
/// host never accumulates more than one of each no matter how many cycles
/// run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSettings {
    /// The binary being replaced, normally the running executable.
    pub live_binary: PathBuf,

    /// Agent-owned directory for the backup, staging and lock files.
    pub work_dir: PathBuf,

    /// Control plane base address. When set, the download URL is derived
    /// from it and the host architecture.
    pub server_url: Option<String>,

    /// Service restarted and health-checked after the swap.
    pub agent_service: String,

    pub download_timeout: Duration,

    /// Pause before the cycle starts so the acknowledgement is delivered.
    pub settle_delay: Duration,

    /// Wait between issuing a restart and checking the service.
    pub restart_grace: Duration,

    pub self_exit_delay: Duration,
}

impl UpdateSettings {
    pub fn new(live_binary: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            live_binary,
            work_dir,
            server_url: None,
            agent_service: AGENT_SERVICE_NAME.to_string(),
            download_timeout: DOWNLOAD_TIMEOUT,
            settle_delay: UPDATE_SETTLE_DELAY,
            restart_grace: RESTART_GRACE_PERIOD,
            self_exit_delay: SELF_EXIT_DELAY,
        }
    }

    /// Settings for updating the running executable under `config`.
    pub fn from_agent_config(config: &AgentConfig) -> Result<Self> {
        let mut settings = Self::new(current_executable()?, PathBuf::from(AGENT_WORK_DIR));
        settings.server_url = config.server_base().map(str::to_string);
        settings.agent_service = config.agent_service_name.clone();
        Ok(settings)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.work_dir.join(BACKUP_FILE_NAME)
    }

    pub fn staging_path(&self) -> PathBuf {
        self.work_dir.join(STAGING_FILE_NAME)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.work_dir.join(UPDATE_LOCK_FILE_NAME)
    }
}
