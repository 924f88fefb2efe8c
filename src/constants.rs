//! Global constants used throughout the agent.
//!
//! This module contains timeout durations, fixed filesystem locations and the
//! names of the supervisor control tools. Defining them centrally keeps the
//! update cycle's magic numbers discoverable.

use std::time::Duration;

/// Default time budget for downloading a new agent binary.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// How long to wait after issuing a restart before asking the supervisor
/// whether the service came back up.
pub const RESTART_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Delay between acknowledging an update request and starting the cycle,
/// so the HTTP response is flushed before anything heavy happens.
pub const UPDATE_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Delay before the process exits when no supervisor is available.
pub const SELF_EXIT_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for any single supervisor command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Agent-owned working directory holding the backup and staging files.
pub const AGENT_WORK_DIR: &str = "/opt/configflow-agent/backup";

/// Default directory searched for the agent's configuration file.
pub const DEFAULT_AGENT_DIR: &str = "/opt/configflow-agent";

/// Fixed name of the single backup slot inside [`AGENT_WORK_DIR`].
pub const BACKUP_FILE_NAME: &str = "configflow-agent.bak";

/// Fixed name of the staging file inside [`AGENT_WORK_DIR`].
pub const STAGING_FILE_NAME: &str = "configflow-agent.tmp";

/// Lock file serialising update cycles across processes.
pub const UPDATE_LOCK_FILE_NAME: &str = ".update.lock";

/// Service unit the agent itself runs under.
pub const AGENT_SERVICE_NAME: &str = "configflow-agent";

/// Artifact name prefix on the control plane's download endpoint.
pub const ARTIFACT_PREFIX: &str = "configflow-agent";

/// Path of the download endpoint relative to the server base URL.
pub const DOWNLOAD_ENDPOINT: &str = "/api/agents/download";

/// supervisord configuration passed explicitly to every `supervisorctl` call.
pub const SUPERVISORD_CONF: &str = "/etc/supervisor/supervisord.conf";

pub const SYSTEMCTL: &str = "systemctl";

pub const RC_SERVICE: &str = "rc-service";

pub const SUPERVISORCTL: &str = "supervisorctl";

pub const PS: &str = "ps";

/// First four bytes of every ELF executable.
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
