//! Unattended self-update of the agent binary.
//!
//! The control plane pushes an update request; the agent acknowledges it at
//! once and then replaces its own executable in the background. Because the
//! agent is the only thing that can repair itself on a remote host, every
//! step is arranged so that a failure leaves a working binary behind.
//!
//! # Update Process Flow
//!
//! ```text
//! 1. Fetch
//!    ├── Detect host architecture
//!    └── Download artifact into the staging slot
//!
//! 2. Verify
//!    ├── ELF magic bytes (rejects HTML error pages)
//!    └── MD5 / SHA-256 checksum when one was supplied
//!
//! 3. Backup
//!    └── Copy the live binary into the single backup slot
//!
//! 4. Install
//!    └── chmod 0755 and rename staging over the live binary
//!
//! 5. Restart and verify
//!    ├── Restart through systemd, OpenRC or supervisord (or exit)
//!    └── Wait out the grace period and require `active`
//!
//! 6. Rollback, only if step 5 failed
//!    ├── Copy the backup over the live binary
//!    └── Restart once more, never looping
//! ```
//!
//! Steps 1 to 4 abort without touching the live binary. Only a failed
//! rollback ([`UpdateError::RollbackFailed`](crate::core::UpdateError))
//! leaves the host in an unknown state, and it is logged with `alert = true`.
//!
//! # Concurrency
//!
//! [`SelfUpdater::try_begin`] hands out a single [`UpdateGuard`]; a second
//! request while one is held fails with `UpdateInProgress`. Separate agent
//! processes are serialised by [`lock::UpdateLock`] on the working directory.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use configflow_agent::service::SystemRunner;
//! use configflow_agent::upgrade::{SelfUpdater, UpdateRequest, UpdateSettings};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let settings = UpdateSettings::new(
//!     "/usr/local/bin/configflow-agent".into(),
//!     "/opt/configflow-agent/backup".into(),
//! );
//! let updater = SelfUpdater::new(settings, Arc::new(SystemRunner::new()))?;
//! let outcome = updater
//!     .update(UpdateRequest {
//!         version: "1.4.0".into(),
//!         download_url: "https://panel.example/agent".into(),
//!         md5sum: None,
//!     })
//!     .await?;
//! println!("{outcome}");
//! # Ok(())
//! # }
//! ```

pub mod arch;
pub mod backup;
pub mod config;
pub mod fetch;
pub mod install;
pub mod lock;
pub mod rollback;
pub mod self_updater;
pub mod verification;


pub use arch::ArchTag;
pub use backup::BackupManager;
pub use config::UpdateSettings;
pub use rollback::{RollbackController, RollbackOutcome};
pub use self_updater::{SelfUpdater, UpdateGuard, UpdateOutcome, UpdateRequest};
pub use verification::IntegrityVerifier;
