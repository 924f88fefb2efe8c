//! Service supervision: status resolution and restarts.
//!
//! The agent runs on hosts with very different init setups. This module hides
//! that behind two operations:
//!
//! - [`StatusResolver::resolve`] asks systemd, OpenRC, supervisord and finally
//!   the process table, in that order, and returns the first definitive answer
//! - [`RestartController::restart_and_verify`] restarts through the first
//!   supervisor present, or exits the process when there is none, then checks
//!   the service came back
//!
//! All external tools are invoked through the [`CommandRunner`] trait.

pub mod probe;
pub mod restart;
pub mod runner;
pub mod status;

pub use probe::{Probe, ProbeResult, ServiceStatus, SupervisorKind, default_chain};
pub use restart::{ExitHandler, RestartController, RestartMechanism};
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
pub use status::StatusResolver;
