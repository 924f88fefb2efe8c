//! Supervisor-aware restart with post-restart health verification.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{RESTART_GRACE_PERIOD, SELF_EXIT_DELAY};
use crate::core::UpdateError;
use crate::service::probe::{Probe, ServiceStatus, SupervisorKind};
use crate::service::runner::command_line;
use crate::service::status::StatusResolver;

/// Called when no supervisor exists and the process must exit so an external
/// respawner can start the new binary.
pub type ExitHandler = Arc<dyn Fn() + Send + Sync>;

fn exit_process() {
    tracing::info!("Exiting so the external respawner can start the new binary");
    std::process::exit(0);
}

/// How a restart was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMechanism {
    Supervisor(SupervisorKind),
    SelfExit,
}

impl fmt::Display for RestartMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supervisor(kind) => write!(f, "{kind}"),
            Self::SelfExit => f.write_str("self-exit"),
        }
    }
}

/// Restarts services through whichever supervisor the host has.
///
/// The mechanism is chosen fresh on every call, using the same probe chain
/// as the [`StatusResolver`]. Without a supervisor the controller falls back
/// to exiting the current process, which only works when the service being
/// restarted is the agent itself and something outside respawns it.
#[derive(Clone)]
pub struct RestartController {
    resolver: StatusResolver,
    grace_period: Duration,
    self_exit_delay: Duration,
    exit_handler: ExitHandler,
}

impl RestartController {
    pub fn new(resolver: StatusResolver) -> Self {
        Self {
            resolver,
            grace_period: RESTART_GRACE_PERIOD,
            self_exit_delay: SELF_EXIT_DELAY,
            exit_handler: Arc::new(exit_process),
        }
    }

    pub const fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub const fn with_self_exit_delay(mut self, delay: Duration) -> Self {
        self.self_exit_delay = delay;
        self
    }

    pub fn with_exit_handler(mut self, handler: ExitHandler) -> Self {
        self.exit_handler = handler;
        self
    }

    pub fn resolver(&self) -> &StatusResolver {
        &self.resolver
    }

    fn supervisor_probe(&self) -> Option<&Arc<dyn Probe>> {
        let runner = self.resolver.runner().as_ref();
        self.resolver.chain().iter().find(|probe| {
            probe.kind() != SupervisorKind::NoneDetected && probe.is_available(runner)
        })
    }

    /// Issue a restart for `service` without waiting for it to come back.
    pub async fn restart(&self, service: &str) -> Result<RestartMechanism, UpdateError> {
        let Some(probe) = self.supervisor_probe() else {
            tracing::warn!(
                "No process supervisor detected; exiting in {}ms to let the respawner restart {}",
                self.self_exit_delay.as_millis(),
                service
            );
            tokio::time::sleep(self.self_exit_delay).await;
            (self.exit_handler)();
            return Ok(RestartMechanism::SelfExit);
        };

        let kind = self.restart_with(probe.as_ref(), service).await?;
        Ok(RestartMechanism::Supervisor(kind))
    }

    /// Restart a service the agent manages but does not run as.
    ///
    /// Unlike [`RestartController::restart`] this never falls back to exiting
    /// the agent process.
    pub async fn restart_managed(&self, service: &str) -> Result<SupervisorKind, UpdateError> {
        match self.supervisor_probe() {
            Some(probe) => self.restart_with(probe.as_ref(), service).await,
            None => Err(UpdateError::RestartCommandFailed {
                command: format!("restart {service}"),
                detail: "no process supervisor detected".to_string(),
            }),
        }
    }

    async fn restart_with(&self, probe: &dyn Probe, service: &str) -> Result<SupervisorKind, UpdateError> {
        let kind = probe.kind();
        let Some(args) = probe.restart_args(service) else {
            return Err(UpdateError::RestartCommandFailed {
                command: probe.tool().to_string(),
                detail: format!("{kind} probe cannot restart services"),
            });
        };

        tracing::info!("Restarting {} via {}", service, kind);
        let Err(restart_error) = self.invoke(probe.tool(), &args).await else {
            return Ok(kind);
        };

        let Some(start_args) = probe.start_args(service) else {
            return Err(restart_error);
        };

        tracing::warn!("{}; trying to start {} instead", restart_error, service);
        self.invoke(probe.tool(), &start_args).await?;
        Ok(kind)
    }

    async fn invoke(&self, tool: &str, args: &[String]) -> Result<(), UpdateError> {
        let command = command_line(tool, args);
        match self.resolver.runner().run(tool, args).await {
            Ok(out) if out.success => Ok(()),
            Ok(out) => Err(UpdateError::RestartCommandFailed {
                command,
                detail: out.describe(),
            }),
            Err(e) => Err(UpdateError::RestartCommandFailed {
                command,
                detail: format!("{e:#}"),
            }),
        }
    }

    /// Restart `service`, wait out the grace period and confirm it is active.
    pub async fn restart_and_verify(&self, service: &str) -> Result<ServiceStatus, UpdateError> {
        let mechanism = self.restart(service).await?;
        tracing::debug!("Restart issued via {}; waiting {:?}", mechanism, self.grace_period);

        tokio::time::sleep(self.grace_period).await;

        let status = self.resolver.resolve(service).await;
        if status.is_running() {
            tracing::info!("Service {} is active after restart", service);
            Ok(status)
        } else {
            Err(UpdateError::HealthCheckFailed {
                service: service.to_string(),
                status: status.to_string(),
            })
        }
    }
}
