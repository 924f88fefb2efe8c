//! Supervisor probes.
//!
//! Each supported process supervisor is one [`Probe`] object. The status
//! resolver and the restart controller both walk the same ordered chain from
//! [`default_chain`], so the priority order lives in exactly one place.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::constants::{PS, RC_SERVICE, SUPERVISORCTL, SUPERVISORD_CONF, SYSTEMCTL};
use crate::service::runner::CommandRunner;

/// Whether a service is up, as far as the host can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Active,
    Inactive,
    /// No probe could decide. Callers treat this as not running.
    Unknown,
}

impl ServiceStatus {
    /// Only a positive [`ServiceStatus::Active`] counts as running.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Active)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process supervisor families the agent knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SupervisorKind {
    Systemd,
    OpenRc,
    Supervisor,
    NoneDetected,
}

impl SupervisorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Systemd => "systemd",
            Self::OpenRc => "openrc",
            Self::Supervisor => "supervisor",
            Self::NoneDetected => "none-detected",
        }
    }
}

impl fmt::Display for SupervisorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub status: ServiceStatus,
    /// A definitive result ends the chain; an inconclusive one falls through.
    pub definitive: bool,
}

impl ProbeResult {
    #[must_use]
    pub const fn definitive(status: ServiceStatus) -> Self {
        Self {
            status,
            definitive: true,
        }
    }

    #[must_use]
    pub const fn inconclusive() -> Self {
        Self {
            status: ServiceStatus::Unknown,
            definitive: false,
        }
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    /// Supervisor family, or [`SupervisorKind::NoneDetected`] for probes that
    /// observe processes without managing them.
    fn kind(&self) -> SupervisorKind;

    /// Control tool whose presence on `PATH` enables this probe.
    fn tool(&self) -> &'static str;

    fn is_available(&self, runner: &dyn CommandRunner) -> bool {
        runner.has_tool(self.tool())
    }

    /// Query the service state. Only called when the tool is available.
    async fn detect(&self, runner: &dyn CommandRunner, service: &str) -> ProbeResult;

    /// Arguments to [`Probe::tool`] that restart `service`, if this probe
    /// belongs to a supervisor able to do so.
    fn restart_args(&self, _service: &str) -> Option<Vec<String>> {
        None
    }

    /// Arguments that start a stopped service, tried once when restart fails.
    fn start_args(&self, _service: &str) -> Option<Vec<String>> {
        None
    }
}

pub type ProbeChain = Vec<Arc<dyn Probe>>;

/// systemd → OpenRC → supervisord → process table.
#[must_use]
pub fn default_chain() -> ProbeChain {
    vec![
        Arc::new(SystemdProbe) as Arc<dyn Probe>,
        Arc::new(OpenRcProbe),
        Arc::new(SupervisorProbe),
        Arc::new(ProcessTableProbe::current()),
    ]
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// `systemctl is-active`; its answer is authoritative either way.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemdProbe;

#[async_trait]
impl Probe for SystemdProbe {
    fn kind(&self) -> SupervisorKind {
        SupervisorKind::Systemd
    }

    fn tool(&self) -> &'static str {
        SYSTEMCTL
    }

    async fn detect(&self, runner: &dyn CommandRunner, service: &str) -> ProbeResult {
        match runner.run(SYSTEMCTL, &args(&["is-active", "--quiet", service])).await {
            Ok(out) if out.success => {
                tracing::debug!(target: "service", "Service {} is active (systemctl)", service);
                ProbeResult::definitive(ServiceStatus::Active)
            }
            Ok(out) => {
                tracing::debug!(
                    target: "service",
                    "Service {} is inactive (systemctl, {})",
                    service,
                    out.describe()
                );
                ProbeResult::definitive(ServiceStatus::Inactive)
            }
            Err(e) => {
                tracing::warn!(target: "service", "systemctl probe failed for {}: {:#}", service, e);
                ProbeResult::inconclusive()
            }
        }
    }

    fn restart_args(&self, service: &str) -> Option<Vec<String>> {
        Some(args(&["restart", service]))
    }
}

/// `rc-service <svc> status`, classified by keywords in its output.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenRcProbe;

#[async_trait]
impl Probe for OpenRcProbe {
    fn kind(&self) -> SupervisorKind {
        SupervisorKind::OpenRc
    }

    fn tool(&self) -> &'static str {
        RC_SERVICE
    }

    async fn detect(&self, runner: &dyn CommandRunner, service: &str) -> ProbeResult {
        let out = match runner.run(RC_SERVICE, &args(&[service, "status"])).await {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!(target: "service", "rc-service probe failed for {}: {:#}", service, e);
                return ProbeResult::inconclusive();
            }
        };

        tracing::debug!(target: "service", "rc-service output for {}: {}", service, out.output.trim());
        parse_openrc_status(out.success, &out.output)
    }

    fn restart_args(&self, service: &str) -> Option<Vec<String>> {
        Some(args(&[service, "restart"]))
    }
}

/// Classify `rc-service status` output.
#[must_use]
pub fn parse_openrc_status(success: bool, output: &str) -> ProbeResult {
    if success && (output.contains("started") || output.contains("running")) {
        ProbeResult::definitive(ServiceStatus::Active)
    } else if output.contains("stopped") || output.contains("crashed") {
        ProbeResult::definitive(ServiceStatus::Inactive)
    } else {
        ProbeResult::inconclusive()
    }
}

/// `supervisorctl status <svc>` against the system supervisord config.
#[derive(Debug, Clone, Copy, Default)]
pub struct SupervisorProbe;

impl SupervisorProbe {
    fn ctl_args(action: &str, service: &str) -> Vec<String> {
        args(&["-c", SUPERVISORD_CONF, action, service])
    }
}

#[async_trait]
impl Probe for SupervisorProbe {
    fn kind(&self) -> SupervisorKind {
        SupervisorKind::Supervisor
    }

    fn tool(&self) -> &'static str {
        SUPERVISORCTL
    }

    async fn detect(&self, runner: &dyn CommandRunner, service: &str) -> ProbeResult {
        // supervisorctl exits non-zero for stopped programs, so the output is
        // inspected regardless of the exit status.
        let out = match runner.run(SUPERVISORCTL, &Self::ctl_args("status", service)).await {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!(target: "service", "supervisorctl probe failed for {}: {:#}", service, e);
                return ProbeResult::inconclusive();
            }
        };

        tracing::debug!(target: "service", "supervisorctl output for {}: {}", service, out.output.trim());
        parse_supervisor_status(&out.output, service)
    }

    fn restart_args(&self, service: &str) -> Option<Vec<String>> {
        Some(Self::ctl_args("restart", service))
    }

    fn start_args(&self, service: &str) -> Option<Vec<String>> {
        Some(Self::ctl_args("start", service))
    }
}

/// Classify `supervisorctl status` output for `service`.
///
/// The status line is `<name> <STATE> ...` where name may carry a
/// `group:` prefix or a trailing colon (`<name>: ERROR (no such process)`).
/// States other than RUNNING/STARTING/FATAL/STOPPED are reported as
/// inactive; output that never names the service is inconclusive.
#[must_use]
pub fn parse_supervisor_status(output: &str, service: &str) -> ProbeResult {
    let line = output.lines().find(|line| {
        line.split_whitespace().next().is_some_and(|name| {
            let name = name.trim_end_matches(':');
            name == service || name.rsplit(':').next() == Some(service)
        })
    });

    let Some(line) = line else {
        return ProbeResult::inconclusive();
    };

    let state = line.split_whitespace().nth(1).unwrap_or_default();
    match state {
        "RUNNING" | "STARTING" => ProbeResult::definitive(ServiceStatus::Active),
        "FATAL" | "STOPPED" => ProbeResult::definitive(ServiceStatus::Inactive),
        other => {
            tracing::debug!(
                target: "service",
                "Service {} is in state {:?} (supervisorctl), reporting inactive",
                service,
                other
            );
            ProbeResult::definitive(ServiceStatus::Inactive)
        }
    }
}

/// Last resort: look for the service name in the process table.
///
/// Finding a process is definitive; not finding one is inconclusive. The
/// agent's own pid is skipped so the agent never vouches for itself.
#[derive(Debug, Clone, Copy)]
pub struct ProcessTableProbe {
    own_pid: u32,
}

impl ProcessTableProbe {
    #[must_use]
    pub fn current() -> Self {
        Self {
            own_pid: std::process::id(),
        }
    }
}

#[async_trait]
impl Probe for ProcessTableProbe {
    fn kind(&self) -> SupervisorKind {
        SupervisorKind::NoneDetected
    }

    fn tool(&self) -> &'static str {
        PS
    }

    async fn detect(&self, runner: &dyn CommandRunner, service: &str) -> ProbeResult {
        let Some(table) = process_table(runner).await else {
            return ProbeResult::inconclusive();
        };

        if process_table_contains(&table, service, self.own_pid) {
            tracing::debug!(target: "service", "Service {} process exists (process table)", service);
            ProbeResult::definitive(ServiceStatus::Active)
        } else {
            ProbeResult::inconclusive()
        }
    }
}

/// `ps -eo pid=,args=`, or plain `ps` where the options are not supported
/// (BusyBox).
async fn process_table(runner: &dyn CommandRunner) -> Option<String> {
    match runner.run(PS, &args(&["-eo", "pid=,args="])).await {
        Ok(out) if out.success => return Some(out.output),
        Ok(out) => tracing::debug!(target: "service", "ps -eo failed: {}", out.describe()),
        Err(e) => tracing::debug!(target: "service", "ps -eo failed: {:#}", e),
    }

    match runner.run(PS, &[]).await {
        Ok(out) if out.success => Some(out.output),
        Ok(out) => {
            tracing::debug!(target: "service", "ps failed: {}", out.describe());
            None
        }
        Err(e) => {
            tracing::warn!(target: "service", "process table lookup failed: {:#}", e);
            None
        }
    }
}

/// Scan `ps` output for a process mentioning `service`.
#[must_use]
pub fn process_table_contains(table: &str, service: &str, own_pid: u32) -> bool {
    table.lines().any(|line| {
        let line = line.trim_start();
        let (pid, command) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        pid.parse::<u32>().ok() != Some(own_pid) && command.contains(service)
    })
}
