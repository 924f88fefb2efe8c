//! Multi-strategy service status resolution.

use std::sync::Arc;

use crate::service::probe::{ProbeChain, ServiceStatus, SupervisorKind, default_chain};
use crate::service::runner::CommandRunner;

/// Resolves a service's state by walking the probe chain in priority order.
///
/// Probes whose control tool is absent are skipped. The first definitive
/// answer wins and later probes are never consulted. When every probe is
/// inconclusive the result is [`ServiceStatus::Unknown`], which callers treat
/// as not running.
#[derive(Clone)]
pub struct StatusResolver {
    runner: Arc<dyn CommandRunner>,
    chain: ProbeChain,
}

impl StatusResolver {
    pub fn new(runner: Arc<dyn CommandRunner>, chain: ProbeChain) -> Self {
        Self {
            runner,
            chain,
        }
    }

    /// Resolver over [`default_chain`].
    pub fn with_default_chain(runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(runner, default_chain())
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    pub fn chain(&self) -> &ProbeChain {
        &self.chain
    }

    pub async fn resolve(&self, service: &str) -> ServiceStatus {
        self.resolve_with_source(service).await.0
    }

    /// Like [`StatusResolver::resolve`], also naming the tool that answered.
    pub async fn resolve_with_source(&self, service: &str) -> (ServiceStatus, Option<&'static str>) {
        for probe in &self.chain {
            if !probe.is_available(self.runner.as_ref()) {
                tracing::trace!(target: "service", "{} not installed, skipping", probe.tool());
                continue;
            }

            let result = probe.detect(self.runner.as_ref(), service).await;
            if result.definitive {
                tracing::debug!(
                    target: "service",
                    "Service {} resolved to {} by {}",
                    service,
                    result.status,
                    probe.tool()
                );
                return (result.status, Some(probe.tool()));
            }
        }

        tracing::warn!("Could not determine status of service {}; treating it as not running", service);
        (ServiceStatus::Unknown, None)
    }

    /// First supervisor in the chain whose control tool is installed.
    ///
    /// Evaluated fresh on every call; nothing about the host is cached.
    pub fn detect_supervisor(&self) -> SupervisorKind {
        self.chain
            .iter()
            .find(|probe| {
                probe.kind() != SupervisorKind::NoneDetected
                    && probe.is_available(self.runner.as_ref())
            })
            .map_or(SupervisorKind::NoneDetected, |probe| probe.kind())
    }
}
