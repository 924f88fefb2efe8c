//! Scripted [`CommandRunner`] for tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::service::runner::{CommandOutput, CommandRunner, command_line};

/// A [`CommandRunner`] that never spawns anything.
///
/// Tools are "installed" with [`FakeRunner::with_tool`]. Responses are keyed
/// by the full command line: one-shot responses queued with
/// [`FakeRunner::respond_once`] are consumed first, then the sticky response
/// from [`FakeRunner::respond`] applies. Unscripted commands exit with status
/// 127. Every invocation is recorded.
#[derive(Debug, Default)]
pub struct FakeRunner {
    tools: HashSet<String>,
    sticky: HashMap<String, CommandOutput>,
    queued: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host with systemd where `service` restarts cleanly and reports active.
    pub fn systemd_healthy(service: &str) -> Self {
        Self::new()
            .with_tool("systemctl")
            .respond(&format!("systemctl restart {service}"), CommandOutput::ok(""))
            .respond(&format!("systemctl is-active --quiet {service}"), CommandOutput::ok(""))
    }

    pub fn with_tool(mut self, tool: &str) -> Self {
        self.tools.insert(tool.to_string());
        self
    }

    pub fn respond(mut self, command: &str, output: CommandOutput) -> Self {
        self.sticky.insert(command.to_string(), output);
        self
    }

    pub fn respond_once(self, command: &str, output: CommandOutput) -> Self {
        self.queued
            .lock()
            .expect("fake runner lock poisoned")
            .entry(command.to_string())
            .or_default()
            .push_back(output);
        self
    }

    /// Every command line run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("fake runner lock poisoned").clone()
    }

    /// Whether any recorded command line starts with `prefix`.
    pub fn called(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|call| call.starts_with(prefix)).count()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    fn has_tool(&self, tool: &str) -> bool {
        self.tools.contains(tool)
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        self.calls.lock().expect("fake runner lock poisoned").push(line.clone());

        let queued = self
            .queued
            .lock()
            .expect("fake runner lock poisoned")
            .get_mut(&line)
            .and_then(VecDeque::pop_front);

        Ok(queued
            .or_else(|| self.sticky.get(&line).cloned())
            .unwrap_or_else(|| CommandOutput::failed(127, format!("{program}: not scripted"))))
    }
}
