//! Process invocation seam.
//!
//! Every supervisor interaction goes through [`CommandRunner`], so the status
//! resolver, the restart controller and the whole update cycle can be driven
//! by a scripted runner in tests without touching a real shell.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::constants::COMMAND_TIMEOUT;
use crate::utils::platform::command_exists;

/// Exit status and combined stdout/stderr of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub output: String,
}

impl CommandOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            output: output.into(),
        }
    }

    pub fn failed(code: i32, output: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            output: output.into(),
        }
    }

    /// One-line description of the exit, for logs and error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        };
        let output = self.output.trim();
        if output.is_empty() { status } else { format!("{status}: {output}") }
    }
}

/// Render a command line for logging.
#[must_use]
pub fn command_line(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

/// Capability to locate and run external tools.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Whether `tool` is installed on the host.
    fn has_tool(&self, tool: &str) -> bool;

    /// Run `program` with `args` to completion.
    ///
    /// A non-zero exit is reported through [`CommandOutput::success`]; `Err`
    /// means the command could not be spawned or did not finish in time.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Runs real processes with `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout_duration: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            timeout_duration: COMMAND_TIMEOUT,
        }
    }
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout_duration = duration;
        self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    fn has_tool(&self, tool: &str) -> bool {
        command_exists(tool)
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        tracing::debug!(target: "service", "Executing command: {}", line);

        let mut cmd = Command::new(program);
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

        let output = match timeout(self.timeout_duration, cmd.output()).await {
            Ok(result) => result.with_context(|| format!("Failed to execute {line}"))?,
            Err(_) => {
                tracing::warn!(
                    target: "service",
                    "Command timed out after {} seconds: {}",
                    self.timeout_duration.as_secs(),
                    line
                );
                anyhow::bail!(
                    "Command timed out after {} seconds: {line}",
                    self.timeout_duration.as_secs()
                );
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let result = CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            output: combined,
        };

        if result.success {
            tracing::trace!(target: "service", "{} succeeded", line);
        } else {
            tracing::debug!(target: "service", "{} failed: {}", line, result.describe());
        }

        Ok(result)
    }
}
