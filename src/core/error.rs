//! Error handling for the agent
//!
//! The error system follows two principles:
//! 1. **Strongly-typed errors** so the update cycle can decide between abort,
//!    rollback and escalation by matching on the variant
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Architecture
//!
//! - [`UpdateError`] - the self-update taxonomy. Every variant up to and
//!   including [`UpdateError::InstallFailed`] leaves the live binary untouched;
//!   [`UpdateError::RestartCommandFailed`] and [`UpdateError::HealthCheckFailed`]
//!   happen after the swap and trigger a rollback; [`UpdateError::RollbackFailed`]
//!   is the only unrecoverable class.
//! - [`AgentError`] - configuration and server failures outside the cycle
//! - [`ErrorContext`] - wrapper that adds details and a suggestion for display
//!
//! Use [`user_friendly_error`] to turn any `anyhow::Error` into an
//! [`ErrorContext`] before printing it.

use colored::Colorize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Failure classes of one self-update cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("Download from {url} failed: {reason}")]
    Download {
        url: String,
        reason: String,
    },

    #[error("Downloaded file {path} is not an executable (header {header})")]
    NotAnExecutable {
        path: PathBuf,
        header: String,
    },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Failed to back up {path}: {reason}")]
    BackupFailed {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to install {staged} over {live}: {reason}")]
    InstallFailed {
        staged: PathBuf,
        live: PathBuf,
        reason: String,
    },

    #[error("Restart command `{command}` failed: {detail}")]
    RestartCommandFailed {
        command: String,
        detail: String,
    },

    #[error("Service '{service}' is {status} after restart")]
    HealthCheckFailed {
        service: String,
        status: String,
    },

    #[error("Rollback from {backup} failed: {reason}")]
    RollbackFailed {
        backup: PathBuf,
        reason: String,
    },

    #[error("An update is already in progress")]
    UpdateInProgress,

    #[error("Agent working directory {path} is unusable: {reason}")]
    WorkspaceUnavailable {
        path: PathBuf,
        reason: String,
    },

    #[error("No download location available: {reason}")]
    Unconfigured {
        reason: String,
    },
}

impl UpdateError {
    /// Whether the error happened after the binary swap, so the previous
    /// binary has to be restored.
    #[must_use]
    pub const fn requires_rollback(&self) -> bool {
        matches!(self, Self::RestartCommandFailed { .. } | Self::HealthCheckFailed { .. })
    }

    /// Whether the agent may now be in an inconsistent or non-running state.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }

    /// Short stable identifier, used as a structured log field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Download { .. } => "download_error",
            Self::NotAnExecutable { .. } => "not_an_executable",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::BackupFailed { .. } => "backup_failed",
            Self::InstallFailed { .. } => "install_failed",
            Self::RestartCommandFailed { .. } => "restart_command_failed",
            Self::HealthCheckFailed { .. } => "health_check_failed",
            Self::RollbackFailed { .. } => "rollback_failed",
            Self::UpdateInProgress => "update_in_progress",
            Self::WorkspaceUnavailable { .. } => "workspace_unavailable",
            Self::Unconfigured { .. } => "unconfigured",
        }
    }
}

/// Errors outside the update cycle.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        path: String,
    },

    #[error("Invalid configuration file {file}")]
    ConfigParse {
        file: String,
        reason: String,
    },

    #[error("{message}")]
    Other {
        message: String,
    },
}

/// An error enriched with details and a suggestion for terminal display.
#[derive(Debug)]
pub struct ErrorContext {
    pub message: String,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl ErrorContext {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            details: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.message);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

fn update_error_context(error: &UpdateError) -> ErrorContext {
    let ctx = ErrorContext::new(error.to_string());
    match error {
        UpdateError::Download { .. } => ctx
            .with_suggestion("Check that server_url is reachable from this host")
            .with_details("The live binary was not modified"),
        UpdateError::NotAnExecutable { .. } => ctx
            .with_suggestion("Verify the control plane serves a binary for this architecture (see `configflow-agent arch`)")
            .with_details("The server most likely returned an HTML error page instead of the binary"),
        UpdateError::ChecksumMismatch { .. } => ctx
            .with_suggestion("Retry the update; if it keeps failing, republish the artifact")
            .with_details("The staged file was deleted and the live binary was not modified"),
        UpdateError::BackupFailed { .. } => ctx
            .with_suggestion("Check free space and permissions of the agent working directory")
            .with_details("The update was aborted because rollback could not be guaranteed"),
        UpdateError::InstallFailed { .. } => ctx
            .with_suggestion("Check permissions on the binary's directory")
            .with_details("The previous binary is still installed and running"),
        UpdateError::RestartCommandFailed { .. } | UpdateError::HealthCheckFailed { .. } => ctx
            .with_suggestion("Inspect the service logs; the previous binary has been restored"),
        UpdateError::RollbackFailed { .. } => ctx
            .with_suggestion("Operator attention required: reinstall the agent binary manually")
            .with_details("The agent may not be running"),
        UpdateError::UpdateInProgress => {
            ctx.with_suggestion("Wait for the running update cycle to finish")
        }
        UpdateError::WorkspaceUnavailable { .. } => ctx
            .with_suggestion("Check that the agent working directory exists and is writable")
            .with_details("The update was aborted before anything was downloaded"),
        UpdateError::Unconfigured { .. } => {
            ctx.with_suggestion("Set server_url in the agent configuration or pass --url")
        }
    }
}

/// Convert any error into a displayable [`ErrorContext`] with suggestions.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(update_error) = error.downcast_ref::<UpdateError>() {
        return update_error_context(update_error);
    }

    if let Some(agent_error) = error.downcast_ref::<AgentError>() {
        match agent_error {
            AgentError::ConfigNotFound { .. } => {
                return ErrorContext::new(agent_error.to_string())
                    .with_suggestion("Pass --config or set AGENT_DIR to the agent's directory");
            }
            AgentError::ConfigParse { reason, .. } => {
                return ErrorContext::new(agent_error.to_string())
                    .with_details(reason.clone())
                    .with_suggestion("Check the JSON syntax of the configuration file");
            }
            _ => {}
        }
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>()
        && io_error.kind() == std::io::ErrorKind::PermissionDenied
    {
        return ErrorContext::new(error.to_string())
            .with_suggestion("The agent manages system paths; run it as root or via its service unit");
    }

    let mut message = error.to_string();
    let chain: Vec<String> =
        error.chain().skip(1).map(std::string::ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_classification() {
        let restart = UpdateError::RestartCommandFailed {
            command: "systemctl restart configflow-agent".into(),
            detail: "exit status 1".into(),
        };
        let health = UpdateError::HealthCheckFailed {
            service: "configflow-agent".into(),
            status: "inactive".into(),
        };
        let checksum = UpdateError::ChecksumMismatch {
            path: "/tmp/x".into(),
            expected: "a".into(),
            actual: "b".into(),
        };

        assert!(restart.requires_rollback());
        assert!(health.requires_rollback());
        assert!(!checksum.requires_rollback());
        assert!(!restart.is_fatal());
    }

    #[test]
    fn test_only_rollback_failure_is_fatal() {
        let fatal = UpdateError::RollbackFailed {
            backup: "/opt/configflow-agent/backup/configflow-agent.bak".into(),
            reason: "missing".into(),
        };
        assert!(fatal.is_fatal());
        assert!(!fatal.requires_rollback());
        assert_eq!(fatal.kind(), "rollback_failed");
    }

    #[test]
    fn test_user_friendly_update_error() {
        let err = anyhow::Error::new(UpdateError::NotAnExecutable {
            path: "/tmp/staged".into(),
            header: "3c68746d".into(),
        });
        let ctx = user_friendly_error(err);
        assert!(ctx.message.contains("not an executable"));
        assert!(ctx.details.unwrap().contains("HTML"));
    }

    #[test]
    fn test_user_friendly_generic_chain() {
        let err = anyhow::anyhow!("root cause").context("outer");
        let ctx = user_friendly_error(err);
        assert!(ctx.message.contains("outer"));
        assert!(ctx.message.contains("Caused by"));
        assert!(ctx.message.contains("root cause"));
    }

    #[test]
    fn test_error_context_display() {
        let ctx = ErrorContext::new("boom").with_details("d").with_suggestion("s");
        assert_eq!(ctx.to_string(), "boom\nDetails: d\nSuggestion: s");
    }
}
