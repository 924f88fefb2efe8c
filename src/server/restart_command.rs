//! Operator-configured `restart_command`.
//!
//! The value is either a shell command, run with `sh -c`, or an `http(s)://`
//! URL that is POSTed to. A shell command that calls `supervisorctl` without
//! `-c` is pointed at the system supervisord config.

use anyhow::{Context, Result, bail};
use std::fmt;

use crate::constants::{COMMAND_TIMEOUT, SUPERVISORCTL, SUPERVISORD_CONF};
use crate::service::{CommandOutput, CommandRunner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartCommand {
    Url(String),
    Shell(String),
}

impl RestartCommand {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Self::Url(raw.to_string())
        } else {
            Self::Shell(with_supervisor_conf(raw))
        }
    }

    /// `supervisorctl ... restart` rewritten to `start`, tried when the
    /// restart fails because the program is not running.
    pub fn start_fallback(&self) -> Option<Self> {
        match self {
            Self::Shell(command) if command.contains(SUPERVISORCTL) && command.contains("restart") => {
                Some(Self::Shell(command.replacen("restart", "start", 1)))
            }
            _ => None,
        }
    }

    /// Run the command, failing on a non-zero exit or an HTTP error status.
    pub async fn run(&self, runner: &dyn CommandRunner) -> Result<()> {
        let out = match self {
            Self::Shell(command) => runner.run("sh", &["-c".to_string(), command.clone()]).await?,
            Self::Url(url) => post(url).await?,
        };
        if !out.success {
            bail!("{}", out.describe());
        }
        Ok(())
    }
}

impl fmt::Display for RestartCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "POST {url}"),
            Self::Shell(command) => f.write_str(command),
        }
    }
}

async fn post(url: &str) -> Result<CommandOutput> {
    let client = reqwest::Client::builder()
        .timeout(COMMAND_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .send()
        .await
        .with_context(|| format!("Failed to execute URL command {url}"))?;

    let status = response.status();
    let body = response.text().await.context("Failed to read URL command response")?;
    tracing::debug!("URL command {} answered {}", url, status);

    Ok(CommandOutput {
        success: !status.is_client_error() && !status.is_server_error(),
        code: Some(i32::from(status.as_u16())),
        output: body,
    })
}

/// Point bare `supervisorctl` invocations at the system supervisord config.
fn with_supervisor_conf(command: &str) -> String {
    if command.contains(SUPERVISORCTL) && !command.contains("-c ") {
        command.replacen(SUPERVISORCTL, &format!("{SUPERVISORCTL} -c {SUPERVISORD_CONF}"), 1)
    } else {
        command.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_conf_injection() {
        assert_eq!(
            with_supervisor_conf("supervisorctl restart mosdns"),
            "supervisorctl -c /etc/supervisor/supervisord.conf restart mosdns"
        );
        assert_eq!(
            with_supervisor_conf("supervisorctl -c /etc/sv.conf restart mosdns"),
            "supervisorctl -c /etc/sv.conf restart mosdns"
        );
        assert_eq!(with_supervisor_conf("systemctl restart mosdns"), "systemctl restart mosdns");
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            RestartCommand::parse(" https://panel/hooks/restart "),
            RestartCommand::Url("https://panel/hooks/restart".to_string())
        );
        assert_eq!(
            RestartCommand::parse("supervisorctl restart mosdns"),
            RestartCommand::Shell(
                "supervisorctl -c /etc/supervisor/supervisord.conf restart mosdns".to_string()
            )
        );
    }

    #[test]
    fn test_start_fallback_only_for_supervisorctl_restart() {
        let command = RestartCommand::parse("supervisorctl restart mosdns");
        assert_eq!(
            command.start_fallback(),
            Some(RestartCommand::Shell(
                "supervisorctl -c /etc/supervisor/supervisord.conf start mosdns".to_string()
            ))
        );

        assert_eq!(RestartCommand::parse("systemctl restart mosdns").start_fallback(), None);
        assert_eq!(RestartCommand::parse("http://panel/supervisorctl/restart").start_fallback(), None);
    }

    #[tokio::test]
    async fn test_url_command_status() {
        let mut server = mockito::Server::new_async().await;
        let ok = server.mock("POST", "/restart").with_status(200).create_async().await;
        let _down = server
            .mock("POST", "/down")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;
        let runner = crate::test_utils::FakeRunner::new();

        RestartCommand::parse(&format!("{}/restart", server.url())).run(&runner).await.unwrap();
        ok.assert_async().await;

        let err = RestartCommand::parse(&format!("{}/down", server.url()))
            .run(&runner)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
        assert!(runner.calls().is_empty());
    }
}
