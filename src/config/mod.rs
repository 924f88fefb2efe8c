//! Agent configuration
//!
//! The agent reads a single JSON file, shared with the control plane's
//! installer scripts. Only the keys the agent itself uses are typed; every
//! other key is carried through [`AgentConfig::extra`] so that
//! [`AgentConfig::save`] never drops fields written by other tools.
//!
//! # Discovery
//!
//! Without an explicit `--config`, the directory named by `AGENT_DIR`
//! (default `/opt/configflow-agent`) is searched for, in order:
//!
//! 1. `config-mihomo.json`
//! 2. `config-mosdns.json`
//! 3. `config.json`
//!
//! ```json
//! {
//!   "server_url": "http://panel.example:8080",
//!   "agent_name": "edge-1",
//!   "agent_port": 8081,
//!   "service_name": "mosdns",
//!   "token": "s3cret"
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::constants::{AGENT_SERVICE_NAME, DEFAULT_AGENT_DIR};
use crate::core::AgentError;
use crate::utils::fs::atomic_write;

/// Environment variable naming the agent's directory.
pub const AGENT_DIR_ENV: &str = "AGENT_DIR";

/// Candidate file names, most specific first.
pub const CONFIG_CANDIDATES: [&str; 3] = ["config-mihomo.json", "config-mosdns.json", "config.json"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Control plane base address, e.g. `http://panel:8080`.
    #[serde(default)]
    pub server_url: String,

    #[serde(default)]
    pub agent_name: String,

    #[serde(default = "default_agent_host")]
    pub agent_host: String,

    #[serde(default = "default_agent_port")]
    pub agent_port: u16,

    /// The managed service whose status `/api/status` reports.
    #[serde(default)]
    pub service_name: String,

    /// Service the agent itself runs under; restarted after an update.
    #[serde(default = "default_agent_service_name")]
    pub agent_service_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub restart_command: String,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_id: String,

    /// Bearer token required on authenticated endpoints. While it is empty
    /// those endpoints reject every request.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,

    #[serde(skip)]
    path: Option<PathBuf>,
}

fn default_agent_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_agent_port() -> u16 {
    8081
}

fn default_agent_service_name() -> String {
    AGENT_SERVICE_NAME.to_string()
}

const fn default_heartbeat_interval() -> u64 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            agent_name: String::new(),
            agent_host: default_agent_host(),
            agent_port: default_agent_port(),
            service_name: String::new(),
            agent_service_name: default_agent_service_name(),
            restart_command: String::new(),
            heartbeat_interval: default_heartbeat_interval(),
            agent_id: String::new(),
            token: String::new(),
            extra: Map::new(),
            path: None,
        }
    }
}

impl AgentConfig {
    /// Load from `path` if given, otherwise from the discovered location.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::discover(&Self::agent_dir()),
        };
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AgentError::ConfigNotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read agent config from {}", path.display()))?;

        let mut config: Self =
            serde_json::from_str(&content).map_err(|e| AgentError::ConfigParse {
                file: path.display().to_string(),
                reason: e.to_string(),
            })?;

        if config.heartbeat_interval == 0 {
            config.heartbeat_interval = default_heartbeat_interval();
        }
        config.path = Some(path.to_path_buf());

        tracing::debug!("Loaded agent config from {}", path.display());
        Ok(config)
    }

    /// Directory searched for configuration files.
    pub fn agent_dir() -> PathBuf {
        std::env::var_os(AGENT_DIR_ENV)
            .filter(|dir| !dir.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_AGENT_DIR), PathBuf::from)
    }

    /// First existing candidate in `dir`, or `dir/config.json`.
    pub fn discover(dir: &Path) -> PathBuf {
        CONFIG_CANDIDATES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| dir.join("config.json"))
    }

    /// File this config was loaded from.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write back to the file it was loaded from.
    pub async fn save(&self) -> Result<()> {
        let path = self.path.clone().ok_or_else(|| AgentError::Other {
            message: "Configuration was not loaded from a file".to_string(),
        })?;
        self.save_to(&path).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(self).context("Failed to serialize agent config")?;
        let path_owned = path.to_path_buf();

        tokio::task::spawn_blocking(move || atomic_write(&path_owned, &content))
            .await
            .context("Failed to spawn blocking task for config write")?
            .with_context(|| format!("Failed to write agent config to {}", path.display()))
    }

    /// `server_url` without trailing slashes, or `None` when unset.
    pub fn server_base(&self) -> Option<&str> {
        let base = self.server_url.trim().trim_end_matches('/');
        (!base.is_empty()).then_some(base)
    }

    /// Address the HTTP listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.agent_host, self.agent_port)
    }

    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }
}
