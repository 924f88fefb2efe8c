//! Command-line interface for the agent.
//!
//! # Commands
//!
//! - `serve` - run the HTTP agent (the normal service mode)
//! - `update` - run one update cycle in the foreground, or `--rollback`
//! - `status` - resolve a service's status with the probe chain
//! - `arch` - print the artifact architecture tag for this host
//!
//! # Global Options
//!
//! - `-c, --config <PATH>` - configuration file (default: discovered in `AGENT_DIR`)
//! - `-v, --verbose` - debug logging
//! - `-q, --quiet` - warnings and errors only
//!
//! `RUST_LOG`, when set, overrides both flags.

mod serve;
mod status;
mod upgrade;


use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::AgentConfig;
use crate::upgrade::ArchTag;

/// Settings derived from the global flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliConfig {
    pub log_level: String,
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    /// Install the global tracing subscriber.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_level.as_str()));

        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
    }

    pub async fn load_agent_config(&self) -> Result<AgentConfig> {
        AgentConfig::load(self.config_path.as_deref()).await
    }
}

#[derive(Parser)]
#[command(
    name = "configflow-agent",
    about = "Host management agent with safe self-update",
    version,
    long_about = "Runs on managed hosts, reports service status to the control plane and \
                  replaces its own binary on request, rolling back if the new build fails to start."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the agent configuration file
    #[arg(short, long, global = true, env = "AGENT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent's HTTP server
    Serve(serve::ServeArgs),

    /// Update the agent binary now, or roll back to the backup
    Update(upgrade::UpdateArgs),

    /// Show the status of a service
    Status(status::StatusArgs),

    /// Print the architecture tag used to select artifacts
    Arch,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        config.init_logging();
        self.execute_with_config(config).await
    }

    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        };

        CliConfig {
            log_level: log_level.to_string(),
            config_path: self.config.clone(),
        }
    }

    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        match self.command {
            Commands::Serve(args) => serve::execute(args, &config).await,
            Commands::Update(args) => upgrade::execute(args, &config).await,
            Commands::Status(args) => status::execute(args, &config).await,
            Commands::Arch => {
                println!("{}", ArchTag::detect());
                Ok(())
            }
        }
    }
}
