//! `serve`: run the agent.

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::cli::CliConfig;
use crate::server::{self, AppState};
use crate::service::SystemRunner;
use crate::upgrade::{SelfUpdater, UpdateSettings};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen address, overriding agent_host/agent_port from the config
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,
}

pub async fn execute(args: ServeArgs, cli: &CliConfig) -> Result<()> {
    let config = cli.load_agent_config().await?;
    let settings = UpdateSettings::from_agent_config(&config)?;

    tracing::info!(
        agent = %config.agent_name,
        binary = %settings.live_binary.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting agent"
    );

    let updater = SelfUpdater::new(settings, Arc::new(SystemRunner::new()))?;
    let addr = args.listen.unwrap_or_else(|| config.listen_addr());
    let listener =
        TcpListener::bind(&addr).await.with_context(|| format!("Failed to bind {addr}"))?;

    let state = AppState {
        config: Arc::new(config),
        updater: Arc::new(updater),
    };

    server::serve(listener, state).await
}
