//! `status`: resolve a service's status.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::sync::Arc;

use crate::cli::CliConfig;
use crate::constants::AGENT_SERVICE_NAME;
use crate::service::{ServiceStatus, StatusResolver, SystemRunner};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Service to query (default: service_name from the config)
    #[arg(value_name = "SERVICE")]
    pub service: Option<String>,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: StatusArgs, cli: &CliConfig) -> Result<()> {
    let service = match args.service {
        Some(service) => service,
        None => default_service(cli).await,
    };

    let resolver = StatusResolver::with_default_chain(Arc::new(SystemRunner::new()));
    let (status, source) = resolver.resolve_with_source(&service).await;
    let supervisor = resolver.detect_supervisor();

    if args.json {
        let body = serde_json::json!({
            "service": service,
            "status": status,
            "running": status.is_running(),
            "supervisor": supervisor,
            "source": source,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let label = match status {
        ServiceStatus::Active => status.as_str().green(),
        ServiceStatus::Inactive => status.as_str().red(),
        ServiceStatus::Unknown => status.as_str().yellow(),
    };
    println!("{service}: {label}");
    println!("  supervisor: {supervisor}");
    if let Some(source) = source {
        println!("  answered by: {source}");
    }
    Ok(())
}

async fn default_service(cli: &CliConfig) -> String {
    match cli.load_agent_config().await {
        Ok(config) if !config.service_name.is_empty() => config.service_name,
        Ok(config) => config.agent_service_name,
        Err(e) => {
            tracing::debug!("No usable config ({:#}); querying the agent service", e);
            AGENT_SERVICE_NAME.to_string()
        }
    }
}
