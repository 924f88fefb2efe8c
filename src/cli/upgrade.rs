//! `update`: run the self-update cycle from the command line.
//!
//! Unlike the HTTP trigger, this runs in the foreground and prints the
//! outcome. On a host with a supervisor the final restart stops the running
//! daemon, not this process. Without one, this process never exits itself;
//! it tells the operator to restart the agent instead.

use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cli::CliConfig;
use crate::service::{CommandRunner, SystemRunner};
use crate::upgrade::{RollbackOutcome, SelfUpdater, UpdateOutcome, UpdateRequest, UpdateSettings};

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Version label, used for logging only
    #[arg(value_name = "VERSION", default_value = "manual")]
    pub version: String,

    /// Download URL, used when the config has no server_url
    #[arg(long)]
    pub url: Option<String>,

    /// Expected checksum: bare hex MD5 or sha256:<hex>
    #[arg(long)]
    pub checksum: Option<String>,

    /// Restore the backed-up binary instead of updating
    #[arg(long, conflicts_with_all = ["url", "checksum"])]
    pub rollback: bool,
}

pub async fn execute(args: UpdateArgs, cli: &CliConfig) -> Result<()> {
    let config = cli.load_agent_config().await?;
    let mut settings = UpdateSettings::from_agent_config(&config)?;
    // Nothing to acknowledge on the command line
    settings.settle_delay = std::time::Duration::ZERO;

    let (updater, restart_needed) = foreground_updater(settings, Arc::new(SystemRunner::new()))?;

    let result = if args.rollback {
        handle_rollback(&updater).await
    } else {
        handle_update(&updater, args).await
    };

    if restart_needed.load(Ordering::SeqCst) {
        println!(
            "{}",
            "No service supervisor detected; restart configflow-agent to run the installed binary"
                .yellow()
        );
    }
    result
}

/// An updater whose no-supervisor restart records the request instead of
/// exiting the calling process.
pub fn foreground_updater(
    settings: UpdateSettings,
    runner: Arc<dyn CommandRunner>,
) -> Result<(SelfUpdater, Arc<AtomicBool>)> {
    let restart_needed = Arc::new(AtomicBool::new(false));
    let flag = restart_needed.clone();
    let updater = SelfUpdater::new(settings, runner)?
        .with_exit_handler(Arc::new(move || flag.store(true, Ordering::SeqCst)))?;
    Ok((updater, restart_needed))
}

async fn handle_update(updater: &SelfUpdater, args: UpdateArgs) -> Result<()> {
    let request = UpdateRequest {
        version: args.version,
        download_url: args.url.unwrap_or_default(),
        md5sum: args.checksum,
    };

    println!("{}", format!("Updating agent to {}...", request.version).cyan());

    match updater.update(request).await? {
        UpdateOutcome::Updated {
            version,
            status,
        } => {
            println!("{}", format!("Updated to {version}, service is {status}").green());
            Ok(())
        }
        UpdateOutcome::RolledBack {
            cause,
        } => {
            println!("{}", "New binary failed to start; previous version restored".yellow());
            bail!(cause)
        }
        UpdateOutcome::Degraded {
            cause,
            restart_error,
        } => {
            eprintln!("{}", "Previous version restored but the service is not running".red());
            eprintln!("  restart error: {restart_error}");
            bail!(cause)
        }
    }
}

async fn handle_rollback(updater: &SelfUpdater) -> Result<()> {
    println!("{}", "Rolling back to previous version...".yellow());

    if !updater.backup().backup_exists() {
        bail!("No backup found at {}. Cannot rollback.", updater.backup().backup_path().display());
    }

    match updater.rollback().await? {
        RollbackOutcome::Recovered => {
            println!("{}", "Successfully rolled back to previous version".green());
            Ok(())
        }
        RollbackOutcome::Degraded(e) => {
            eprintln!("{}", "Previous version restored but the service did not start".red());
            bail!(e)
        }
    }
}
