//! tabsync — synchronize AD users and groups with Tableau Server.
//!
//! Three batch jobs behind one binary:
//! - `sync`: three-phase per-site reconciliation (users, groups, members)
//! - `clean-permissions`: strip denylisted permission grants
//! - `offboard`: escalating notices for leaving users who own content

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::warn;

mod commands;
mod config;
mod error;
mod hrms;
mod logging;
mod mail;
mod zabbix;

use config::AppConfig;
use error::CliResult;

#[derive(Parser)]
#[command(name = "tabsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "TABSYNC_CONFIG",
        default_value = "/etc/tabsync/tabsync.yaml"
    )]
    config: PathBuf,

    /// Log every would-be change without performing any
    #[arg(long, global = true)]
    noop: bool,

    /// Enable debug logging for the tabsync crates
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize directory users, groups, and memberships to Tableau
    Sync(commands::sync::SyncArgs),

    /// Remove denylisted permission grants across the content hierarchy
    CleanPermissions(commands::clean_permissions::CleanPermissionsArgs),

    /// Notify about leaving users who still own Tableau content
    Offboard(commands::offboard::OffboardArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.debug);

    if cli.noop {
        warn!("Dry-run mode: no changes will be made");
    }

    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = AppConfig::load(&cli.config)?;
    match cli.command {
        Commands::Sync(args) => commands::sync::execute(config, args, cli.noop).await,
        Commands::CleanPermissions(args) => {
            commands::clean_permissions::execute(config, args, cli.noop).await
        }
        Commands::Offboard(args) => commands::offboard::execute(config, args, cli.noop).await,
    }
}
