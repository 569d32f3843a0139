//! `tabsync clean-permissions` — the permission-grant pruning sweep.

use clap::Args;
use tracing::info;

use tabsync_engine::PermissionPruner;
use tabsync_tableau::TableauClient;

use crate::config::AppConfig;
use crate::error::{CliError, CliResult};

#[derive(Debug, Args)]
pub struct CleanPermissionsArgs {}

pub async fn execute(config: AppConfig, _args: CleanPermissionsArgs, dry_run: bool) -> CliResult<()> {
    if config.prune.sites.is_empty() {
        return Err(CliError::Config(
            "prune section lists no sites; nothing to clean".into(),
        ));
    }

    let tableau = TableauClient::new(config.tableau.clone())?;
    tableau.sign_in("").await?;

    let pruner = PermissionPruner::new(&tableau, &config.prune, dry_run);
    let run_result = pruner.run().await;
    let _ = tableau.sign_out().await;

    let report = run_result?;
    info!(
        cleaned = report.sites_synced,
        failed = report.sites_failed,
        "Permission cleaning finished"
    );
    if report.success() {
        Ok(())
    } else {
        Err(CliError::SitesFailed {
            failed: report.sites_failed,
        })
    }
}
