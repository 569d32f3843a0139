//! `tabsync sync` — the AD → Tableau reconciliation run.

use std::collections::BTreeSet;

use clap::Args;
use tracing::info;

use tabsync_directory::DirectoryClient;
use tabsync_engine::{Mailer, NotificationGate, ReconciliationEngine};
use tabsync_tableau::TableauClient;

use crate::config::AppConfig;
use crate::error::{CliError, CliResult};
use crate::mail::{LogOnlyMailer, SmtpRelayMailer};
use crate::zabbix::{self, ZabbixSender};

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Sync only the site with this content URL
    #[arg(short = 's', long)]
    pub site: Option<String>,

    /// Push a test value to Zabbix and exit
    #[arg(long)]
    pub zabbix_test: bool,
}

pub async fn execute(config: AppConfig, args: SyncArgs, dry_run: bool) -> CliResult<()> {
    if args.zabbix_test {
        let zabbix = config
            .zabbix
            .as_ref()
            .ok_or_else(|| CliError::Config("no zabbix section configured".into()))?;
        ZabbixSender::from_agent_conf(zabbix)?.send(1).await?;
        return Ok(());
    }

    // Startup faults are fatal: reconciling against partial data is worse
    // than not reconciling at all.
    let directory = DirectoryClient::connect(config.directory.clone()).await?;
    let tableau = TableauClient::new(config.tableau.clone())?;
    tableau.sign_in("").await?;

    let mut gate = NotificationGate::load(&config.state_file)?;
    let mailer: Box<dyn Mailer> = match (&config.mail, dry_run) {
        (Some(mail), false) => Box::new(SmtpRelayMailer::new(mail.clone())),
        _ => Box::new(LogOnlyMailer),
    };
    let service_accounts: BTreeSet<String> = config.service_accounts.iter().cloned().collect();

    let mut engine = ReconciliationEngine::new(
        &directory,
        &tableau,
        &config.policies,
        service_accounts,
        &mut gate,
        mailer.as_ref(),
        dry_run,
    );
    let run_result = engine.run(args.site.as_deref()).await;

    let health = match &run_result {
        Ok(report) if report.success() => 0,
        _ => 1,
    };
    zabbix::push_health(config.zabbix.as_ref(), health).await;
    let _ = tableau.sign_out().await;

    let report = run_result?;
    info!(
        synced = report.sites_synced,
        failed = report.sites_failed,
        "Sync run finished"
    );
    if report.success() {
        Ok(())
    } else {
        Err(CliError::SitesFailed {
            failed: report.sites_failed,
        })
    }
}
