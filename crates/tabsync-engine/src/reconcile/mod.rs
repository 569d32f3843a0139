//! Site reconciliation orchestration.
//!
//! One invocation per run: list Tableau sites, intersect with the
//! directory OUs that represent sync-eligible scopes, and reconcile each
//! common site in three phases — users, then groups, then memberships.
//! A failure inside one site is caught at the site boundary and never
//! aborts the remaining sites; it only marks the overall run failed.

pub mod groups;
pub mod members;
pub mod users;

use std::collections::BTreeSet;

use tracing::{error, info};

use tabsync_directory::DirectoryClient;
use tabsync_tableau::{Site, TableauClient};

use crate::error::EngineResult;
use crate::mail::Mailer;
use crate::notify::NotificationGate;
use crate::policy::SitePolicies;

pub use groups::{diff_groups, GroupDiff};
pub use members::{diff_members, MembershipDiff};
pub use users::{classify_stale, diff_users, StaleOutcome, UserDiff};

/// Outcome of a whole run, driving the process exit code.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunReport {
    pub sites_synced: usize,
    pub sites_failed: usize,
}

impl RunReport {
    /// True when every site reconciled without an unhandled fault.
    #[must_use]
    pub fn success(&self) -> bool {
        self.sites_failed == 0
    }
}

/// The AD → Tableau reconciliation engine for one run.
///
/// Holds the per-run context explicitly: the two authenticated clients,
/// the policy table, the notification gate, and the mail collaborator.
pub struct ReconciliationEngine<'a> {
    pub(crate) directory: &'a DirectoryClient,
    pub(crate) tableau: &'a TableauClient,
    pub(crate) policies: &'a SitePolicies,
    pub(crate) service_accounts: BTreeSet<String>,
    pub(crate) gate: &'a mut NotificationGate,
    pub(crate) mailer: &'a dyn Mailer,
    pub(crate) dry_run: bool,
}

impl<'a> ReconciliationEngine<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directory: &'a DirectoryClient,
        tableau: &'a TableauClient,
        policies: &'a SitePolicies,
        service_accounts: BTreeSet<String>,
        gate: &'a mut NotificationGate,
        mailer: &'a dyn Mailer,
        dry_run: bool,
    ) -> Self {
        Self {
            directory,
            tableau,
            policies,
            service_accounts,
            gate,
            mailer,
            dry_run,
        }
    }

    /// Reconcile every site common to the directory and the server.
    ///
    /// `site_filter` restricts the run to the site with that content URL.
    /// Startup faults (listing sites or scopes) abort; per-site faults are
    /// contained and reflected in the report.
    pub async fn run(&mut self, site_filter: Option<&str>) -> EngineResult<RunReport> {
        let scopes = self.directory.resolve_sync_scopes().await?;
        let sites = self.tableau.list_sites().await?;
        info!(
            directory_scopes = %join_sorted(scopes.iter()),
            tableau_sites = %join_sorted(sites.iter().map(|s| &s.name)),
            "Resolved sync scopes"
        );

        let mut common: Vec<Site> = sites
            .into_iter()
            .filter(|s| scopes.contains(&s.name))
            .collect();
        if let Some(filter) = site_filter {
            common.retain(|s| s.content_url == filter);
        }
        common.sort_by(|a, b| a.name.cmp(&b.name));
        info!(sites = %join_sorted(common.iter().map(|s| &s.name)), "Sites selected for sync");

        let mut report = RunReport::default();
        for site in &common {
            match self.sync_site(site).await {
                Ok(()) => report.sites_synced += 1,
                Err(e) => {
                    error!(site = %site.name, error = %e, "Site reconciliation failed");
                    report.sites_failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Reconcile one site: users, then groups, then memberships.
    async fn sync_site(&mut self, site: &Site) -> EngineResult<()> {
        info!(site = %site.name, content_url = %site.content_url, "Starting site sync");
        self.tableau.switch_site(&site.content_url).await?;
        let policy = self.policies.for_site(&site.name);

        self.sync_site_users(site, &policy).await?;
        self.sync_site_groups(site, &policy).await?;
        self.sync_site_memberships(site, &policy).await?;

        info!(site = %site.name, "Site sync complete");
        Ok(())
    }
}

fn join_sorted<'s, I>(names: I) -> String
where
    I: Iterator<Item = &'s String>,
{
    let mut v: Vec<&str> = names.map(String::as_str).collect();
    v.sort_unstable();
    v.join(", ")
}
