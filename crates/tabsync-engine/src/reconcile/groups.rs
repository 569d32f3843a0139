//! Group phase: create missing groups, delete orphaned ones.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};
use uuid::Uuid;

use tabsync_tableau::Site;

use crate::error::EngineResult;
use crate::policy::{SitePolicy, ALL_USERS_GROUP};
use crate::reconcile::ReconciliationEngine;

/// Group names on each side of the diff, lexicographically ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDiff {
    /// In the directory but not on the server.
    pub new: Vec<String>,
    /// On the server but not in the directory.
    pub old: Vec<String>,
}

/// Compute the group-phase diff.
///
/// The reserved all-members group is unconditionally excluded from the
/// old side, as are groups matching the site's protected prefixes.
#[must_use]
pub fn diff_groups(
    directory_names: &BTreeSet<String>,
    target_names: &BTreeSet<String>,
    policy: &SitePolicy,
) -> GroupDiff {
    let new = directory_names.difference(target_names).cloned().collect();
    let old = target_names
        .difference(directory_names)
        .filter(|n| n.as_str() != ALL_USERS_GROUP)
        .filter(|n| !policy.is_protected_group(n))
        .cloned()
        .collect();
    GroupDiff { new, old }
}

impl ReconciliationEngine<'_> {
    pub(crate) async fn sync_site_groups(
        &mut self,
        site: &Site,
        policy: &SitePolicy,
    ) -> EngineResult<()> {
        debug!(site = %site.name, "Revising groups");
        let directory_names: BTreeSet<String> = self
            .directory
            .list_site_groups(&site.name)
            .await?
            .into_iter()
            .map(|g| g.name)
            .collect();
        let target_groups = self.tableau.list_groups().await?;
        let target_names: BTreeSet<String> =
            target_groups.iter().map(|g| g.name.clone()).collect();
        let by_name: HashMap<&str, Uuid> = target_groups
            .iter()
            .map(|g| (g.name.as_str(), g.id))
            .collect();

        let diff = diff_groups(&directory_names, &target_names, policy);
        if !diff.new.is_empty() {
            info!(site = %site.name, new = ?diff.new, "New groups");
        }
        if !diff.old.is_empty() {
            info!(site = %site.name, old = ?diff.old, "Old groups");
        }

        for name in &diff.new {
            info!(group = %name, "Creating group");
            if self.dry_run {
                continue;
            }
            self.tableau.create_group(name).await?;
        }

        for name in &diff.old {
            let Some(&id) = by_name.get(name.as_str()) else {
                warn!(group = %name, "Group disappeared before deletion; skipping");
                continue;
            };
            info!(group = %name, "Removing group");
            if self.dry_run {
                continue;
            }
            self.tableau.delete_group(id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> BTreeSet<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn all_users_never_listed_as_old() {
        let directory = names(&[]);
        let target = names(&[ALL_USERS_GROUP, "BI_Old"]);
        let diff = diff_groups(&directory, &target, &SitePolicy::default());
        assert_eq!(diff.old, vec!["BI_Old".to_string()]);
    }

    #[test]
    fn protected_prefixes_survive() {
        let directory = names(&[]);
        let target = names(&["F_Managed", "A_Managed", "BI_Old", ALL_USERS_GROUP]);
        let policy = SitePolicy {
            prune_stale_users: true,
            protected_group_prefixes: vec!["F_".into(), "A_".into()],
        };
        let diff = diff_groups(&directory, &target, &policy);
        assert_eq!(diff.old, vec!["BI_Old".to_string()]);
    }

    #[test]
    fn new_groups_from_directory() {
        let directory = names(&["BI_Sales", "BI_Ops"]);
        let target = names(&["BI_Sales", ALL_USERS_GROUP]);
        let diff = diff_groups(&directory, &target, &SitePolicy::default());
        assert_eq!(diff.new, vec!["BI_Ops".to_string()]);
        assert!(diff.old.is_empty());
    }

    #[test]
    fn converged_site_has_empty_diff() {
        let directory = names(&["BI_Sales"]);
        let target = names(&["BI_Sales", ALL_USERS_GROUP]);
        let diff = diff_groups(&directory, &target, &SitePolicy::default());
        assert!(diff.new.is_empty());
        assert!(diff.old.is_empty());
    }
}
