//! Membership phase: align each group's member list with the directory.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};
use uuid::Uuid;

use tabsync_tableau::Site;

use crate::error::EngineResult;
use crate::policy::{SitePolicy, ALL_USERS_GROUP};
use crate::reconcile::ReconciliationEngine;

/// Account names on each side of one group's membership diff,
/// lexicographically ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipDiff {
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
}

/// Compute the membership diff for one group.
#[must_use]
pub fn diff_members(
    directory_members: &BTreeSet<String>,
    target_members: &BTreeSet<String>,
) -> MembershipDiff {
    MembershipDiff {
        to_add: directory_members
            .difference(target_members)
            .cloned()
            .collect(),
        to_remove: target_members
            .difference(directory_members)
            .cloned()
            .collect(),
    }
}

impl ReconciliationEngine<'_> {
    pub(crate) async fn sync_site_memberships(
        &mut self,
        site: &Site,
        policy: &SitePolicy,
    ) -> EngineResult<()> {
        debug!(site = %site.name, "Revising group members");
        let groups = self.tableau.list_groups().await?;
        // User ids for additions come from the site's full listing.
        let site_users: HashMap<String, Uuid> = self
            .tableau
            .list_users()
            .await?
            .into_iter()
            .map(|u| (u.name, u.id))
            .collect();

        for group in groups
            .iter()
            .filter(|g| g.name != ALL_USERS_GROUP)
            .filter(|g| !policy.is_protected_group(&g.name))
        {
            let members = self.tableau.list_group_members(group.id).await?;
            let target_names: BTreeSet<String> =
                members.iter().map(|m| m.name.clone()).collect();
            let member_ids: HashMap<&str, Uuid> =
                members.iter().map(|m| (m.name.as_str(), m.id)).collect();

            let Some(directory_group) =
                self.directory.find_group_by_account_name(&group.name).await?
            else {
                warn!(group = %group.name, "No matching directory group; leaving membership untouched");
                continue;
            };
            let directory_names: BTreeSet<String> = self
                .directory
                .list_enabled_members(&directory_group.dn)
                .await?
                .into_iter()
                .map(|u| u.account_name)
                .collect();

            let diff = diff_members(&directory_names, &target_names);
            if !diff.to_add.is_empty() {
                info!(group = %group.name, members = ?diff.to_add, "New members");
            }
            if !diff.to_remove.is_empty() {
                info!(group = %group.name, members = ?diff.to_remove, "Old members");
            }

            for name in &diff.to_add {
                let Some(&user_id) = site_users.get(name) else {
                    warn!(user = %name, group = %group.name, "Cannot add member: user not found on site");
                    continue;
                };
                info!(user = %name, group = %group.name, "Adding member");
                if self.dry_run {
                    continue;
                }
                self.tableau.add_group_member(group.id, user_id).await?;
            }

            for name in &diff.to_remove {
                let Some(&user_id) = member_ids.get(name.as_str()) else {
                    continue;
                };
                info!(user = %name, group = %group.name, "Removing member");
                if self.dry_run {
                    continue;
                }
                self.tableau.remove_group_member(group.id, user_id).await?;
            }
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
    fn add_and_remove_sides() {
        let directory = names(&["alice", "bob"]);
        let target = names(&["bob", "carol"]);
        let diff = diff_members(&directory, &target);
        assert_eq!(diff.to_add, vec!["alice".to_string()]);
        assert_eq!(diff.to_remove, vec!["carol".to_string()]);
    }

    #[test]
    fn converged_membership_is_empty_diff() {
        let both = names(&["alice", "bob"]);
        let diff = diff_members(&both, &both);
        assert!(diff.to_add.is_empty());
        assert!(diff.to_remove.is_empty());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let directory = names(&["zoe", "ann", "mike"]);
        let target = names(&[]);
        let diff = diff_members(&directory, &target);
        assert_eq!(diff.to_add, vec!["ann", "mike", "zoe"]);
    }
}
