//! User phase: stale removal, fresh provisioning, attribute sync.

use std::collections::{BTreeSet, HashMap};

use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, warn};

use tabsync_tableau::{Site, SiteRole, User, UserUpdate};

use crate::error::EngineResult;
use crate::mail::OutboundMail;
use crate::policy::SitePolicy;
use crate::reconcile::ReconciliationEngine;

/// Generated passwords: 32 alphanumeric characters, never reused, never
/// logged.
const GENERATED_PASSWORD_LEN: usize = 32;

/// Minimum gap between repeated stale-administrator notices per subject.
const ADMIN_NOTICE_GAP_DAYS: i64 = 3;

/// Names on each side of the user diff, lexicographically ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDiff {
    /// On the server but no longer in the directory.
    pub stale: Vec<String>,
    /// In the directory but not on the server (with a license).
    pub fresh: Vec<String>,
}

/// Compute the user-phase diff.
///
/// Stale is measured against all server users; fresh against the
/// non-unlicensed ones, so a previously demoted account that reappears in
/// the directory is re-listed as fresh and gets promoted instead of
/// colliding with a duplicate create. Service accounts are excluded in
/// both directions. A site that never prunes gets an empty stale set.
#[must_use]
pub fn diff_users(
    directory_names: &BTreeSet<String>,
    target_users: &[User],
    service_accounts: &BTreeSet<String>,
    policy: &SitePolicy,
) -> UserDiff {
    let all_names: BTreeSet<String> = target_users.iter().map(|u| u.name.clone()).collect();
    let licensed_names: BTreeSet<String> = target_users
        .iter()
        .filter(|u| !u.site_role.is_unlicensed())
        .map(|u| u.name.clone())
        .collect();

    let stale = if policy.prune_stale_users {
        all_names
            .difference(directory_names)
            .filter(|n| !service_accounts.contains(*n))
            .cloned()
            .collect()
    } else {
        Vec::new()
    };
    let fresh = directory_names
        .difference(&licensed_names)
        .filter(|n| !service_accounts.contains(*n))
        .cloned()
        .collect();

    UserDiff { stale, fresh }
}

/// What to do with one stale user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleOutcome {
    /// Privileged administrators are never deleted or demoted; they get a
    /// rate-limited notice for manual review.
    NotifyAdmin,
    /// No owned content: safe to delete.
    Delete,
    /// Owns content: revoke the license instead of deleting.
    Demote,
    /// Already demoted; leave untouched.
    AlreadyUnlicensed,
}

/// Decide the fate of a stale user from its role and owned-content count.
#[must_use]
pub fn classify_stale(role: SiteRole, owned_workbooks: usize) -> StaleOutcome {
    if role.is_server_administrator() {
        StaleOutcome::NotifyAdmin
    } else if owned_workbooks == 0 {
        StaleOutcome::Delete
    } else if role.is_unlicensed() {
        StaleOutcome::AlreadyUnlicensed
    } else {
        StaleOutcome::Demote
    }
}

impl ReconciliationEngine<'_> {
    pub(crate) async fn sync_site_users(
        &mut self,
        site: &Site,
        policy: &SitePolicy,
    ) -> EngineResult<()> {
        debug!(site = %site.name, "Revising users");
        let target_users = self.tableau.list_users().await?;
        let directory_users = self.directory.list_site_members(&site.name).await?;
        let directory_names: BTreeSet<String> = directory_users
            .iter()
            .map(|u| u.account_name.clone())
            .collect();

        let diff = diff_users(&directory_names, &target_users, &self.service_accounts, policy);
        if !policy.prune_stale_users {
            info!(site = %site.name, "Policy: stale users are never pruned on this site");
        }
        if !diff.stale.is_empty() {
            info!(site = %site.name, stale = ?diff.stale, "Stale users");
        }
        if !diff.fresh.is_empty() {
            info!(site = %site.name, fresh = ?diff.fresh, "Fresh users");
        }

        let by_name: HashMap<&str, &User> =
            target_users.iter().map(|u| (u.name.as_str(), u)).collect();

        for name in &diff.stale {
            let Some(user) = by_name.get(name.as_str()) else {
                continue;
            };
            self.remove_stale_user(user).await?;
        }

        for name in &diff.fresh {
            self.provision_fresh_user(name, by_name.get(name.as_str()).copied())
                .await?;
        }

        self.sync_user_attributes().await?;
        Ok(())
    }

    /// Stale-user handling. Per-unit faults (a failed owned-content
    /// lookup) skip the user and leave the phase running.
    async fn remove_stale_user(&mut self, user: &User) -> EngineResult<()> {
        if user.site_role.is_server_administrator() {
            info!(user = %user.name, "Stale user is a server administrator; notifying instead of removing");
            self.notify_stale_admin(&user.name).await?;
            return Ok(());
        }

        let owned = match self.tableau.list_user_workbooks(user.id).await {
            Ok(workbooks) => workbooks
                .iter()
                .filter(|w| w.owner.as_ref().is_some_and(|o| o.id == user.id))
                .count(),
            Err(e) => {
                warn!(user = %user.name, error = %e, "Failed to list owned workbooks; skipping user");
                return Ok(());
            }
        };

        match classify_stale(user.site_role, owned) {
            StaleOutcome::Delete => {
                if self.dry_run {
                    info!(user = %user.name, "Dry run: would remove user");
                    return Ok(());
                }
                let removed = self.tableau.remove_user(user.id).await?;
                if removed {
                    info!(user = %user.name, "Removed user");
                }
            }
            StaleOutcome::Demote => {
                info!(user = %user.name, owned_workbooks = owned, role = %user.site_role,
                      "User owns content; demoting to Unlicensed instead of removing");
                if self.dry_run {
                    info!(user = %user.name, "Dry run: would demote user");
                    return Ok(());
                }
                let update = UserUpdate {
                    site_role: Some(SiteRole::Unlicensed),
                    ..UserUpdate::default()
                };
                self.tableau.update_user(user.id, &update).await?;
            }
            StaleOutcome::AlreadyUnlicensed => {
                debug!(user = %user.name, "Already unlicensed; skipping");
            }
            // Handled above; classify_stale keeps the branch for callers
            // that work from plain data.
            StaleOutcome::NotifyAdmin => {}
        }
        Ok(())
    }

    async fn notify_stale_admin(&mut self, name: &str) -> EngineResult<()> {
        if self.dry_run {
            info!(user = %name, "Dry run: would send stale-administrator notice");
            return Ok(());
        }
        let now = Utc::now();
        if !self
            .gate
            .notice_due(name, now, Duration::days(ADMIN_NOTICE_GAP_DAYS))
        {
            debug!(user = %name, "Stale-administrator notice already sent recently");
            return Ok(());
        }
        let server = self.tableau.server_url();
        let mail = OutboundMail {
            subject: format!("tabsync found a stale server administrator on {server}"),
            text_body: format!(
                "tabsync on {server} found a server administrator that is no longer \
                 present in the directory and cannot remove the account automatically.\n\
                 Stale administrator: {name}\n\
                 Please review the account manually."
            ),
            html_body: None,
        };
        self.mailer.send(&mail).await;
        self.gate.record_notice(name, now)?;
        Ok(())
    }

    /// Fresh-user handling: promote an existing unlicensed account, or
    /// create a new one seeded from the directory record.
    async fn provision_fresh_user(
        &mut self,
        name: &str,
        existing: Option<&User>,
    ) -> EngineResult<()> {
        if let Some(user) = existing {
            // Present but unlicensed: promote instead of re-creating.
            info!(user = %name, "Promoting existing unlicensed user to Interactor");
            if self.dry_run {
                return Ok(());
            }
            let update = UserUpdate {
                site_role: Some(SiteRole::Interactor),
                ..UserUpdate::default()
            };
            self.tableau.update_user(user.id, &update).await?;
            return Ok(());
        }

        let Some(record) = self.directory.find_user_by_account_name(name).await? else {
            warn!(user = %name, "Directory record vanished before creation; skipping");
            return Ok(());
        };
        info!(user = %name, "Creating user");
        if self.dry_run {
            return Ok(());
        }
        let created = self.tableau.add_user(name, SiteRole::Interactor).await?;
        let update = UserUpdate {
            full_name: Some(record.display_name.clone()),
            email: record.email.clone(),
            password: Some(generate_password()),
            site_role: None,
        };
        self.tableau.update_user(created.id, &update).await?;
        Ok(())
    }

    /// Attribute-sync pass over the current licensed, non-service users:
    /// pull the directory display name when it drifted. A failed detail
    /// lookup is logged and the user skipped — the server is known to
    /// report users deleted earlier in this same run.
    async fn sync_user_attributes(&mut self) -> EngineResult<()> {
        debug!("Revising user attributes");
        let users = self.tableau.list_users().await?;
        for user in users
            .iter()
            .filter(|u| !u.site_role.is_unlicensed())
            .filter(|u| !self.service_accounts.contains(&u.name))
        {
            let detail = match self.tableau.get_user(user.id).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(user = %user.name, error = %e, "Failed to fetch user detail; skipping");
                    continue;
                }
            };
            let Some(record) = self
                .directory
                .find_user_by_account_name(&detail.name)
                .await?
            else {
                continue;
            };
            if detail.full_name.as_deref() != Some(record.display_name.as_str()) {
                info!(
                    user = %detail.name,
                    from = %detail.full_name.as_deref().unwrap_or(""),
                    to = %record.display_name,
                    "Updating full name from directory"
                );
                if self.dry_run {
                    continue;
                }
                let update = UserUpdate {
                    full_name: Some(record.display_name.clone()),
                    email: record.email.clone(),
                    ..UserUpdate::default()
                };
                self.tableau.update_user(detail.id, &update).await?;
            }
        }
        Ok(())
    }
}

fn generate_password() -> String {
    let rng = rand::thread_rng();
    rng.sample_iter(Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user(name: &str, role: SiteRole) -> User {
        User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            full_name: None,
            email: None,
            site_role: role,
        }
    }

    fn names(v: &[&str]) -> BTreeSet<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn basic_diff() {
        let directory = names(&["alice", "bob"]);
        let target = vec![
            user("alice", SiteRole::Interactor),
            user("carol", SiteRole::Interactor),
        ];
        let diff = diff_users(&directory, &target, &BTreeSet::new(), &SitePolicy::default());
        assert_eq!(diff.stale, vec!["carol".to_string()]);
        assert_eq!(diff.fresh, vec!["bob".to_string()]);
    }

    #[test]
    fn service_accounts_excluded_both_ways() {
        let directory = names(&["svc-reader", "alice"]);
        let target = vec![
            user("svc-writer", SiteRole::Interactor),
            user("alice", SiteRole::Interactor),
        ];
        let service = names(&["svc-reader", "svc-writer"]);
        let diff = diff_users(&directory, &target, &service, &SitePolicy::default());
        assert!(diff.stale.is_empty());
        assert!(diff.fresh.is_empty());
    }

    #[test]
    fn no_prune_policy_empties_stale() {
        let directory = names(&[]);
        let target = vec![user("carol", SiteRole::Interactor)];
        let policy = SitePolicy {
            prune_stale_users: false,
            protected_group_prefixes: Vec::new(),
        };
        let diff = diff_users(&directory, &target, &BTreeSet::new(), &policy);
        assert!(diff.stale.is_empty());
    }

    #[test]
    fn unlicensed_directory_user_is_fresh_again() {
        // A demoted account that reappears in the directory must be
        // promoted, not duplicated.
        let directory = names(&["bob"]);
        let target = vec![user("bob", SiteRole::Unlicensed)];
        let diff = diff_users(&directory, &target, &BTreeSet::new(), &SitePolicy::default());
        assert_eq!(diff.fresh, vec!["bob".to_string()]);
        assert!(diff.stale.is_empty());
    }

    #[test]
    fn converged_site_has_empty_diff() {
        let directory = names(&["alice", "bob"]);
        let target = vec![
            user("alice", SiteRole::Interactor),
            user("bob", SiteRole::Viewer),
        ];
        let diff = diff_users(&directory, &target, &BTreeSet::new(), &SitePolicy::default());
        assert!(diff.stale.is_empty());
        assert!(diff.fresh.is_empty());
    }

    #[test]
    fn stale_classification() {
        assert_eq!(
            classify_stale(SiteRole::ServerAdministrator, 5),
            StaleOutcome::NotifyAdmin
        );
        assert_eq!(classify_stale(SiteRole::Interactor, 0), StaleOutcome::Delete);
        assert_eq!(classify_stale(SiteRole::Interactor, 1), StaleOutcome::Demote);
        assert_eq!(
            classify_stale(SiteRole::Unlicensed, 3),
            StaleOutcome::AlreadyUnlicensed
        );
        // Nothing owned: even an unlicensed account is safe to delete.
        assert_eq!(classify_stale(SiteRole::Unlicensed, 0), StaleOutcome::Delete);
    }

    #[test]
    fn generated_password_shape() {
        let pw = generate_password();
        assert_eq!(pw.len(), 32);
        assert!(pw.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(pw, generate_password());
    }
}
