//! Directory client implementation.
//!
//! Wraps a single bound `ldap3` connection. The connection is opened once
//! per run and reused for all operations; there is no pooling and no retry.

use std::collections::{BTreeSet, HashSet};

use chrono::Utc;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, info, warn};

use crate::config::DirectoryConfig;
use crate::error::{DirectoryError, DirectoryResult};
use crate::expand::GroupFrontier;
use crate::filter::{enabled_account_filter, escape_filter_value};
use crate::model::{DirectoryGroup, DirectoryUser};

const MEMBER_ATTRS: [&str; 5] = [
    "name",
    "distinguishedName",
    "mail",
    "sAMAccountName",
    "objectCategory",
];

/// Read-only client over the directory tree.
pub struct DirectoryClient {
    config: DirectoryConfig,
    ldap: Ldap,
}

enum MemberKind {
    Person(DirectoryUser),
    Group { dn: String },
    Other,
}

impl DirectoryClient {
    /// Connect and bind. Fatal on any fault: a directory that cannot be
    /// reached aborts the whole run.
    pub async fn connect(config: DirectoryConfig) -> DirectoryResult<Self> {
        config.validate()?;

        let url = config.url();
        debug!(url = %url, "Connecting to directory");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(std::time::Duration::from_secs(config.timeout_secs));
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| DirectoryError::Connect {
                url: url.clone(),
                source: e,
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "Directory connection driver error");
            }
        });

        let result = ldap
            .simple_bind(&config.bind_dn, &config.bind_password)
            .await
            .map_err(|e| DirectoryError::Bind {
                bind_dn: config.bind_dn.clone(),
                reason: e.to_string(),
            })?;
        if result.rc != 0 {
            return Err(DirectoryError::Bind {
                bind_dn: config.bind_dn.clone(),
                reason: format!("code {}: {}", result.rc, result.text),
            });
        }

        info!(host = %config.host, "Directory connection established");
        Ok(Self { config, ldap })
    }

    /// List the names of child OUs directly under the sync root. Each is a
    /// candidate site scope.
    pub async fn resolve_sync_scopes(&self) -> DirectoryResult<BTreeSet<String>> {
        let entries = self
            .search(
                &self.config.sync_root_ou,
                Scope::OneLevel,
                "(objectClass=organizationalUnit)",
                vec!["name", "distinguishedName"],
            )
            .await?;
        Ok(entries
            .iter()
            .filter_map(|e| first_attr(e, "name"))
            .collect())
    }

    /// List the groups directly under a site's OU.
    pub async fn list_site_groups(&self, site: &str) -> DirectoryResult<Vec<DirectoryGroup>> {
        let base = format!("OU={},{}", site, self.config.sync_root_ou);
        let entries = self
            .search(
                &base,
                Scope::OneLevel,
                "(objectClass=group)",
                vec!["name", "distinguishedName", "member"],
            )
            .await?;
        Ok(entries.iter().map(group_from_entry).collect())
    }

    /// Recursively expand a group into the flat set of its enabled person
    /// members, deduplicated by account name.
    ///
    /// The member graph may nest arbitrarily and may contain cycles; a
    /// visited set keyed by group DN guarantees termination and expands
    /// shared sub-groups exactly once.
    pub async fn list_enabled_members(
        &self,
        group_dn: &str,
    ) -> DirectoryResult<Vec<DirectoryUser>> {
        let mut users: Vec<DirectoryUser> = Vec::new();
        let mut seen_accounts: HashSet<String> = HashSet::new();
        let mut frontier = GroupFrontier::new(group_dn);

        while let Some(dn) = frontier.next_group() {
            for member_dn in self.read_member_dns(&dn).await? {
                match self.classify_member(&member_dn).await? {
                    MemberKind::Person(user) => {
                        if seen_accounts.contains(&user.account_name) {
                            continue;
                        }
                        if self.is_account_enabled(&user.dn).await? {
                            seen_accounts.insert(user.account_name.clone());
                            users.push(user);
                        }
                    }
                    MemberKind::Group { dn } => {
                        frontier.push_group(&dn);
                    }
                    MemberKind::Other => {}
                }
            }
        }

        debug!(group = %group_dn, members = users.len(), "Expanded group membership");
        Ok(users)
    }

    /// Union of `list_enabled_members` across all of a site's groups,
    /// deduplicated by account name.
    pub async fn list_site_members(&self, site: &str) -> DirectoryResult<Vec<DirectoryUser>> {
        let mut users: Vec<DirectoryUser> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for group in self.list_site_groups(site).await? {
            for user in self.list_enabled_members(&group.dn).await? {
                if seen.insert(user.account_name.clone()) {
                    users.push(user);
                }
            }
        }
        Ok(users)
    }

    /// Look up a person account by `sAMAccountName` under the users root.
    pub async fn find_user_by_account_name(
        &self,
        name: &str,
    ) -> DirectoryResult<Option<DirectoryUser>> {
        let filter = format!(
            "(&(objectCategory=person)(objectClass=user)(sAMAccountName={}))",
            escape_filter_value(name)
        );
        let entries = self
            .search(
                &self.config.users_root_ou,
                Scope::Subtree,
                &filter,
                MEMBER_ATTRS.to_vec(),
            )
            .await?;
        match entries.into_iter().next() {
            Some(entry) => {
                let mut user = user_from_entry(&entry);
                user.enabled = self.is_account_enabled(&user.dn).await?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// Look up a group by name under the sync root.
    pub async fn find_group_by_account_name(
        &self,
        name: &str,
    ) -> DirectoryResult<Option<DirectoryGroup>> {
        let filter = format!("(name={})", escape_filter_value(name));
        let entries = self
            .search(
                &self.config.sync_root_ou,
                Scope::Subtree,
                &filter,
                vec!["name", "distinguishedName", "member"],
            )
            .await?;
        Ok(entries.first().map(group_from_entry))
    }

    /// Point-in-time enabled check: the account has not expired and does not
    /// carry the disabled bit. A vanished entry counts as disabled.
    async fn is_account_enabled(&self, dn: &str) -> DirectoryResult<bool> {
        let filter = enabled_account_filter(Utc::now().timestamp());
        let entries = self
            .search(dn, Scope::Base, &filter, vec!["distinguishedName"])
            .await?;
        Ok(!entries.is_empty())
    }

    async fn read_member_dns(&self, group_dn: &str) -> DirectoryResult<Vec<String>> {
        let entries = self
            .search(
                group_dn,
                Scope::Base,
                "(objectClass=*)",
                vec!["name", "member"],
            )
            .await?;
        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| DirectoryError::EntryNotFound {
                dn: group_dn.to_string(),
            })?;
        Ok(entry.attrs.get("member").cloned().unwrap_or_default())
    }

    async fn classify_member(&self, member_dn: &str) -> DirectoryResult<MemberKind> {
        let entries = self
            .search(
                member_dn,
                Scope::Base,
                "(objectClass=*)",
                MEMBER_ATTRS.to_vec(),
            )
            .await?;
        let Some(entry) = entries.into_iter().next() else {
            // Referenced member no longer resolves; treat as removed.
            warn!(dn = %member_dn, "Group member entry not found, skipping");
            return Ok(MemberKind::Other);
        };

        let category = first_attr(&entry, "objectCategory").unwrap_or_default();
        if category.starts_with("CN=Person") {
            Ok(MemberKind::Person(user_from_entry(&entry)))
        } else if category.starts_with("CN=Group") {
            Ok(MemberKind::Group {
                dn: first_attr(&entry, "distinguishedName").unwrap_or_else(|| entry.dn.clone()),
            })
        } else {
            Ok(MemberKind::Other)
        }
    }

    async fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: Vec<&str>,
    ) -> DirectoryResult<Vec<SearchEntry>> {
        let mut ldap = self.ldap.clone();
        let result = ldap
            .search(base, scope, filter, attrs)
            .await
            .map_err(|e| DirectoryError::Search {
                base: base.to_string(),
                source: e,
            })?;
        // "No such object" on a base-scope lookup is an empty result, not a
        // fault: stale member references are expected in the wild.
        if result.1.rc == 32 {
            return Ok(Vec::new());
        }
        let (entries, _res) = result.success().map_err(|e| DirectoryError::Search {
            base: base.to_string(),
            source: e,
        })?;
        Ok(entries.into_iter().map(SearchEntry::construct).collect())
    }
}

fn first_attr(entry: &SearchEntry, name: &str) -> Option<String> {
    entry.attrs.get(name).and_then(|v| v.first().cloned())
}

fn user_from_entry(entry: &SearchEntry) -> DirectoryUser {
    DirectoryUser {
        account_name: first_attr(entry, "sAMAccountName").unwrap_or_default(),
        display_name: first_attr(entry, "name").unwrap_or_default(),
        email: first_attr(entry, "mail"),
        dn: first_attr(entry, "distinguishedName").unwrap_or_else(|| entry.dn.clone()),
        enabled: true,
    }
}

fn group_from_entry(entry: &SearchEntry) -> DirectoryGroup {
    DirectoryGroup {
        name: first_attr(entry, "name").unwrap_or_default(),
        dn: first_attr(entry, "distinguishedName").unwrap_or_else(|| entry.dn.clone()),
        member_dns: entry.attrs.get("member").cloned().unwrap_or_default(),
    }
}
