//! Permission pruner.
//!
//! Walks the resource hierarchy of each configured site and removes
//! permission grants held by denylisted principals. Projects (and their
//! default-permission templates) are swept parent-before-child with no
//! exemptions; workbooks and data sources honor a per-principal exemption
//! tag that lets a specific resource keep its grant.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tabsync_tableau::{
    DefaultPermissionKind, PermissionGrant, Project, Site, TableauClient,
};

use crate::error::EngineResult;
use crate::reconcile::RunReport;

/// Pruner configuration: one entry per site; unlisted sites are skipped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PruneConfig {
    #[serde(default)]
    pub sites: Vec<PruneSiteConfig>,
}

impl PruneConfig {
    fn for_site(&self, name: &str) -> Option<&PruneSiteConfig> {
        self.sites.iter().find(|s| s.name == name)
    }
}

/// Denylists for one site.
#[derive(Debug, Clone, Deserialize)]
pub struct PruneSiteConfig {
    /// Site name (not content URL).
    pub name: String,
    /// Principals whose grants are stripped from projects and their
    /// default-permission templates. Tags do not apply here.
    #[serde(default)]
    pub projects: Option<PrincipalSet>,
    /// Principals whose grants are stripped from workbooks and data
    /// sources, unless the resource carries the principal's exemption tag.
    #[serde(default)]
    pub content: Option<PrincipalSet>,
}

/// Users and groups denylisted for one resource class.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrincipalSet {
    #[serde(default)]
    pub users: Vec<PrincipalRule>,
    #[serde(default)]
    pub groups: Vec<PrincipalRule>,
}

/// One denylisted principal, by name, with an optional exemption tag.
#[derive(Debug, Clone, Deserialize)]
pub struct PrincipalRule {
    pub name: String,
    #[serde(default)]
    pub tag: Option<String>,
}

/// Order projects parent-before-child by repeatedly promoting children
/// whose parent has already been placed.
///
/// Projects whose parent id never resolves (permissions race, half-deleted
/// hierarchy) are appended at the end rather than looping forever.
#[must_use]
pub fn order_projects(projects: Vec<Project>) -> Vec<Project> {
    let mut ordered: Vec<Project> = Vec::new();
    let mut pending: Vec<Project> = Vec::new();
    for p in projects {
        if p.parent_project_id.is_none() {
            ordered.push(p);
        } else {
            pending.push(p);
        }
    }

    while !pending.is_empty() {
        let placed: HashSet<Uuid> = ordered.iter().map(|p| p.id).collect();
        let before = ordered.len();
        let mut still_pending = Vec::new();
        for p in pending {
            match p.parent_project_id {
                Some(parent) if placed.contains(&parent) => ordered.push(p),
                _ => still_pending.push(p),
            }
        }
        if ordered.len() == before {
            // No promotion this pass: the rest are orphans.
            warn!(
                orphans = still_pending.len(),
                "Projects with unresolvable parents; appending out of order"
            );
            ordered.extend(still_pending);
            break;
        }
        pending = still_pending;
    }
    ordered
}

/// A resolved denylist: principal id → rule that put it there.
#[derive(Debug, Default)]
struct DenyList {
    by_id: HashMap<Uuid, ResolvedPrincipal>,
}

#[derive(Debug, Clone)]
struct ResolvedPrincipal {
    name: String,
    tag: Option<String>,
}

impl DenyList {
    fn get(&self, id: Uuid) -> Option<&ResolvedPrincipal> {
        self.by_id.get(&id)
    }

    fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// The permission pruner for one run.
pub struct PermissionPruner<'a> {
    tableau: &'a TableauClient,
    config: &'a PruneConfig,
    dry_run: bool,
}

impl<'a> PermissionPruner<'a> {
    pub fn new(tableau: &'a TableauClient, config: &'a PruneConfig, dry_run: bool) -> Self {
        Self {
            tableau,
            config,
            dry_run,
        }
    }

    /// Sweep every configured site. Per-site faults are contained, logged,
    /// and reflected in the report, exactly like the sync engine.
    pub async fn run(&self) -> EngineResult<RunReport> {
        let sites = self.tableau.list_sites().await?;
        let mut report = RunReport::default();
        for site in &sites {
            let Some(site_config) = self.config.for_site(&site.name) else {
                debug!(site = %site.name, "Site not in pruner configuration; ignoring");
                continue;
            };
            match self.prune_site(site, site_config).await {
                Ok(()) => report.sites_synced += 1,
                Err(e) => {
                    error!(site = %site.name, error = %e, "Permission pruning failed");
                    report.sites_failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn prune_site(&self, site: &Site, config: &PruneSiteConfig) -> EngineResult<()> {
        info!(site = %site.name, "Start processing site");
        self.tableau.switch_site(&site.content_url).await?;

        if let Some(principals) = &config.projects {
            let deny = self.resolve(principals).await?;
            if deny.is_empty() {
                warn!(site = %site.name, "No project denylist principal resolved; nothing to prune");
            } else {
                self.prune_projects(&deny).await?;
            }
        }

        if let Some(principals) = &config.content {
            let deny = self.resolve(principals).await?;
            if deny.is_empty() {
                warn!(site = %site.name, "No content denylist principal resolved; nothing to prune");
            } else {
                self.prune_content(&deny).await?;
            }
        }
        Ok(())
    }

    /// Resolve configured principal names to ids on the active site. A
    /// name with no match is logged and dropped from the denylist.
    async fn resolve(&self, principals: &PrincipalSet) -> EngineResult<DenyList> {
        let mut deny = DenyList::default();

        if !principals.users.is_empty() {
            let users = self.tableau.list_users().await?;
            for rule in &principals.users {
                match users.iter().find(|u| u.name == rule.name) {
                    Some(user) => {
                        deny.by_id.insert(
                            user.id,
                            ResolvedPrincipal {
                                name: rule.name.clone(),
                                tag: rule.tag.clone(),
                            },
                        );
                    }
                    None => warn!(user = %rule.name, "Denylisted user not found on site"),
                }
            }
        }

        if !principals.groups.is_empty() {
            let groups = self.tableau.list_groups().await?;
            for rule in &principals.groups {
                match groups.iter().find(|g| g.name == rule.name) {
                    Some(group) => {
                        deny.by_id.insert(
                            group.id,
                            ResolvedPrincipal {
                                name: rule.name.clone(),
                                tag: rule.tag.clone(),
                            },
                        );
                    }
                    None => warn!(group = %rule.name, "Denylisted group not found on site"),
                }
            }
        }
        Ok(deny)
    }

    async fn prune_projects(&self, deny: &DenyList) -> EngineResult<()> {
        info!("Start processing projects");
        let projects = order_projects(self.tableau.list_projects().await?);

        for project in &projects {
            debug!(project = %project.name, "Processing project");

            for kind in DefaultPermissionKind::ALL {
                let grants = self
                    .tableau
                    .list_project_default_grants(project.id, kind)
                    .await?;
                for (grant, principal) in grants_to_remove(&grants, deny, None) {
                    info!(
                        project = %project.name,
                        kind = %kind,
                        principal = %principal.name,
                        capabilities = grant.capabilities.len(),
                        "Removing default-permission grant"
                    );
                    if self.dry_run {
                        continue;
                    }
                    self.tableau
                        .delete_project_default_grant(project.id, kind, grant)
                        .await?;
                }
            }

            let grants = self.tableau.list_project_grants(project.id).await?;
            for (grant, principal) in grants_to_remove(&grants, deny, None) {
                info!(
                    project = %project.name,
                    principal = %principal.name,
                    capabilities = grant.capabilities.len(),
                    "Removing project grant"
                );
                if self.dry_run {
                    continue;
                }
                self.tableau.delete_project_grant(project.id, grant).await?;
            }
        }
        Ok(())
    }

    async fn prune_content(&self, deny: &DenyList) -> EngineResult<()> {
        info!("Start processing workbooks");
        for workbook in self.tableau.list_workbooks().await? {
            debug!(workbook = %workbook.name, "Processing workbook");
            let grants = self.tableau.list_workbook_grants(workbook.id).await?;
            let tags: Vec<&str> = workbook.tags.tag.iter().map(|t| t.label.as_str()).collect();
            for (grant, principal) in grants_to_remove(&grants, deny, Some(&tags)) {
                info!(
                    workbook = %workbook.name,
                    principal = %principal.name,
                    capabilities = grant.capabilities.len(),
                    "Removing workbook grant"
                );
                if self.dry_run {
                    continue;
                }
                self.tableau.delete_workbook_grant(workbook.id, grant).await?;
            }
        }

        info!("Start processing datasources");
        for datasource in self.tableau.list_datasources().await? {
            debug!(datasource = %datasource.name, "Processing datasource");
            let grants = self.tableau.list_datasource_grants(datasource.id).await?;
            let tags: Vec<&str> = datasource
                .tags
                .tag
                .iter()
                .map(|t| t.label.as_str())
                .collect();
            for (grant, principal) in grants_to_remove(&grants, deny, Some(&tags)) {
                info!(
                    datasource = %datasource.name,
                    principal = %principal.name,
                    capabilities = grant.capabilities.len(),
                    "Removing datasource grant"
                );
                if self.dry_run {
                    continue;
                }
                self.tableau
                    .delete_datasource_grant(datasource.id, grant)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Select the grants a denylist removes from one resource, paired with
/// the principal that matched.
///
/// `resource_tags` is `None` for projects (no exemption) and the
/// resource's tag set for leaf resources: a principal whose rule carries a
/// tag present on the resource keeps its grant there.
fn grants_to_remove<'g, 'd>(
    grants: &'g [PermissionGrant],
    deny: &'d DenyList,
    resource_tags: Option<&[&str]>,
) -> Vec<(&'g PermissionGrant, &'d ResolvedPrincipal)> {
    grants
        .iter()
        .filter_map(|g| {
            let principal = deny.get(g.grantee.id)?;
            if let (Some(tags), Some(tag)) = (resource_tags, principal.tag.as_deref()) {
                if tags.contains(&tag) {
                    debug!(principal = %principal.name, tag = %tag, "Resource tagged; grant exempt");
                    return None;
                }
            }
            Some((g, principal))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsync_tableau::{Capability, Grantee, GranteeKind};

    fn project(id: u128, parent: Option<u128>) -> Project {
        Project {
            id: Uuid::from_u128(id),
            name: format!("p{id}"),
            parent_project_id: parent.map(Uuid::from_u128),
        }
    }

    fn grant(grantee_id: Uuid) -> PermissionGrant {
        PermissionGrant {
            grantee: Grantee {
                kind: GranteeKind::Group,
                id: grantee_id,
            },
            capabilities: vec![Capability {
                name: "Read".into(),
                mode: "Allow".into(),
            }],
        }
    }

    fn deny_with(id: Uuid, tag: Option<&str>) -> DenyList {
        let mut deny = DenyList::default();
        deny.by_id.insert(
            id,
            ResolvedPrincipal {
                name: "All Users".into(),
                tag: tag.map(String::from),
            },
        );
        deny
    }

    #[test]
    fn parents_precede_children() {
        let input = vec![
            project(3, Some(2)),
            project(1, None),
            project(2, Some(1)),
            project(4, None),
        ];
        let ordered = order_projects(input);
        let pos = |id: u128| {
            ordered
                .iter()
                .position(|p| p.id == Uuid::from_u128(id))
                .unwrap()
        };
        assert!(pos(1) < pos(2));
        assert!(pos(2) < pos(3));
    }

    #[test]
    fn orphaned_parent_does_not_loop() {
        // Parent id 99 never appears; ordering must still terminate.
        let input = vec![project(1, None), project(2, Some(99))];
        let ordered = order_projects(input);
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn denylisted_grant_selected() {
        let id = Uuid::from_u128(7);
        let grants = vec![grant(id), grant(Uuid::from_u128(8))];
        let deny = deny_with(id, None);
        let removed = grants_to_remove(&grants, &deny, None);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0.grantee.id, id);
        assert_eq!(removed[0].1.name, "All Users");
    }

    #[test]
    fn exemption_tag_keeps_grant_on_tagged_resource() {
        let id = Uuid::from_u128(7);
        let grants = vec![grant(id)];
        let deny = deny_with(id, Some("all_users_report"));

        let tagged: Vec<&str> = vec!["all_users_report"];
        assert!(grants_to_remove(&grants, &deny, Some(&tagged)).is_empty());

        let untagged: Vec<&str> = vec![];
        assert_eq!(grants_to_remove(&grants, &deny, Some(&untagged)).len(), 1);
    }

    #[test]
    fn tags_do_not_exempt_projects() {
        // Project sweep passes no tag context; the rule's tag is ignored.
        let id = Uuid::from_u128(7);
        let grants = vec![grant(id)];
        let deny = deny_with(id, Some("all_users_report"));
        assert_eq!(grants_to_remove(&grants, &deny, None).len(), 1);
    }
}
