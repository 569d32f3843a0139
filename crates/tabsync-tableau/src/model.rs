//! Tableau REST API data model.
//!
//! Wire shapes follow the REST API's JSON envelopes (camelCase keys,
//! numbers inside `pagination` encoded as strings).

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Site role classification.
///
/// The full set the wire format names; tabsync itself only ever assigns
/// [`SiteRole::Interactor`] and [`SiteRole::Unlicensed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteRole {
    Creator,
    Explorer,
    ExplorerCanPublish,
    Guest,
    Interactor,
    Publisher,
    ReadOnly,
    ServerAdministrator,
    SiteAdministrator,
    SiteAdministratorCreator,
    SiteAdministratorExplorer,
    Unlicensed,
    UnlicensedWithPublish,
    Viewer,
    ViewerWithPublish,
}

impl SiteRole {
    /// The "no license" state.
    #[must_use]
    pub fn is_unlicensed(self) -> bool {
        matches!(self, SiteRole::Unlicensed | SiteRole::UnlicensedWithPublish)
    }

    /// The privileged administrator state that must never be deleted or
    /// demoted automatically.
    #[must_use]
    pub fn is_server_administrator(self) -> bool {
        matches!(self, SiteRole::ServerAdministrator)
    }
}

impl fmt::Display for SiteRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

fn u64_from_string<'de, D>(de: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(de)?;
    s.parse().map_err(serde::de::Error::custom)
}

/// Paging envelope; Tableau encodes the counters as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(deserialize_with = "u64_from_string")]
    pub page_number: u64,
    #[serde(deserialize_with = "u64_from_string")]
    pub page_size: u64,
    #[serde(deserialize_with = "u64_from_string")]
    pub total_available: u64,
}

/// A named partition of the server with its own users, groups, and
/// permission space.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: Uuid,
    pub name: String,
    /// URL path segment; empty for the default site.
    #[serde(default)]
    pub content_url: String,
}

/// A user account on the active site.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub site_role: SiteRole,
}

/// Attribute updates applied to an existing user. `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_role: Option<SiteRole>,
}

/// A group on the active site.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: Uuid,
    pub name: String,
}

/// A user as listed inside a group's membership.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub id: Uuid,
    pub name: String,
}

/// A project; `parent_project_id` links nested sub-projects.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub parent_project_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagList {
    #[serde(default)]
    pub tag: Vec<Tag>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRef {
    pub id: Uuid,
}

/// The project a workbook lives in, as embedded in workbook listings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
}

/// A workbook on the active site.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workbook {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub tags: TagList,
    #[serde(default)]
    pub owner: Option<OwnerRef>,
    #[serde(default)]
    pub project: Option<ProjectRef>,
}

impl Workbook {
    #[must_use]
    pub fn has_tag(&self, label: &str) -> bool {
        self.tags.tag.iter().any(|t| t.label == label)
    }
}

/// A published data source on the active site.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datasource {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub tags: TagList,
}

impl Datasource {
    #[must_use]
    pub fn has_tag(&self, label: &str) -> bool {
        self.tags.tag.iter().any(|t| t.label == label)
    }
}

/// Principal kind on a permission grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GranteeKind {
    User,
    Group,
}

impl fmt::Display for GranteeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GranteeKind::User => write!(f, "user"),
            GranteeKind::Group => write!(f, "group"),
        }
    }
}

impl GranteeKind {
    /// URL path segment used by permission-deletion endpoints.
    #[must_use]
    pub fn path_segment(self) -> &'static str {
        match self {
            GranteeKind::User => "users",
            GranteeKind::Group => "groups",
        }
    }
}

/// The principal a grant belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Grantee {
    pub kind: GranteeKind,
    pub id: Uuid,
}

/// One capability inside a grant (name + allow/deny mode).
#[derive(Debug, Clone, Deserialize)]
pub struct Capability {
    pub name: String,
    pub mode: String,
}

/// A (principal, capability-set) pair attached to a resource.
#[derive(Debug, Clone)]
pub struct PermissionGrant {
    pub grantee: Grantee,
    pub capabilities: Vec<Capability>,
}

/// Resource kinds that carry default-permission templates on a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultPermissionKind {
    DataRoles,
    Datasources,
    Flows,
    Lenses,
    Metrics,
    Workbooks,
}

impl DefaultPermissionKind {
    /// All template kinds, in the order the pruner sweeps them.
    pub const ALL: [DefaultPermissionKind; 6] = [
        DefaultPermissionKind::DataRoles,
        DefaultPermissionKind::Datasources,
        DefaultPermissionKind::Flows,
        DefaultPermissionKind::Lenses,
        DefaultPermissionKind::Metrics,
        DefaultPermissionKind::Workbooks,
    ];

    /// URL path segment under `default-permissions/`.
    #[must_use]
    pub fn path_segment(self) -> &'static str {
        match self {
            DefaultPermissionKind::DataRoles => "dataroles",
            DefaultPermissionKind::Datasources => "datasources",
            DefaultPermissionKind::Flows => "flows",
            DefaultPermissionKind::Lenses => "lenses",
            DefaultPermissionKind::Metrics => "metrics",
            DefaultPermissionKind::Workbooks => "workbooks",
        }
    }
}

impl fmt::Display for DefaultPermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path_segment())
    }
}

// --- Wire envelopes (crate-internal) ---

#[derive(Debug, Deserialize)]
pub(crate) struct IdRef {
    pub id: Uuid,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GranteeCapabilities {
    #[serde(default)]
    pub group: Option<IdRef>,
    #[serde(default)]
    pub user: Option<IdRef>,
    #[serde(default)]
    pub capabilities: CapabilityList,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CapabilityList {
    #[serde(default)]
    pub capability: Vec<Capability>,
}

impl GranteeCapabilities {
    /// Collapse the either/or grantee shape into a typed grant; entries
    /// with neither a user nor a group reference are dropped.
    pub(crate) fn into_grant(self) -> Option<PermissionGrant> {
        let grantee = if let Some(g) = self.group {
            Grantee {
                kind: GranteeKind::Group,
                id: g.id,
            }
        } else if let Some(u) = self.user {
            Grantee {
                kind: GranteeKind::User,
                id: u.id,
            }
        } else {
            return None;
        };
        Some(PermissionGrant {
            grantee,
            capabilities: self.capabilities.capability,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_role_classification() {
        assert!(SiteRole::Unlicensed.is_unlicensed());
        assert!(SiteRole::UnlicensedWithPublish.is_unlicensed());
        assert!(!SiteRole::Interactor.is_unlicensed());
        assert!(SiteRole::ServerAdministrator.is_server_administrator());
        assert!(!SiteRole::SiteAdministrator.is_server_administrator());
    }

    #[test]
    fn pagination_parses_string_counters() {
        let p: Pagination = serde_json::from_str(
            r#"{"pageNumber":"2","pageSize":"1000","totalAvailable":"1034"}"#,
        )
        .unwrap();
        assert_eq!(p.page_number, 2);
        assert_eq!(p.total_available, 1034);
    }

    #[test]
    fn grantee_capabilities_collapse() {
        let raw: GranteeCapabilities = serde_json::from_str(
            r#"{"group":{"id":"11111111-2222-3333-4444-555555555555"},
                "capabilities":{"capability":[{"name":"Read","mode":"Allow"}]}}"#,
        )
        .unwrap();
        let grant = raw.into_grant().unwrap();
        assert_eq!(grant.grantee.kind, GranteeKind::Group);
        assert_eq!(grant.capabilities.len(), 1);
    }

    #[test]
    fn workbook_tags_default_to_empty() {
        let wb: Workbook = serde_json::from_str(
            r#"{"id":"11111111-2222-3333-4444-555555555555","name":"Sales"}"#,
        )
        .unwrap();
        assert!(!wb.has_tag("anything"));
    }
}
