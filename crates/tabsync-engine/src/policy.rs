//! Per-site policy records.
//!
//! Site-specific carve-outs are declarative configuration looked up once
//! per site, not conditionals scattered over the sync code: which sites
//! never prune stale users, and which group-name prefixes are externally
//! managed and must survive pruning.

use std::collections::HashMap;

use serde::Deserialize;

/// The built-in all-members group. System-managed: never created, never
/// deleted, and excluded from every group-level diff.
pub const ALL_USERS_GROUP: &str = "All Users";

fn default_true() -> bool {
    true
}

/// Policy carve-outs for one site.
#[derive(Debug, Clone, Deserialize)]
pub struct SitePolicy {
    /// When false, the site never prunes stale users (the user phase
    /// treats the stale set as empty).
    #[serde(default = "default_true")]
    pub prune_stale_users: bool,

    /// Group-name prefixes that are externally managed; matching groups
    /// are excluded from group deletion and membership reconciliation.
    #[serde(default)]
    pub protected_group_prefixes: Vec<String>,
}

impl Default for SitePolicy {
    fn default() -> Self {
        Self {
            prune_stale_users: true,
            protected_group_prefixes: Vec::new(),
        }
    }
}

impl SitePolicy {
    /// Whether a group name matches one of the protected prefixes.
    #[must_use]
    pub fn is_protected_group(&self, name: &str) -> bool {
        self.protected_group_prefixes
            .iter()
            .any(|p| name.starts_with(p.as_str()))
    }
}

/// Per-site policy table keyed by site name. Sites without an entry get
/// the default policy (prune everything, protect nothing).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct SitePolicies(HashMap<String, SitePolicy>);

impl SitePolicies {
    #[must_use]
    pub fn new(policies: HashMap<String, SitePolicy>) -> Self {
        Self(policies)
    }

    /// The policy for a site, defaulted when not configured.
    #[must_use]
    pub fn for_site(&self, site_name: &str) -> SitePolicy {
        self.0.get(site_name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_site_gets_default_policy() {
        let policies = SitePolicies::default();
        let p = policies.for_site("Finance");
        assert!(p.prune_stale_users);
        assert!(p.protected_group_prefixes.is_empty());
    }

    #[test]
    fn protected_prefix_matches() {
        let p = SitePolicy {
            prune_stale_users: false,
            protected_group_prefixes: vec!["F_".into(), "A_".into()],
        };
        assert!(p.is_protected_group("F_Finance"));
        assert!(p.is_protected_group("A_Admins"));
        assert!(!p.is_protected_group("BI_Reporting"));
    }

    #[test]
    fn policies_deserialize_from_map() {
        let yaml_like = r#"{"ERS":{"prune_stale_users":false,"protected_group_prefixes":["F_","A_"]}}"#;
        let policies: SitePolicies = serde_json::from_str(yaml_like).unwrap();
        let p = policies.for_site("ERS");
        assert!(!p.prune_stale_users);
        assert!(p.is_protected_group("F_X"));
    }
}
