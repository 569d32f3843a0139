//! # Tableau Server client
//!
//! Paginated read/write view over the Tableau Server REST API: sites,
//! users, groups, group memberships, content, and permission grants.
//!
//! Every mutation is a single remote call with no local transaction; a
//! just-created entity's id must be re-read within the same run when it is
//! needed. All site-scoped calls require a signed-in session whose active
//! site is switched first.

pub mod client;
pub mod config;
pub mod error;
pub mod model;

pub use client::TableauClient;
pub use config::TableauConfig;
pub use error::{TableauError, TableauResult};
pub use model::{
    Capability, Datasource, DefaultPermissionKind, Grantee, GranteeKind, Group, GroupMember,
    PermissionGrant, Project, ProjectRef, Site, SiteRole, User, UserUpdate, Workbook,
};
