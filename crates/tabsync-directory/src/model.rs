//! Directory entry snapshots.
//!
//! Records are immutable per read; the directory is never mutated by this
//! system. The account name (`sAMAccountName`) is the only correlation key
//! between directory users and target-system users.

use serde::Serialize;

/// A user account read from the directory.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryUser {
    /// Account name (`sAMAccountName`); the correlation key.
    pub account_name: String,
    /// Display name (`name`).
    pub display_name: String,
    /// Mail address, when set.
    pub email: Option<String>,
    /// Distinguished name.
    pub dn: String,
    /// Whether the account was enabled at read time (not expired and not
    /// marked disabled in `userAccountControl`).
    pub enabled: bool,
}

/// A group read from the directory.
///
/// Member DNs may refer to users or to other groups; the member graph can
/// contain cycles and must only be expanded with a visited-set guard.
#[derive(Debug, Clone)]
pub struct DirectoryGroup {
    /// Group name.
    pub name: String,
    /// Distinguished name; the stable identifier used for cycle detection.
    pub dn: String,
    /// Direct member DNs, unresolved.
    pub member_dns: Vec<String>,
}
