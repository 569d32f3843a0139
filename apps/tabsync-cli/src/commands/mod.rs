//! Subcommand implementations.

pub mod clean_permissions;
pub mod offboard;
pub mod sync;
