//! # Directory client
//!
//! Read-only view over the Active Directory tree that drives tabsync:
//! site-scope OUs, recursive (and possibly cyclic) group membership, and
//! point-in-time enabled-account checks.
//!
//! The directory is the source of truth and is never written to. Any
//! connection or query fault is fatal to the run: a transient outage must
//! abort the sync rather than let it proceed with partial data.

pub mod client;
pub mod config;
pub mod error;
mod expand;
pub mod filter;
pub mod model;

pub use client::DirectoryClient;
pub use config::DirectoryConfig;
pub use error::{DirectoryError, DirectoryResult};
pub use model::{DirectoryGroup, DirectoryUser};
