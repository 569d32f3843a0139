//! Directory client error types.

use thiserror::Error;

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Errors raised by the directory client.
///
/// Every variant is fatal to the run: the client performs no retries, and
/// callers are expected to abort rather than reconcile against partial
/// directory data.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("invalid directory configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to connect to directory at {url}")]
    Connect {
        url: String,
        #[source]
        source: ldap3::LdapError,
    },

    #[error("directory bind failed for {bind_dn}: {reason}")]
    Bind { bind_dn: String, reason: String },

    #[error("directory search under '{base}' failed")]
    Search {
        base: String,
        #[source]
        source: ldap3::LdapError,
    },

    #[error("directory entry '{dn}' not found")]
    EntryNotFound { dn: String },
}
