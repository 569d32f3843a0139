//! Engine error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfacing from a reconciliation or pruning run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Directory(#[from] tabsync_directory::DirectoryError),

    #[error(transparent)]
    Tableau(#[from] tabsync_tableau::TableauError),

    #[error("notification state store '{path}': {source}")]
    State {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notification state store '{path}' is corrupt")]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
