//! CLI error types and exit codes.

use thiserror::Error;

/// Exit codes:
/// - 0: all sites reconciled without error
/// - 1: at least one site raised an unhandled fault
/// - 2: configuration or startup failure (no partial output)
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Directory(#[from] tabsync_directory::DirectoryError),

    #[error(transparent)]
    Tableau(#[from] tabsync_tableau::TableauError),

    #[error(transparent)]
    Engine(#[from] tabsync_engine::EngineError),

    #[error("HR system request failed: {0}")]
    Hrms(String),

    #[error("{failed} site(s) failed to reconcile")]
    SitesFailed { failed: usize },
}

impl CliError {
    /// Map the error to the process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::SitesFailed { .. } => 1,
            CliError::Config(_)
            | CliError::Directory(_)
            | CliError::Tableau(_)
            | CliError::Engine(_)
            | CliError::Hrms(_) => 2,
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Config(format!("I/O error: {e}"))
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(e: serde_yaml::Error) -> Self {
        CliError::Config(format!("YAML error: {e}"))
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Config(format!("JSON error: {e}"))
    }
}

impl From<reqwest::Error> for CliError {
    fn from(e: reqwest::Error) -> Self {
        CliError::Hrms(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_failures_exit_one() {
        assert_eq!(CliError::SitesFailed { failed: 2 }.exit_code(), 1);
    }

    #[test]
    fn config_errors_exit_two() {
        assert_eq!(CliError::Config("bad".into()).exit_code(), 2);
    }
}
