//! Tableau client error types.

use thiserror::Error;

/// Result type for Tableau operations.
pub type TableauResult<T> = Result<T, TableauError>;

/// Fault code Tableau returns when a user targeted for removal is already
/// gone. Stale list pages can still report such users, so callers treat
/// this as success.
const CODE_USER_ALREADY_REMOVED: &str = "409003";

/// Errors raised by the Tableau client.
#[derive(Debug, Error)]
pub enum TableauError {
    #[error("invalid Tableau configuration: {0}")]
    InvalidConfig(String),

    #[error("not signed in to Tableau Server")]
    NotSignedIn,

    #[error("Tableau request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tableau API error {code} (HTTP {status}): {summary}: {detail}")]
    Api {
        status: u16,
        code: String,
        summary: String,
        detail: String,
    },

    #[error("unexpected Tableau response: {0}")]
    UnexpectedResponse(String),
}

impl TableauError {
    /// Whether this fault means "the entity is already absent" — a benign
    /// outcome for any deletion.
    #[must_use]
    pub fn is_benign_absent(&self) -> bool {
        match self {
            TableauError::Api { status, code, .. } => {
                *status == 404 || code == CODE_USER_ALREADY_REMOVED || code.starts_with("404")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, code: &str) -> TableauError {
        TableauError::Api {
            status,
            code: code.to_string(),
            summary: String::new(),
            detail: String::new(),
        }
    }

    #[test]
    fn already_removed_code_is_benign() {
        assert!(api(409, "409003").is_benign_absent());
    }

    #[test]
    fn not_found_is_benign() {
        assert!(api(404, "404002").is_benign_absent());
    }

    #[test]
    fn conflict_is_not_benign() {
        assert!(!api(409, "409017").is_benign_absent());
        assert!(!api(400, "400000").is_benign_absent());
    }
}
