//! Tableau Server connection configuration.

use serde::Deserialize;

use crate::error::{TableauError, TableauResult};

fn default_api_version() -> String {
    "3.22".to_string()
}

fn default_verify_tls() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_page_size() -> u64 {
    1000
}

/// Configuration for the Tableau Server connection.
#[derive(Debug, Clone, Deserialize)]
pub struct TableauConfig {
    /// Server base URL, e.g. `https://tableau.example.com`.
    pub server_url: String,

    /// Sign-in user name (server administrator).
    pub username: String,

    /// Sign-in password.
    pub password: String,

    /// REST API version segment.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Whether to verify the server certificate.
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Page size for listings.
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

impl TableauConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> TableauResult<()> {
        if self.server_url.is_empty() {
            return Err(TableauError::InvalidConfig("server_url is required".into()));
        }
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(TableauError::InvalidConfig(format!(
                "server_url must be an http(s) URL, got '{}'",
                self.server_url
            )));
        }
        if self.username.is_empty() {
            return Err(TableauError::InvalidConfig("username is required".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bare_hostname() {
        let cfg = TableauConfig {
            server_url: "tableau.example.com".into(),
            username: "admin".into(),
            password: "pw".into(),
            api_version: default_api_version(),
            verify_tls: true,
            timeout_secs: 120,
            page_size: 1000,
        };
        assert!(cfg.validate().is_err());
    }
}
