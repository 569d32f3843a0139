//! Directory connection configuration.

use serde::Deserialize;

use crate::error::{DirectoryError, DirectoryResult};

fn default_port() -> u16 {
    636
}

fn default_use_ssl() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

/// Configuration for the directory connection.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Directory server hostname.
    pub host: String,

    /// Directory server port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Whether to connect over LDAPS.
    #[serde(default = "default_use_ssl")]
    pub use_ssl: bool,

    /// Bind DN for the service account.
    pub bind_dn: String,

    /// Bind password.
    pub bind_password: String,

    /// Root OU whose direct child OUs are the sync-eligible site scopes.
    pub sync_root_ou: String,

    /// Root OU under which user accounts are searched.
    pub users_root_ou: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl DirectoryConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.host.is_empty() {
            return Err(DirectoryError::InvalidConfig("host is required".into()));
        }
        if self.bind_dn.is_empty() {
            return Err(DirectoryError::InvalidConfig("bind_dn is required".into()));
        }
        if self.sync_root_ou.is_empty() {
            return Err(DirectoryError::InvalidConfig(
                "sync_root_ou is required".into(),
            ));
        }
        if self.users_root_ou.is_empty() {
            return Err(DirectoryError::InvalidConfig(
                "users_root_ou is required".into(),
            ));
        }
        Ok(())
    }

    /// The connection URL derived from host/port/TLS settings.
    pub fn url(&self) -> String {
        if self.use_ssl {
            format!("ldaps://{}:{}", self.host, self.port)
        } else {
            format!("ldap://{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DirectoryConfig {
        DirectoryConfig {
            host: "ad.example.com".into(),
            port: 636,
            use_ssl: true,
            bind_dn: "CN=svc-tabsync,OU=Service,DC=example,DC=com".into(),
            bind_password: "secret".into(),
            sync_root_ou: "OU=Tableau,DC=example,DC=com".into(),
            users_root_ou: "OU=Staff,DC=example,DC=com".into(),
            timeout_secs: 30,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn missing_host_rejected() {
        let mut cfg = sample();
        cfg.host = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn url_reflects_tls() {
        let mut cfg = sample();
        assert_eq!(cfg.url(), "ldaps://ad.example.com:636");
        cfg.use_ssl = false;
        cfg.port = 389;
        assert_eq!(cfg.url(), "ldap://ad.example.com:389");
    }
}
