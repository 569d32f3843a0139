//! Application configuration.
//!
//! One YAML file carries every section; optional sections disable the
//! corresponding collaborator (no `mail` section means notices are only
//! logged, no `zabbix` section means no metric push).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use tabsync_directory::DirectoryConfig;
use tabsync_engine::{PruneConfig, SitePolicies};
use tabsync_tableau::TableauConfig;

use crate::error::{CliError, CliResult};

fn default_state_file() -> PathBuf {
    PathBuf::from("/var/lib/tabsync/notifications.json")
}

fn default_relay_port() -> u16 {
    25
}

fn default_mail_from() -> String {
    "tabsync@localhost".to_string()
}

fn default_agent_conf() -> PathBuf {
    PathBuf::from("/etc/zabbix/zabbix_agentd.conf")
}

fn default_lookahead_days() -> i64 {
    30
}

fn default_lookback_days() -> i64 {
    7
}

/// Top-level configuration file.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub directory: DirectoryConfig,
    pub tableau: TableauConfig,

    /// Account names excluded from every user-level diff in both
    /// directions.
    #[serde(default)]
    pub service_accounts: Vec<String>,

    /// Notification-state file (the only cross-run persistence).
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Per-site sync policy carve-outs.
    #[serde(default)]
    pub policies: SitePolicies,

    #[serde(default)]
    pub mail: Option<MailConfig>,

    #[serde(default)]
    pub zabbix: Option<ZabbixConfig>,

    /// Permission-pruner denylists (`clean-permissions`).
    #[serde(default)]
    pub prune: PruneConfig,

    /// HR-driven offboarding notifier (`offboard`).
    #[serde(default)]
    pub offboard: Option<OffboardConfig>,
}

/// Outbound mail relay settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub relay_host: String,
    #[serde(default = "default_relay_port")]
    pub relay_port: u16,
    #[serde(default = "default_mail_from")]
    pub from: String,
    /// Default recipient list.
    pub to: Vec<String>,
}

/// Zabbix sender settings: the server and local hostname come from the
/// agent's own configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ZabbixConfig {
    #[serde(default = "default_agent_conf")]
    pub agent_conf: PathBuf,
    /// Item key the health metric is pushed under.
    pub item: String,
}

/// Offboarding notifier settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OffboardConfig {
    /// HR system (OData) base URL.
    pub hrms_url: String,
    pub company_id: String,
    pub client_id: String,
    /// SAML bearer assertion for the OAuth token exchange.
    pub assertion: String,
    /// Handlebars template for the notification body.
    pub template: PathBuf,
    /// Recipients of the offboarding notices.
    pub recipients: Vec<String>,
    /// How far ahead to look for departures.
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: i64,
    /// How far back departures remain reportable.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
}

impl AppConfig {
    /// Read and validate the configuration file.
    pub fn load(path: &Path) -> CliResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("cannot read '{}': {e}", path.display()))
        })?;
        let config: AppConfig = serde_yaml::from_str(&raw)?;
        config.directory.validate()?;
        config.tableau.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
directory:
  host: ad.example.com
  bind_dn: CN=svc-tabsync,OU=Service,DC=example,DC=com
  bind_password: secret
  sync_root_ou: OU=Tableau,DC=example,DC=com
  users_root_ou: OU=Staff,DC=example,DC=com
tableau:
  server_url: https://tableau.example.com
  username: admin
  password: secret
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_loads() {
        let f = write_config(MINIMAL);
        let cfg = AppConfig::load(f.path()).unwrap();
        assert!(cfg.mail.is_none());
        assert!(cfg.zabbix.is_none());
        assert!(cfg.service_accounts.is_empty());
        assert_eq!(cfg.state_file, default_state_file());
    }

    #[test]
    fn full_sections_load() {
        let full = format!(
            "{MINIMAL}
service_accounts: [tabadmin, tabbackup]
policies:
  ERS:
    prune_stale_users: false
    protected_group_prefixes: [\"F_\", \"A_\"]
mail:
  relay_host: mail.example.com
  to: [bi-admins@example.com]
zabbix:
  item: tabsync.status
prune:
  sites:
    - name: Default
      projects:
        groups:
          - name: All Users
      content:
        groups:
          - name: All Users
            tag: all_users_report
        users:
          - name: guest
            tag: keep_guest
"
        );
        let f = write_config(&full);
        let cfg = AppConfig::load(f.path()).unwrap();
        assert!(!cfg.policies.for_site("ERS").prune_stale_users);
        assert!(cfg.policies.for_site("ERS").is_protected_group("F_X"));
        assert_eq!(cfg.prune.sites.len(), 1);
        assert_eq!(cfg.mail.unwrap().relay_port, 25);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = AppConfig::load(Path::new("/nonexistent/tabsync.yaml")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
