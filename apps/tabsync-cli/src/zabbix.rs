//! Zabbix sender-protocol metric push.
//!
//! One numeric health metric per run. The server address and the local
//! hostname are taken from the Zabbix agent's own configuration file, so
//! the value lands on the same monitored host the agent reports as.
//! Failures are logged, never fatal.

use std::path::Path;

use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::ZabbixConfig;
use crate::error::{CliError, CliResult};

const DEFAULT_PORT: u16 = 10051;
const PROTOCOL_HEADER: &[u8; 5] = b"ZBXD\x01";

/// Pushes values to a Zabbix server over the sender protocol.
pub struct ZabbixSender {
    server: String,
    port: u16,
    hostname: String,
    item: String,
}

impl ZabbixSender {
    /// Build a sender from the agent configuration file named in
    /// `config` (`ServerActive=` and `Hostname=` lines).
    pub fn from_agent_conf(config: &ZabbixConfig) -> CliResult<Self> {
        let raw = std::fs::read_to_string(&config.agent_conf).map_err(|e| {
            CliError::Config(format!(
                "cannot read zabbix agent conf '{}': {e}",
                config.agent_conf.display()
            ))
        })?;
        let (server, port) = parse_server_active(&raw).ok_or_else(|| {
            CliError::Config(format!(
                "no ServerActive line in '{}'",
                config.agent_conf.display()
            ))
        })?;
        let hostname = conf_value(&raw, "Hostname").ok_or_else(|| {
            CliError::Config(format!(
                "no Hostname line in '{}'",
                config.agent_conf.display()
            ))
        })?;
        Ok(Self {
            server,
            port,
            hostname,
            item: config.item.clone(),
        })
    }

    /// Push one value. Errors are returned for the caller to log; nothing
    /// here is fatal to a run.
    pub async fn send(&self, value: i64) -> std::io::Result<()> {
        let payload = json!({
            "request": "sender data",
            "data": [{
                "host": self.hostname,
                "key": self.item,
                "value": value.to_string(),
            }],
        })
        .to_string();

        debug!(server = %self.server, port = self.port, payload = %payload, "Pushing zabbix metric");
        let mut stream = TcpStream::connect((self.server.as_str(), self.port)).await?;

        let mut frame = Vec::with_capacity(13 + payload.len());
        frame.extend_from_slice(PROTOCOL_HEADER);
        frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        frame.extend_from_slice(payload.as_bytes());
        stream.write_all(&frame).await?;

        let mut header = [0u8; 13];
        stream.read_exact(&mut header).await?;
        if &header[..5] != PROTOCOL_HEADER {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unexpected zabbix response header",
            ));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&header[5..13]);
        let len = u64::from_le_bytes(len_bytes);
        let mut body = vec![0u8; len as usize];
        stream.read_exact(&mut body).await?;

        match serde_json::from_slice::<SenderResponse>(&body) {
            Ok(resp) => info!(item = %self.item, value, info = %resp.info, "Zabbix accepted metric"),
            Err(_) => warn!(item = %self.item, "Unparseable zabbix response"),
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SenderResponse {
    #[serde(default)]
    info: String,
}

/// Push the run-health value, logging instead of failing when Zabbix is
/// unreachable or unconfigured.
pub async fn push_health(config: Option<&ZabbixConfig>, value: i64) {
    let Some(config) = config else {
        debug!("No zabbix section configured; skipping metric push");
        return;
    };
    match ZabbixSender::from_agent_conf(config) {
        Ok(sender) => {
            if let Err(e) = sender.send(value).await {
                warn!(error = %e, "Failed to push zabbix metric");
            }
        }
        Err(e) => warn!(error = %e, "Zabbix sender unavailable"),
    }
}

fn conf_value(raw: &str, key: &str) -> Option<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#'))
        .find_map(|l| l.strip_prefix(key)?.trim_start().strip_prefix('=').map(str::trim))
        .map(String::from)
}

fn parse_server_active(raw: &str) -> Option<(String, u16)> {
    let value = conf_value(raw, "ServerActive")?;
    // Multiple servers may be listed; the first one wins.
    let first = value.split(',').next()?.trim();
    match first.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().ok()?;
            Some((host.to_string(), port))
        }
        None => Some((first.to_string(), DEFAULT_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT_CONF: &str = "\
# Zabbix agent configuration
Server=10.0.0.1
ServerActive=zabbix.example.com:10055,fallback.example.com
Hostname=tabsync-host
";

    #[test]
    fn parses_server_and_port() {
        let (server, port) = parse_server_active(AGENT_CONF).unwrap();
        assert_eq!(server, "zabbix.example.com");
        assert_eq!(port, 10055);
    }

    #[test]
    fn default_port_when_missing() {
        let (server, port) = parse_server_active("ServerActive=zbx.local\n").unwrap();
        assert_eq!(server, "zbx.local");
        assert_eq!(port, DEFAULT_PORT);
    }

    #[test]
    fn hostname_extracted() {
        assert_eq!(
            conf_value(AGENT_CONF, "Hostname").as_deref(),
            Some("tabsync-host")
        );
    }

    #[test]
    fn comments_ignored() {
        assert!(conf_value("# Hostname=commented\n", "Hostname").is_none());
    }
}
