use serde::{Deserialize, Serialize};

use crate::errors::RelayError;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bind configuration for both DNS protocol servers. The values are read
/// once at server construction time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_dns_port")]
    pub dns_port: u16,
    #[serde(default = "default_udp_payload_size")]
    pub udp_payload_size: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TunnelConfig {
    /// Address of the tunnel peer to dial (host:port).
    #[serde(default = "default_peer_address")]
    pub peer_address: String,
    /// Domain suffix delegated to the tunnel peer.
    #[serde(default)]
    pub domain: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_dns_port() -> u16 {
    53
}
fn default_udp_payload_size() -> u16 {
    4096
}
fn default_peer_address() -> String {
    "127.0.0.1:9053".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            dns_port: default_dns_port(),
            udp_payload_size: default_udp_payload_size(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            peer_address: default_peer_address(),
            domain: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Command-line values that take precedence over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind_address: Option<String>,
    pub dns_port: Option<u16>,
    pub udp_payload_size: Option<u16>,
    pub peer_address: Option<String>,
    pub domain: Option<String>,
    pub log_level: Option<String>,
}

impl Config {
    /// Loads the configuration file (defaults when no path is given) and
    /// applies command-line overrides on top.
    pub fn load(path: Option<&str>, overrides: CliOverrides) -> Result<Config, RelayError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| RelayError::Config(format!("cannot read {path}: {e}")))?;
                toml::from_str(&raw)
                    .map_err(|e| RelayError::Config(format!("cannot parse {path}: {e}")))?
            }
            None => Config::default(),
        };

        if let Some(bind_address) = overrides.bind_address {
            config.listener.bind_address = bind_address;
        }
        if let Some(dns_port) = overrides.dns_port {
            config.listener.dns_port = dns_port;
        }
        if let Some(udp_payload_size) = overrides.udp_payload_size {
            config.listener.udp_payload_size = udp_payload_size;
        }
        if let Some(peer_address) = overrides.peer_address {
            config.tunnel.peer_address = peer_address;
        }
        if let Some(domain) = overrides.domain {
            config.tunnel.domain = domain;
        }
        if let Some(log_level) = overrides.log_level {
            config.logging.level = log_level;
        }

        Ok(config)
    }
}
