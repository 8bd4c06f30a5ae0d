//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::{Context, Result};
use casa_sonos::SonosConfig;
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API binds to.
    /// Override: `CASA_BIND`
    pub bind: IpAddr,

    /// Port of the HTTP API.
    /// Override: `CASA_PORT`
    pub port: u16,

    /// Sonos subsystem settings. `network.interface` and
    /// `network.advertise_ip` can be overridden with `CASA_INTERFACE` and
    /// `CASA_ADVERTISE_IP`.
    pub sonos: SonosConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            sonos: SonosConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                Self::from_yaml(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to an empty map.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies environment overrides read through `var`. Unparseable values
    /// are logged and ignored.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("CASA_BIND") {
            match val.parse() {
                Ok(ip) => self.bind = ip,
                Err(_) => log::warn!("Ignoring invalid CASA_BIND={}", val),
            }
        }

        if let Some(val) = var("CASA_PORT") {
            match val.parse() {
                Ok(port) => self.port = port,
                Err(_) => log::warn!("Ignoring invalid CASA_PORT={}", val),
            }
        }

        if let Some(val) = var("CASA_INTERFACE") {
            self.sonos.network.interface = Some(val).filter(|v| !v.is_empty());
        }

        if let Some(val) = var("CASA_ADVERTISE_IP") {
            match val.parse() {
                Ok(ip) => self.sonos.network.advertise_ip = Some(ip),
                Err(_) => log::warn!("Ignoring invalid CASA_ADVERTISE_IP={}", val),
            }
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Rejects values that would make startup fail later.
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("port must be >= 1".to_string());
        }
        self.sonos.validate()
    }
}
