//! Configuration for the Sonos subsystem.
//!
//! All fields have defaults, so an empty YAML section is a valid config.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::PortRange;
use crate::sonos::discovery::SsdpConfig;

/// Where the control point lives on the local network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface to search and listen on. `None` searches every usable
    /// IPv4 interface and advertises the default route's address.
    pub interface: Option<String>,

    /// Address advertised to the player, overriding detection.
    pub advertise_ip: Option<Ipv4Addr>,

    /// Ports for the control-point and GENA callback listeners.
    pub callback_ports: PortRange,

    /// Ports for the local file server.
    pub file_server_ports: PortRange,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: None,
            advertise_ip: None,
            callback_ports: PortRange::new(11209, 11299),
            file_server_ports: PortRange::new(12000, 12200),
        }
    }
}

/// Configuration for [`SonosHub`](crate::SonosHub).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SonosConfig {
    pub network: NetworkConfig,

    pub ssdp: SsdpConfig,

    /// Reconnect when no event arrived for this long (seconds).
    pub idle_reconnect_secs: u64,

    /// Capacity of the state-diff channel handed to [`SonosHub::start`](crate::SonosHub::start).
    pub update_channel_capacity: usize,

    /// Capacity of the GENA notification queue.
    pub notification_channel_capacity: usize,
}

impl Default for SonosConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            ssdp: SsdpConfig::default(),
            idle_reconnect_secs: 600,
            update_channel_capacity: 100,
            notification_channel_capacity: 64,
        }
    }
}

impl SonosConfig {
    #[must_use]
    pub fn idle_reconnect(&self) -> Duration {
        Duration::from_secs(self.idle_reconnect_secs)
    }

    /// Rejects values that would make startup fail later.
    pub fn validate(&self) -> Result<(), String> {
        let callback = self.network.callback_ports;
        if callback.is_empty() {
            return Err(format!(
                "callback_ports {}-{} is empty",
                callback.start, callback.end
            ));
        }
        if callback.start == callback.end {
            return Err("callback_ports needs at least two ports".to_string());
        }
        let files = self.network.file_server_ports;
        if files.is_empty() {
            return Err(format!(
                "file_server_ports {}-{} is empty",
                files.start, files.end
            ));
        }
        if self.idle_reconnect_secs == 0 {
            return Err("idle_reconnect_secs must be >= 1".to_string());
        }
        if self.update_channel_capacity == 0 {
            return Err("update_channel_capacity must be >= 1".to_string());
        }
        if self.notification_channel_capacity == 0 {
            return Err("notification_channel_capacity must be >= 1".to_string());
        }
        if self.ssdp.send_count == 0 {
            return Err("ssdp.send_count must be >= 1".to_string());
        }
        Ok(())
    }
}
