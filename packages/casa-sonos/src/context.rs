//! Network context: local address detection, port allocation and URLs.
//!
//! The control point needs three local endpoints (the SSDP search socket,
//! the GENA callback listener and the file server), each on its own port,
//! plus the address Sonos players can use to reach them.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

// ─────────────────────────────────────────────────────────────────────────────
// Port allocation
// ─────────────────────────────────────────────────────────────────────────────

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    #[must_use]
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// The same range starting just after `port`; empty when nothing is
    /// left above it.
    #[must_use]
    pub fn after(&self, port: u16) -> Self {
        match port.checked_add(1) {
            Some(next) => Self {
                start: next.max(self.start),
                end: self.end,
            },
            None => Self {
                start: u16::MAX,
                end: u16::MAX - 1,
            },
        }
    }
}

/// No port in the range could be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no available port in range {start}-{end}")]
pub struct PortExhausted {
    pub start: u16,
    pub end: u16,
}

/// Binds the first free port of `range` on all interfaces.
///
/// The listener is returned still bound so the port cannot be taken before
/// the caller uses it.
pub async fn find_available_port(range: PortRange) -> Result<(u16, TcpListener), PortExhausted> {
    if !range.is_empty() {
        for port in range.start..=range.end {
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            match TcpListener::bind(&addr).await {
                Ok(listener) => return Ok((port, listener)),
                Err(_) => continue,
            }
        }
    }
    Err(PortExhausted {
        start: range.start,
        end: range.end,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// IP detection
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Could not detect local IP address.
    #[error("Failed to detect local IP: {0}")]
    Detection(String),

    /// The configured interface has no IPv4 address.
    #[error("Interface {0} not found or has no IPv4 address")]
    Interface(String),
}

/// Trait for detecting the local IP address.
pub trait IpDetector: Send + Sync {
    /// Detects the local IP address.
    fn detect(&self) -> Result<Ipv4Addr, NetworkError>;
}

/// Detects the address of a named interface, or the default route's address.
#[derive(Debug, Clone, Default)]
pub struct LocalIpDetector {
    interface: Option<String>,
}

impl LocalIpDetector {
    #[must_use]
    pub fn new(interface: Option<String>) -> Self {
        Self { interface }
    }
}

impl IpDetector for LocalIpDetector {
    fn detect(&self) -> Result<Ipv4Addr, NetworkError> {
        match &self.interface {
            Some(name) => interface_ipv4(name),
            None => match local_ip_address::local_ip() {
                Ok(IpAddr::V4(ip)) => Ok(ip),
                Ok(IpAddr::V6(ip)) => Err(NetworkError::Detection(format!(
                    "default route address {ip} is not IPv4"
                ))),
                Err(e) => Err(NetworkError::Detection(e.to_string())),
            },
        }
    }
}

/// First IPv4 address bound to the interface called `name`.
pub fn interface_ipv4(name: &str) -> Result<Ipv4Addr, NetworkError> {
    let interfaces = local_ip_address::list_afinet_netifas()
        .map_err(|e| NetworkError::Detection(e.to_string()))?;
    interfaces
        .into_iter()
        .find_map(|(iface, ip)| match ip {
            IpAddr::V4(v4) if iface == name => Some(v4),
            _ => None,
        })
        .ok_or_else(|| NetworkError::Interface(name.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// NetworkContext
// ─────────────────────────────────────────────────────────────────────────────

/// Address that Sonos players use to reach this host.
#[derive(Debug, Clone)]
pub struct NetworkContext {
    pub local_ip: Ipv4Addr,
    pub interface: Option<String>,
}

impl NetworkContext {
    /// Uses `advertise_ip` when given, otherwise asks `detector`.
    pub fn resolve(
        advertise_ip: Option<Ipv4Addr>,
        interface: Option<String>,
        detector: &dyn IpDetector,
    ) -> Result<Self, NetworkError> {
        let local_ip = match advertise_ip {
            Some(ip) => ip,
            None => detector.detect()?,
        };
        Ok(Self {
            local_ip,
            interface,
        })
    }

    #[must_use]
    pub fn url_builder(&self, port: u16) -> UrlBuilder {
        UrlBuilder::new(self.local_ip.to_string(), port)
    }
}

/// Builder for URLs served from this host.
pub struct UrlBuilder {
    ip: String,
    port: u16,
}

impl UrlBuilder {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// Returns the base URL (e.g., `http://192.168.1.100:11210`).
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }

    /// GENA callback URL for one service's notifications.
    #[must_use]
    pub fn gena_callback_url(&self, service: &str) -> String {
        format!("{}/gena/{}", self.base_url(), service)
    }

    /// URL of a file registered with the file server.
    #[must_use]
    pub fn file_url(&self, file_id: &str) -> String {
        format!("{}/{}", self.base_url(), file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedIp(Ipv4Addr);

    impl IpDetector for FixedIp {
        fn detect(&self) -> Result<Ipv4Addr, NetworkError> {
            Ok(self.0)
        }
    }

    #[test]
    fn advertise_ip_wins_over_detection() {
        let detector = FixedIp(Ipv4Addr::new(10, 0, 0, 5));
        let ctx = NetworkContext::resolve(Some(Ipv4Addr::new(192, 168, 1, 9)), None, &detector)
            .unwrap();
        assert_eq!(ctx.local_ip, Ipv4Addr::new(192, 168, 1, 9));

        let ctx = NetworkContext::resolve(None, None, &detector).unwrap();
        assert_eq!(ctx.local_ip, Ipv4Addr::new(10, 0, 0, 5));
    }

    #[test]
    fn url_builder_generates_correct_urls() {
        let builder = UrlBuilder::new("192.168.1.100", 11210);
        assert_eq!(builder.base_url(), "http://192.168.1.100:11210");
        assert_eq!(
            builder.gena_callback_url("AVTransport"),
            "http://192.168.1.100:11210/gena/AVTransport"
        );
        assert_eq!(
            builder.file_url("abc.mp3"),
            "http://192.168.1.100:11210/abc.mp3"
        );
    }

    #[test]
    fn port_range_after_skips_taken_port() {
        let range = PortRange::new(11209, 11299);
        assert_eq!(range.after(11209), PortRange::new(11210, 11299));
        assert!(range.after(11299).is_empty());
        assert!(PortRange::new(65000, u16::MAX).after(u16::MAX).is_empty());
        assert!(PortRange::new(5, 4).is_empty());
    }

    #[tokio::test]
    async fn occupied_single_port_range_is_exhausted() {
        let blocker = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = blocker.local_addr().unwrap().port();

        let err = find_available_port(PortRange::new(port, port))
            .await
            .unwrap_err();
        assert_eq!(err, PortExhausted { start: port, end: port });
    }

    #[tokio::test]
    async fn empty_range_is_exhausted() {
        let err = find_available_port(PortRange::new(2000, 1999))
            .await
            .unwrap_err();
        assert_eq!(err.start, 2000);
    }
}
