//! SSDP discovery of the Sonos player.
//!
//! An M-SEARCH for the MusicServices service type is multicast from every
//! usable interface (or the configured one). The socket is bound to the
//! control-point port so that replies arrive where the session expects
//! them. The first reply whose `SERVER` header names the Sonos product wins.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use local_ip_address::list_afinet_netifas;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::context::interface_ipv4;
use crate::protocol_constants::{SONOS_PRODUCT, SONOS_SEARCH_TARGET};

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur while locating the player.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to bind UDP socket for discovery.
    #[error("failed to bind UDP socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// Every M-SEARCH send failed.
    #[error("failed to send SSDP search: {0}")]
    SendSearch(#[source] std::io::Error),

    /// No usable network interfaces found.
    #[error("no usable network interfaces found")]
    NoInterfaces,

    /// The configured interface is missing or has no IPv4 address.
    #[error("interface unavailable: {0}")]
    Interface(String),

    /// Nothing answering as a Sonos player inside the discovery window.
    #[error("no Sonos device found")]
    NoDeviceFound,

    /// Fetching the device description failed.
    #[error("device description request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The device description could not be parsed.
    #[error("invalid device description: {0}")]
    Description(String),
}

/// Convenient Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

// ─────────────────────────────────────────────────────────────────────────────
// ASCII Case-Insensitive Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Checks if `s` starts with `prefix` (ASCII case-insensitive, no allocation).
#[inline]
fn starts_with_ignore_ascii_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Value of the first header called `name` (case-insensitive).
fn header_value<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Standard SSDP multicast address and port.
const MULTICAST_ADDR: &str = "239.255.255.250:1900";

/// Virtual interface prefixes to filter out during discovery.
const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "vmnet", "vbox", "tun", "tap",
];

/// Checks if an interface name belongs to a virtual/container interface.
pub fn is_virtual_interface(name: &str) -> bool {
    let name_lower = name.to_lowercase();
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name_lower.starts_with(prefix))
}

/// Configuration for SSDP discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsdpConfig {
    /// Number of M-SEARCH packets to send.
    pub send_count: u64,
    /// Delay between M-SEARCH retries, in milliseconds.
    pub retry_delay_ms: u64,
    /// Total discovery window, in milliseconds.
    pub discovery_timeout_ms: u64,
    /// MX value (max response delay in seconds).
    pub mx_value: u64,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            send_count: 3,
            retry_delay_ms: 800,
            discovery_timeout_ms: 5_000,
            mx_value: 1,
        }
    }
}

impl SsdpConfig {
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

fn build_msearch_message(mx: u64) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\r\n",
        mx, SONOS_SEARCH_TARGET
    )
}

/// A search reply worth following up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpResponse {
    /// Device description URL.
    pub location: String,
    /// Raw `SERVER` header.
    pub server: String,
    /// Raw `USN` header, empty when absent.
    pub usn: String,
}

impl SsdpResponse {
    /// Product token of the `SERVER` header.
    #[must_use]
    pub fn product(&self) -> Option<&str> {
        server_product(&self.server)
    }

    #[must_use]
    pub fn is_sonos(&self) -> bool {
        self.product()
            .is_some_and(|p| p.eq_ignore_ascii_case(SONOS_PRODUCT))
    }
}

/// Extracts the product name from `OS/version UPnP/1.0 product/version`.
fn server_product(server: &str) -> Option<&str> {
    let mut tokens = server.split_whitespace();
    tokens.find(|t| starts_with_ignore_ascii_case(t, "upnp/"))?;
    tokens
        .next()
        .and_then(|t| t.split('/').next())
        .filter(|p| !p.is_empty())
}

/// Parses a reply. Returns None without a `LOCATION` header.
fn parse_ssdp_response(response: &str) -> Option<SsdpResponse> {
    let location = header_value(response, "location").filter(|l| !l.is_empty())?;
    Some(SsdpResponse {
        location: location.to_string(),
        server: header_value(response, "server").unwrap_or_default().to_string(),
        usn: header_value(response, "usn").unwrap_or_default().to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Sockets
// ─────────────────────────────────────────────────────────────────────────────

/// Network interface used for discovery.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub name: String,
    pub ip: Ipv4Addr,
}

/// The named interface, or every non-virtual non-loopback IPv4 interface.
pub fn get_interfaces(interface: Option<&str>) -> DiscoveryResult<Vec<InterfaceInfo>> {
    if let Some(name) = interface {
        let ip = interface_ipv4(name).map_err(|e| DiscoveryError::Interface(e.to_string()))?;
        return Ok(vec![InterfaceInfo {
            name: name.to_string(),
            ip,
        }]);
    }

    let interfaces: Vec<_> = list_afinet_netifas()
        .unwrap_or_else(|e| {
            log::warn!("[SSDP] Failed to list network interfaces: {}", e);
            Vec::new()
        })
        .into_iter()
        .filter_map(|(name, addr)| {
            if is_virtual_interface(&name) {
                log::debug!("[SSDP] Skipping virtual interface: {}", name);
                return None;
            }
            match addr {
                IpAddr::V4(ip) if !ip.is_loopback() => Some(InterfaceInfo { name, ip }),
                _ => None,
            }
        })
        .collect();

    if interfaces.is_empty() {
        return Err(DiscoveryError::NoInterfaces);
    }
    Ok(interfaces)
}

/// UDP socket on `iface_ip:port` with the SSDP options set.
fn create_socket(iface_ip: Ipv4Addr, port: u16) -> DiscoveryResult<UdpSocket> {
    let bind_addr = SocketAddr::new(IpAddr::V4(iface_ip), port);

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[SSDP] Failed to set SO_REUSEADDR on {}: {}", iface_ip, e);
    }

    #[cfg(unix)]
    if let Err(e) = socket.set_reuse_port(true) {
        log::warn!("[SSDP] Failed to set SO_REUSEPORT on {}: {}", iface_ip, e);
    }

    if let Err(e) = socket.set_multicast_ttl_v4(4) {
        log::warn!("[SSDP] Failed to set multicast TTL on {}: {}", iface_ip, e);
    }

    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;
    socket
        .bind(&bind_addr.into())
        .map_err(DiscoveryError::SocketBind)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery
// ─────────────────────────────────────────────────────────────────────────────

/// Searches for the player and returns the first Sonos reply.
///
/// `port` is the local port the search sockets bind to (0 for any).
pub async fn discover(
    config: &SsdpConfig,
    interface: Option<&str>,
    port: u16,
) -> DiscoveryResult<SsdpResponse> {
    let interfaces = get_interfaces(interface)?;

    let mut sockets: Vec<(InterfaceInfo, Arc<UdpSocket>)> = Vec::new();
    let mut last_bind_error = None;
    for iface in interfaces {
        match create_socket(iface.ip, port) {
            Ok(socket) => sockets.push((iface, Arc::new(socket))),
            Err(e) => {
                log::warn!(
                    "[SSDP] Failed to create socket for {} ({}): {}",
                    iface.name,
                    iface.ip,
                    e
                );
                last_bind_error = Some(e);
            }
        }
    }
    if sockets.is_empty() {
        return Err(last_bind_error.unwrap_or(DiscoveryError::NoInterfaces));
    }

    log::debug!(
        "[SSDP] Searching on {} interface(s), port {} ({} sends, {}ms apart)",
        sockets.len(),
        port,
        config.send_count,
        config.retry_delay_ms
    );

    let msg = build_msearch_message(config.mx_value);
    let found = CancellationToken::new();
    let result: Arc<Mutex<Option<SsdpResponse>>> = Arc::new(Mutex::new(None));
    let send_errors: Arc<Mutex<Vec<std::io::Error>>> = Arc::new(Mutex::new(Vec::new()));

    let send_futures: Vec<_> = sockets
        .iter()
        .map(|(iface, socket)| {
            let socket = Arc::clone(socket);
            let iface = iface.clone();
            let msg = msg.as_bytes().to_vec();
            let found = found.clone();
            let send_errors = Arc::clone(&send_errors);
            let send_count = config.send_count;
            let retry_delay = config.retry_delay();

            async move {
                for i in 0..send_count {
                    if i > 0 {
                        tokio::select! {
                            _ = found.cancelled() => return,
                            _ = tokio::time::sleep(retry_delay) => {}
                        }
                    }
                    if let Err(e) = socket.send_to(&msg, MULTICAST_ADDR).await {
                        log::warn!(
                            "[SSDP] Failed to send M-SEARCH on {} (attempt {}): {}",
                            iface.name,
                            i + 1,
                            e
                        );
                        send_errors.lock().push(e);
                    }
                }
            }
        })
        .collect();

    let recv_futures: Vec<_> = sockets
        .iter()
        .map(|(iface, socket)| {
            let socket = Arc::clone(socket);
            let iface_name = iface.name.clone();
            let found = found.clone();
            let result = Arc::clone(&result);
            let discovery_timeout = config.discovery_timeout();

            async move {
                let mut buf = [0u8; 2048];
                let start = Instant::now();

                while start.elapsed() < discovery_timeout {
                    let remaining = discovery_timeout.saturating_sub(start.elapsed());
                    let received = tokio::select! {
                        _ = found.cancelled() => break,
                        r = timeout(remaining, socket.recv_from(&mut buf)) => r,
                    };
                    match received {
                        Ok(Ok((amt, src))) => {
                            let text = String::from_utf8_lossy(&buf[..amt]);
                            let Some(response) = parse_ssdp_response(&text) else {
                                continue;
                            };
                            if !response.is_sonos() {
                                log::trace!(
                                    "[SSDP] Ignoring {} from {} ({})",
                                    response.server,
                                    src,
                                    iface_name
                                );
                                continue;
                            }
                            log::info!(
                                "[SSDP] Found {} at {} via {}",
                                response.server,
                                response.location,
                                iface_name
                            );
                            let mut slot = result.lock();
                            if slot.is_none() {
                                *slot = Some(response);
                            }
                            found.cancel();
                            break;
                        }
                        Ok(Err(e)) => {
                            log::warn!("[SSDP] Socket recv error on {}: {}", iface_name, e);
                        }
                        Err(_) => break,
                    }
                }
            }
        })
        .collect();

    tokio::join!(
        futures::future::join_all(send_futures),
        futures::future::join_all(recv_futures)
    );

    if let Some(response) = result.lock().take() {
        return Ok(response);
    }

    let expected_sends = config.send_count as usize * sockets.len();
    let mut errors = std::mem::take(&mut *send_errors.lock());
    if expected_sends > 0 && errors.len() == expected_sends {
        if let Some(e) = errors.pop() {
            return Err(DiscoveryError::SendSearch(e));
        }
    }
    Err(DiscoveryError::NoDeviceFound)
}
