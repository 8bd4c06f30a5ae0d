//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (UPnP, GENA, SSDP)
//! or by Sonos firmware behaviour.

// ─────────────────────────────────────────────────────────────────────────────
// GENA (UPnP General Event Notification Architecture)
// ─────────────────────────────────────────────────────────────────────────────

/// GENA subscription timeout requested from speaker (seconds).
pub const GENA_SUBSCRIPTION_TIMEOUT_SECS: u64 = 3600;

/// Time before subscription expiry to trigger renewal (seconds).
pub const GENA_RENEWAL_BUFFER_SECS: u64 = 300;

/// Interval between subscription renewal checks (seconds).
pub const GENA_RENEWAL_CHECK_SECS: u64 = 60;

// ─────────────────────────────────────────────────────────────────────────────
// HTTP/SOAP
// ─────────────────────────────────────────────────────────────────────────────

/// Timeout for SOAP HTTP requests (seconds).
pub const SOAP_TIMEOUT_SECS: u64 = 10;

/// Maximum size of GENA notification body (bytes).
pub const MAX_GENA_BODY_SIZE: usize = 64 * 1024;

/// Page size for `ContentDirectory` queue browses.
pub const BROWSE_PAGE_SIZE: u32 = 100;

// ─────────────────────────────────────────────────────────────────────────────
// SSDP
// ─────────────────────────────────────────────────────────────────────────────

/// Search target answered by Sonos players.
pub const SONOS_SEARCH_TARGET: &str = "urn:schemas-upnp-org:service:MusicServices:1";

/// Product token a Sonos player puts in its `SERVER` header.
pub const SONOS_PRODUCT: &str = "Sonos";

// ─────────────────────────────────────────────────────────────────────────────
// Queue
// ─────────────────────────────────────────────────────────────────────────────

/// ContentDirectory object id of the default queue.
pub const DEFAULT_QUEUE_ID: &str = "Q:0";
