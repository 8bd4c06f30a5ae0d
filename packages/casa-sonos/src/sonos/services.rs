//! Sonos UPnP service definitions.
//!
//! Single source of truth for the service URNs and default control/event
//! paths used by SOAP commands and GENA subscriptions. Paths advertised in
//! the device description take precedence over these defaults.

use serde::Serialize;

/// Sonos UPnP services used for control and event subscriptions.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize)]
pub enum SonosService {
    /// Audio/Video transport control (play, pause, seek, queue).
    AVTransport,
    /// Volume and mute.
    RenderingControl,
    /// Queue browsing.
    ContentDirectory,
}

impl SonosService {
    /// Services the session subscribes to.
    pub const EVENTED: [SonosService; 2] = [Self::AVTransport, Self::RenderingControl];

    /// Returns the UPnP service URN for SOAP requests.
    #[must_use]
    pub fn urn(&self) -> &'static str {
        match self {
            Self::AVTransport => "urn:schemas-upnp-org:service:AVTransport:1",
            Self::RenderingControl => "urn:schemas-upnp-org:service:RenderingControl:1",
            Self::ContentDirectory => "urn:schemas-upnp-org:service:ContentDirectory:1",
        }
    }

    /// Returns the default UPnP control endpoint path.
    #[must_use]
    pub fn control_path(&self) -> &'static str {
        match self {
            Self::AVTransport => "/MediaRenderer/AVTransport/Control",
            Self::RenderingControl => "/MediaRenderer/RenderingControl/Control",
            Self::ContentDirectory => "/MediaServer/ContentDirectory/Control",
        }
    }

    /// Returns the default UPnP event endpoint path.
    #[must_use]
    pub fn event_path(&self) -> &'static str {
        match self {
            Self::AVTransport => "/MediaRenderer/AVTransport/Event",
            Self::RenderingControl => "/MediaRenderer/RenderingControl/Event",
            Self::ContentDirectory => "/MediaServer/ContentDirectory/Event",
        }
    }

    /// Returns a human-readable name for this service.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AVTransport => "AVTransport",
            Self::RenderingControl => "RenderingControl",
            Self::ContentDirectory => "ContentDirectory",
        }
    }

    /// Inverse of [`name`](Self::name), used to route GENA callbacks.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AVTransport" => Some(Self::AVTransport),
            "RenderingControl" => Some(Self::RenderingControl),
            "ContentDirectory" => Some(Self::ContentDirectory),
            _ => None,
        }
    }

    /// Matches a `serviceType` from a device description.
    #[must_use]
    pub fn from_urn(urn: &str) -> Option<Self> {
        [
            Self::AVTransport,
            Self::RenderingControl,
            Self::ContentDirectory,
        ]
        .into_iter()
        .find(|s| s.urn() == urn.trim())
    }
}
