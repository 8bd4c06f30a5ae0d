//! Parsing of GENA NOTIFY payloads.
//!
//! Both AVTransport and RenderingControl deliver their state as a
//! `LastChange` property holding an escaped `<Event>` document of empty
//! elements with `val` attributes.

use super::utils::{
    extract_empty_val_attrs, extract_val_attrs_where, extract_xml_text, get_xml_attr,
};
use crate::state::{PlayMode, TransportState};

/// Parsed data from an AVTransport NOTIFY.
#[derive(Debug, Default, PartialEq)]
pub struct AvTransportEvent {
    pub transport_state: Option<TransportState>,
    pub play_mode: Option<PlayMode>,
    /// Current track number, 1-based as on the wire.
    pub current_track: Option<i32>,
    pub current_track_uri: Option<String>,
}

/// Parsed data from a RenderingControl NOTIFY.
#[derive(Debug, Default, PartialEq)]
pub struct RenderingControlEvent {
    pub volume: Option<u8>,
    pub mute: Option<bool>,
}

impl AvTransportEvent {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl RenderingControlEvent {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parses an AVTransport NOTIFY body.
#[must_use]
pub fn parse_av_transport(body: &str) -> AvTransportEvent {
    let mut data = AvTransportEvent::default();

    let Some(last_change) = extract_xml_text(body, "LastChange") else {
        return data;
    };

    let attrs = extract_empty_val_attrs(
        &last_change,
        &[
            "TransportState",
            "CurrentPlayMode",
            "CurrentTrack",
            "CurrentTrackURI",
        ],
    );

    if let Some(val) = attrs.get("TransportState") {
        data.transport_state = TransportState::from_upnp(val);
    }
    if let Some(val) = attrs.get("CurrentPlayMode") {
        data.play_mode = PlayMode::from_upnp(val);
    }
    if let Some(val) = attrs.get("CurrentTrack") {
        data.current_track = val.trim().parse().ok();
    }
    if let Some(val) = attrs.get("CurrentTrackURI") {
        data.current_track_uri = Some(val.clone());
    }

    data
}

/// Parses a RenderingControl NOTIFY body.
///
/// Only the `Master` channel (or an element without a channel) counts;
/// stereo pairs also report `LF`/`RF`.
#[must_use]
pub fn parse_rendering_control(body: &str) -> RenderingControlEvent {
    let mut data = RenderingControlEvent::default();

    let Some(last_change) = extract_xml_text(body, "LastChange") else {
        return data;
    };

    let attrs = extract_val_attrs_where(&last_change, &["Volume", "Mute"], |e| {
        matches!(
            get_xml_attr(e, b"channel").as_deref(),
            None | Some("") | Some("Master")
        )
    });

    if let Some(val) = attrs.get("Volume") {
        data.volume = val.trim().parse::<u32>().ok().map(|v| v.min(100) as u8);
    }
    if let Some(val) = attrs.get("Mute") {
        data.mute = val.trim().parse::<i64>().ok().map(|v| v > 0);
    }

    data
}
