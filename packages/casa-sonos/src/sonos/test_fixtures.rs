//! In-memory renderer and NOTIFY payloads shared by the unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::renderer::{MediaRenderer, PositionInfo, TransportInfo};
use super::soap::{SoapError, SoapResult};
use crate::media::{didl, Track};

/// Wraps a `LastChange` event document in a GENA property set.
pub fn propertyset(last_change: &str) -> String {
    format!(
        "<e:propertyset xmlns:e=\"urn:schemas-upnp-org:event-1-0\"><e:property><LastChange>{}</LastChange></e:property></e:propertyset>",
        html_escape::encode_text(last_change)
    )
}

/// AVTransport NOTIFY body with the given `InstanceID` children.
pub fn av_transport_body(children: &str) -> String {
    propertyset(&format!(
        r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/AVT/"><InstanceID val="0">{children}</InstanceID></Event>"#
    ))
}

/// RenderingControl NOTIFY body with the given `InstanceID` children.
pub fn rendering_control_body(children: &str) -> String {
    propertyset(&format!(
        r#"<Event xmlns="urn:schemas-upnp-org:metadata-1-0/RCS/"><InstanceID val="0">{children}</InstanceID></Event>"#
    ))
}

struct Player {
    transport: TransportInfo,
    position: PositionInfo,
    current_uri: String,
    volume: u8,
    mute: bool,
    play_mode: String,
    queue: Vec<Track>,
}

/// A renderer that records every call and keeps a tiny player model.
pub struct MockRenderer {
    player: Mutex<Player>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self::with_queue(Vec::new())
    }

    pub fn with_queue(queue: Vec<Track>) -> Self {
        Self {
            player: Mutex::new(Player {
                transport: TransportInfo {
                    state: "STOPPED".into(),
                    speed: "1".into(),
                },
                position: PositionInfo::default(),
                current_uri: String::new(),
                volume: 30,
                mute: false,
                play_mode: "NORMAL".into(),
                queue,
            }),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
        }
    }

    /// Makes every later call of `action` fail with a SOAP fault.
    pub fn fail_on(&self, action: &str) {
        self.failing.lock().push(action.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn set_transport(&self, state: &str, speed: &str) {
        self.player.lock().transport = TransportInfo {
            state: state.into(),
            speed: speed.into(),
        };
    }

    pub fn set_position(&self, position: PositionInfo) {
        self.player.lock().position = position;
    }

    pub fn set_current_uri(&self, uri: &str) {
        self.player.lock().current_uri = uri.into();
    }

    pub fn current_uri(&self) -> String {
        self.player.lock().current_uri.clone()
    }

    pub fn volume(&self) -> u8 {
        self.player.lock().volume
    }

    fn record(&self, action: &str, call: String) -> SoapResult<()> {
        self.calls.lock().push(call);
        if self.failing.lock().iter().any(|a| a == action) {
            return Err(SoapError::Fault(format!("{action} failed (701)")));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaRenderer for MockRenderer {
    async fn play(&self) -> SoapResult<()> {
        self.record("Play", "Play".into())?;
        self.player.lock().transport.state = "PLAYING".into();
        Ok(())
    }

    async fn pause(&self) -> SoapResult<()> {
        self.record("Pause", "Pause".into())?;
        self.player.lock().transport.state = "PAUSED_PLAYBACK".into();
        Ok(())
    }

    async fn stop(&self) -> SoapResult<()> {
        self.record("Stop", "Stop".into())?;
        self.player.lock().transport.state = "STOPPED".into();
        Ok(())
    }

    async fn get_volume(&self) -> SoapResult<u8> {
        self.record("GetVolume", "GetVolume".into())?;
        Ok(self.player.lock().volume)
    }

    async fn set_volume(&self, volume: u8) -> SoapResult<()> {
        self.record("SetVolume", format!("SetVolume {volume}"))?;
        self.player.lock().volume = volume;
        Ok(())
    }

    async fn get_mute(&self) -> SoapResult<bool> {
        self.record("GetMute", "GetMute".into())?;
        Ok(self.player.lock().mute)
    }

    async fn set_mute(&self, mute: bool) -> SoapResult<()> {
        self.record("SetMute", format!("SetMute {mute}"))?;
        self.player.lock().mute = mute;
        Ok(())
    }

    async fn get_play_mode(&self) -> SoapResult<String> {
        self.record("GetTransportSettings", "GetTransportSettings".into())?;
        Ok(self.player.lock().play_mode.clone())
    }

    async fn set_play_mode(&self, mode: &str) -> SoapResult<()> {
        self.record("SetPlayMode", format!("SetPlayMode {mode}"))?;
        self.player.lock().play_mode = mode.into();
        Ok(())
    }

    async fn seek(&self, unit: &str, target: &str) -> SoapResult<()> {
        self.record("Seek", format!("Seek {unit} {target}"))?;
        if unit == "TRACK_NR" {
            if let Ok(track) = target.parse() {
                self.player.lock().position.track = track;
            }
        }
        Ok(())
    }

    async fn get_transport_info(&self) -> SoapResult<TransportInfo> {
        self.record("GetTransportInfo", "GetTransportInfo".into())?;
        Ok(self.player.lock().transport.clone())
    }

    async fn get_position_info(&self) -> SoapResult<PositionInfo> {
        self.record("GetPositionInfo", "GetPositionInfo".into())?;
        Ok(self.player.lock().position.clone())
    }

    async fn get_current_uri(&self) -> SoapResult<String> {
        self.record("GetMediaInfo", "GetMediaInfo".into())?;
        Ok(self.player.lock().current_uri.clone())
    }

    async fn set_transport_uri(&self, uri: &str, _metadata: &str) -> SoapResult<()> {
        self.record("SetAVTransportURI", format!("SetAVTransportURI {uri}"))?;
        self.player.lock().current_uri = uri.into();
        Ok(())
    }

    async fn remove_all_tracks(&self) -> SoapResult<()> {
        self.record("RemoveAllTracksFromQueue", "RemoveAllTracksFromQueue".into())?;
        self.player.lock().queue.clear();
        Ok(())
    }

    async fn add_uri_to_queue(&self, uri: &str, metadata: &str, position: u32) -> SoapResult<()> {
        self.record("AddURIToQueue", format!("AddURIToQueue {uri} {position}"))?;
        let mut track = didl::unmarshal(metadata).map_err(|e| SoapError::Parse(e.to_string()))?;
        track.uri = uri.to_string();

        let mut player = self.player.lock();
        let len = player.queue.len();
        let at = match position {
            0 => len,
            n => (n as usize - 1).min(len),
        };
        player.queue.insert(at, track);
        Ok(())
    }

    async fn browse_queue(&self) -> SoapResult<Vec<Track>> {
        self.record("Browse", "Browse".into())?;
        Ok(self.player.lock().queue.clone())
    }
}
