//! UPnP actions the controller and session need from the player.
//!
//! [`MediaRenderer`] is the seam between playback logic and the network;
//! [`UpnpRenderer`] implements it over SOAP.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;

use super::device::DeviceInfo;
use super::services::SonosService;
use super::soap::{response_field, SoapError, SoapRequestBuilder, SoapResult};
use crate::media::{didl, Track};
use crate::protocol_constants::{BROWSE_PAGE_SIZE, DEFAULT_QUEUE_ID};

/// `GetTransportInfo` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportInfo {
    pub state: String,
    /// `CurrentSpeed`, a number or a fraction such as `1/2`.
    pub speed: String,
}

/// `GetPositionInfo` result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionInfo {
    /// 1-based track number, 0 when the queue is empty.
    pub track: i64,
    pub track_duration: String,
    pub rel_time: String,
    pub track_uri: String,
}

/// Player operations used by the controller, the bridge and the session.
#[async_trait]
pub trait MediaRenderer: Send + Sync {
    async fn play(&self) -> SoapResult<()>;
    async fn pause(&self) -> SoapResult<()>;
    async fn stop(&self) -> SoapResult<()>;

    async fn get_volume(&self) -> SoapResult<u8>;
    async fn set_volume(&self, volume: u8) -> SoapResult<()>;
    async fn get_mute(&self) -> SoapResult<bool>;
    async fn set_mute(&self, mute: bool) -> SoapResult<()>;

    /// `CurrentPlayMode` as reported by `GetTransportSettings`.
    async fn get_play_mode(&self) -> SoapResult<String>;
    async fn set_play_mode(&self, mode: &str) -> SoapResult<()>;

    /// `Seek` with the given unit (`TRACK_NR`, `REL_TIME`).
    async fn seek(&self, unit: &str, target: &str) -> SoapResult<()>;

    async fn get_transport_info(&self) -> SoapResult<TransportInfo>;
    async fn get_position_info(&self) -> SoapResult<PositionInfo>;
    /// `CurrentURI` from `GetMediaInfo`.
    async fn get_current_uri(&self) -> SoapResult<String>;
    async fn set_transport_uri(&self, uri: &str, metadata: &str) -> SoapResult<()>;

    async fn remove_all_tracks(&self) -> SoapResult<()>;
    /// `AddURIToQueue`; `position` 0 appends.
    async fn add_uri_to_queue(&self, uri: &str, metadata: &str, position: u32) -> SoapResult<()>;
    /// Every item of the default queue, in order.
    async fn browse_queue(&self) -> SoapResult<Vec<Track>>;
}

/// [`MediaRenderer`] over SOAP against one device.
pub struct UpnpRenderer {
    client: Client,
    device: Arc<DeviceInfo>,
}

impl UpnpRenderer {
    pub fn new(client: Client, device: Arc<DeviceInfo>) -> Self {
        Self { client, device }
    }

    fn request<'a>(&'a self, service: SonosService, action: &'a str) -> SoapRequestBuilder<'a> {
        SoapRequestBuilder::new(&self.client, &self.device.host)
            .service(service)
            .control_path(self.device.control_path(service))
            .action(action)
            .instance_id()
    }

    fn av<'a>(&'a self, action: &'a str) -> SoapRequestBuilder<'a> {
        self.request(SonosService::AVTransport, action)
    }

    fn rendering<'a>(&'a self, action: &'a str) -> SoapRequestBuilder<'a> {
        self.request(SonosService::RenderingControl, action)
            .arg("Channel", "Master")
    }
}

fn parse_number<T: std::str::FromStr>(xml: &str, field: &str) -> SoapResult<T> {
    let text = response_field(xml, field)?;
    text.trim()
        .parse()
        .map_err(|_| SoapError::Parse(format!("{field}: {text:?}")))
}

#[async_trait]
impl MediaRenderer for UpnpRenderer {
    async fn play(&self) -> SoapResult<()> {
        self.av("Play").arg("Speed", "1").with_retry().send().await?;
        Ok(())
    }

    async fn pause(&self) -> SoapResult<()> {
        self.av("Pause").send().await?;
        Ok(())
    }

    async fn stop(&self) -> SoapResult<()> {
        self.av("Stop").send().await?;
        Ok(())
    }

    async fn get_volume(&self) -> SoapResult<u8> {
        let xml = self.rendering("GetVolume").send().await?;
        let volume: u32 = parse_number(&xml, "CurrentVolume")?;
        Ok(volume.min(100) as u8)
    }

    async fn set_volume(&self, volume: u8) -> SoapResult<()> {
        self.rendering("SetVolume")
            .arg("DesiredVolume", volume.min(100).to_string())
            .send()
            .await?;
        Ok(())
    }

    async fn get_mute(&self) -> SoapResult<bool> {
        let xml = self.rendering("GetMute").send().await?;
        let mute: i64 = parse_number(&xml, "CurrentMute")?;
        Ok(mute > 0)
    }

    async fn set_mute(&self, mute: bool) -> SoapResult<()> {
        self.rendering("SetMute")
            .arg("DesiredMute", if mute { "1" } else { "0" })
            .send()
            .await?;
        Ok(())
    }

    async fn get_play_mode(&self) -> SoapResult<String> {
        let xml = self.av("GetTransportSettings").send().await?;
        response_field(&xml, "PlayMode")
    }

    async fn set_play_mode(&self, mode: &str) -> SoapResult<()> {
        self.av("SetPlayMode").arg("NewPlayMode", mode).send().await?;
        Ok(())
    }

    async fn seek(&self, unit: &str, target: &str) -> SoapResult<()> {
        self.av("Seek")
            .arg("Unit", unit)
            .arg("Target", target)
            .with_retry()
            .send()
            .await?;
        Ok(())
    }

    async fn get_transport_info(&self) -> SoapResult<TransportInfo> {
        let xml = self.av("GetTransportInfo").send().await?;
        Ok(TransportInfo {
            state: response_field(&xml, "CurrentTransportState")?,
            speed: response_field(&xml, "CurrentSpeed")?,
        })
    }

    async fn get_position_info(&self) -> SoapResult<PositionInfo> {
        let xml = self.av("GetPositionInfo").send().await?;
        Ok(PositionInfo {
            track: parse_number(&xml, "Track")?,
            track_duration: response_field(&xml, "TrackDuration").unwrap_or_default(),
            rel_time: response_field(&xml, "RelTime").unwrap_or_default(),
            track_uri: response_field(&xml, "TrackURI").unwrap_or_default(),
        })
    }

    async fn get_current_uri(&self) -> SoapResult<String> {
        let xml = self.av("GetMediaInfo").send().await?;
        Ok(response_field(&xml, "CurrentURI").unwrap_or_default())
    }

    async fn set_transport_uri(&self, uri: &str, metadata: &str) -> SoapResult<()> {
        self.av("SetAVTransportURI")
            .arg("CurrentURI", uri)
            .arg("CurrentURIMetaData", metadata)
            .with_retry()
            .send()
            .await?;
        Ok(())
    }

    async fn remove_all_tracks(&self) -> SoapResult<()> {
        self.av("RemoveAllTracksFromQueue").send().await?;
        Ok(())
    }

    async fn add_uri_to_queue(&self, uri: &str, metadata: &str, position: u32) -> SoapResult<()> {
        self.av("AddURIToQueue")
            .arg("EnqueuedURI", uri)
            .arg("EnqueuedURIMetaData", metadata)
            .arg("DesiredFirstTrackNumberEnqueued", position.to_string())
            .arg("EnqueueAsNext", "0")
            .send()
            .await?;
        Ok(())
    }

    async fn browse_queue(&self) -> SoapResult<Vec<Track>> {
        let mut tracks = Vec::new();
        loop {
            let xml = SoapRequestBuilder::new(&self.client, &self.device.host)
                .service(SonosService::ContentDirectory)
                .control_path(self.device.control_path(SonosService::ContentDirectory))
                .action("Browse")
                .arg("ObjectID", DEFAULT_QUEUE_ID)
                .arg("BrowseFlag", "BrowseDirectChildren")
                .arg("Filter", "*")
                .arg("StartingIndex", tracks.len().to_string())
                .arg("RequestedCount", BROWSE_PAGE_SIZE.to_string())
                .arg("SortCriteria", "")
                .send()
                .await?;

            let page = didl::parse_items(&response_field(&xml, "Result")?)
                .map_err(|e| SoapError::Parse(e.to_string()))?;
            let returned: usize = parse_number(&xml, "NumberReturned")?;
            let total: usize = parse_number(&xml, "TotalMatches")?;
            tracks.extend(page);

            if returned == 0 || tracks.len() >= total {
                return Ok(tracks);
            }
        }
    }
}
