//! Device handle built from the UPnP device description.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::Client;
use serde::Serialize;

use super::discovery::{DiscoveryError, DiscoveryResult, SsdpResponse};
use super::services::SonosService;
use super::utils::{build_sonos_url, host_from_location, read_element_text};

/// Control and event paths of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEndpoints {
    pub control_path: String,
    pub event_path: String,
}

/// A connected player. Replaced wholesale on reconnect.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Product token from the search reply (`Sonos`).
    pub product: String,
    pub model_name: String,
    pub friendly_name: String,
    pub manufacturer: String,
    /// `uuid:RINCON_...`
    pub udn: String,
    /// `host:port` the player answers on.
    pub host: String,
    #[serde(skip)]
    services: HashMap<SonosService, ServiceEndpoints>,
}

impl DeviceInfo {
    /// Device id without the `uuid:` prefix.
    #[must_use]
    pub fn rincon_id(&self) -> &str {
        self.udn.strip_prefix("uuid:").unwrap_or(&self.udn)
    }

    /// URI that selects the player's own queue as transport source.
    #[must_use]
    pub fn queue_uri(&self) -> String {
        format!("x-rincon-queue:{}#0", self.rincon_id())
    }

    #[must_use]
    pub fn control_path(&self, service: SonosService) -> &str {
        self.services
            .get(&service)
            .map_or(service.control_path(), |e| e.control_path.as_str())
    }

    #[must_use]
    pub fn event_path(&self, service: SonosService) -> &str {
        self.services
            .get(&service)
            .map_or(service.event_path(), |e| e.event_path.as_str())
    }

    #[must_use]
    pub fn event_url(&self, service: SonosService) -> String {
        build_sonos_url(&self.host, self.event_path(service))
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        build_sonos_url(&self.host, "")
    }
}

/// Fetches and parses the description advertised by a search reply.
pub async fn fetch_device(client: &Client, response: &SsdpResponse) -> DiscoveryResult<DeviceInfo> {
    let host = host_from_location(&response.location).ok_or_else(|| {
        DiscoveryError::Description(format!("bad LOCATION {}", response.location))
    })?;

    log::debug!("[SSDP] Fetching description {}", response.location);
    let body = client
        .get(&response.location)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let mut device = parse_description(&body, host)?;
    device.product = response.product().unwrap_or_default().to_string();
    Ok(device)
}

/// Parses a device description. Root device fields win over embedded ones.
pub fn parse_description(xml: &str, host: String) -> DiscoveryResult<DeviceInfo> {
    let mut reader = Reader::from_str(xml);
    let mut fields: HashMap<&'static str, String> = HashMap::new();
    let mut services = HashMap::new();
    let mut current_service: Option<(String, String, String)> = None;

    const DEVICE_FIELDS: [&str; 4] = ["friendlyName", "modelName", "manufacturer", "UDN"];

    loop {
        let event = reader
            .read_event()
            .map_err(|e| DiscoveryError::Description(e.to_string()))?;
        match event {
            Event::Start(e) => {
                let local = e.local_name();
                let name = local.as_ref();
                if name == b"service" {
                    current_service = Some(Default::default());
                    continue;
                }
                if let Some((service_type, control, event_sub)) = current_service.as_mut() {
                    match name {
                        b"serviceType" => *service_type = description_text(&mut reader)?,
                        b"controlURL" => *control = description_text(&mut reader)?,
                        b"eventSubURL" => *event_sub = description_text(&mut reader)?,
                        _ => {}
                    }
                } else if let Some(field) = DEVICE_FIELDS.iter().find(|f| f.as_bytes() == name) {
                    let text = description_text(&mut reader)?;
                    fields.entry(*field).or_insert_with(|| text.trim().to_string());
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"service" => {
                if let Some((service_type, control, event_sub)) = current_service.take() {
                    if let Some(service) = SonosService::from_urn(&service_type) {
                        services.entry(service).or_insert(ServiceEndpoints {
                            control_path: absolute_path(&control, service.control_path()),
                            event_path: absolute_path(&event_sub, service.event_path()),
                        });
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let udn = fields
        .remove("UDN")
        .filter(|u| !u.is_empty())
        .ok_or_else(|| DiscoveryError::Description("missing UDN".into()))?;

    Ok(DeviceInfo {
        product: String::new(),
        model_name: fields.remove("modelName").unwrap_or_default(),
        friendly_name: fields.remove("friendlyName").unwrap_or_default(),
        manufacturer: fields.remove("manufacturer").unwrap_or_default(),
        udn,
        host,
        services,
    })
}

fn description_text(reader: &mut Reader<&[u8]>) -> DiscoveryResult<String> {
    read_element_text(reader).map_err(|e| DiscoveryError::Description(e.to_string()))
}

fn absolute_path(path: &str, default: &str) -> String {
    let path = path.trim();
    if path.is_empty() {
        default.to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
pub(crate) fn test_device(host: &str) -> DeviceInfo {
    DeviceInfo {
        product: "Sonos".into(),
        model_name: "Sonos One".into(),
        friendly_name: "Kitchen".into(),
        manufacturer: "Sonos, Inc.".into(),
        udn: "uuid:RINCON_000E58A0B1C201400".into(),
        host: host.into(),
        services: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:ZonePlayer:1</deviceType>
    <friendlyName>192.168.1.20 - Sonos One</friendlyName>
    <manufacturer>Sonos, Inc.</manufacturer>
    <modelName>Sonos One</modelName>
    <UDN>uuid:RINCON_000E58A0B1C201400</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AlarmClock:1</serviceType>
        <controlURL>/AlarmClock/Control</controlURL>
        <eventSubURL>/AlarmClock/Event</eventSubURL>
      </service>
    </serviceList>
    <deviceList>
      <device>
        <friendlyName>Kitchen Media Server</friendlyName>
        <UDN>uuid:RINCON_000E58A0B1C201400_MS</UDN>
        <serviceList>
          <service>
            <serviceType>urn:schemas-upnp-org:service:ContentDirectory:1</serviceType>
            <controlURL>/MediaServer/ContentDirectory/Control</controlURL>
            <eventSubURL>/MediaServer/ContentDirectory/Event</eventSubURL>
          </service>
        </serviceList>
      </device>
      <device>
        <UDN>uuid:RINCON_000E58A0B1C201400_MR</UDN>
        <serviceList>
          <service>
            <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
            <controlURL>/MediaRenderer/RenderingControl/Control</controlURL>
            <eventSubURL>/MediaRenderer/RenderingControl/Event</eventSubURL>
          </service>
          <service>
            <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
            <controlURL>MediaRenderer/AVTransport/Control</controlURL>
            <eventSubURL>/MediaRenderer/AVTransport/Event</eventSubURL>
          </service>
        </serviceList>
      </device>
    </deviceList>
  </device>
</root>"#;

    #[test]
    fn root_device_fields_are_kept() {
        let device = parse_description(DESCRIPTION, "192.168.1.20:1400".into()).unwrap();
        assert_eq!(device.friendly_name, "192.168.1.20 - Sonos One");
        assert_eq!(device.model_name, "Sonos One");
        assert_eq!(device.manufacturer, "Sonos, Inc.");
        assert_eq!(device.udn, "uuid:RINCON_000E58A0B1C201400");
        assert_eq!(device.rincon_id(), "RINCON_000E58A0B1C201400");
        assert_eq!(device.queue_uri(), "x-rincon-queue:RINCON_000E58A0B1C201400#0");
    }

    #[test]
    fn service_paths_come_from_embedded_devices() {
        let device = parse_description(DESCRIPTION, "192.168.1.20:1400".into()).unwrap();
        assert_eq!(
            device.control_path(SonosService::AVTransport),
            "/MediaRenderer/AVTransport/Control"
        );
        assert_eq!(
            device.event_url(SonosService::RenderingControl),
            "http://192.168.1.20:1400/MediaRenderer/RenderingControl/Event"
        );
        assert_eq!(
            device.control_path(SonosService::ContentDirectory),
            "/MediaServer/ContentDirectory/Control"
        );
    }

    #[test]
    fn missing_udn_is_an_error() {
        let err = parse_description("<root><device/></root>", "h:1400".into()).unwrap_err();
        assert!(matches!(err, DiscoveryError::Description(_)));
    }

    #[test]
    fn unknown_services_fall_back_to_defaults() {
        let device = test_device("10.0.0.2:1400");
        assert_eq!(
            device.control_path(SonosService::RenderingControl),
            SonosService::RenderingControl.control_path()
        );
        assert_eq!(device.base_url(), "http://10.0.0.2:1400");
    }
}
