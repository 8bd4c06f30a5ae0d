use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

/// Default Sonos speaker control port.
pub const SONOS_PORT: u16 = 1400;

// ─────────────────────────────────────────────────────────────────────────────
// XML Parsing Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Reads the text content of the element whose start tag was just consumed.
///
/// Entity references are decoded; nested elements are skipped over, their
/// text included.
pub(crate) fn read_element_text(reader: &mut Reader<&[u8]>) -> Result<String, quick_xml::Error> {
    let mut text = String::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Text(t) => {
                let raw = String::from_utf8_lossy(&t);
                text.push_str(&html_escape::decode_html_entities(&raw));
            }
            Event::GeneralRef(r) => {
                let entity = format!("&{};", String::from_utf8_lossy(&r));
                text.push_str(&html_escape::decode_html_entities(&entity));
            }
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
            Event::Start(_) => depth += 1,
            Event::End(_) if depth == 0 => return Ok(text),
            Event::End(_) => depth -= 1,
            Event::Eof => return Ok(text),
            _ => {}
        }
    }
}

/// Extracts text content from the first occurrence of an XML element.
///
/// Searches for an element by its local name (ignoring namespace prefixes)
/// and returns its decoded text content.
///
/// # Example
/// ```ignore
/// let xml = r#"<u:CurrentVolume>42</u:CurrentVolume>"#;
/// assert_eq!(extract_xml_text(xml, "CurrentVolume"), Some("42".to_string()));
/// ```
pub fn extract_xml_text(xml: &str, element_name: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let target = element_name.as_bytes();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == target => {
                return read_element_text(&mut reader).ok();
            }
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == target => {
                return Some(String::new());
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Extracts `val` attributes from empty XML elements.
///
/// UPnP `LastChange` payloads carry state as empty elements:
/// ```xml
/// <TransportState val="PLAYING"/>
/// <CurrentTrackURI val="http://..."/>
/// ```
///
/// Only the first occurrence of each name is kept. `accept` can reject
/// an element by its attributes (used to pick a volume channel).
pub fn extract_val_attrs_where<F>(
    xml: &str,
    element_names: &[&str],
    accept: F,
) -> HashMap<String, String>
where
    F: Fn(&BytesStart) -> bool,
{
    let mut result = HashMap::new();
    let mut reader = Reader::from_str(xml);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                let local = e.local_name();
                let Ok(name) = std::str::from_utf8(local.as_ref()) else {
                    continue;
                };
                if !element_names.contains(&name) || result.contains_key(name) || !accept(e) {
                    continue;
                }
                if let Some(val) = get_xml_attr(e, b"val") {
                    result.insert(name.to_string(), val);
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    result
}

/// [`extract_val_attrs_where`] accepting every element.
pub fn extract_empty_val_attrs(xml: &str, element_names: &[&str]) -> HashMap<String, String> {
    extract_val_attrs_where(xml, element_names, |_| true)
}

/// Gets an attribute value from an XML element, entity-decoded.
pub fn get_xml_attr(elem: &BytesStart, attr_name: &[u8]) -> Option<String> {
    elem.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == attr_name || a.key.local_name().as_ref() == attr_name)
        .map(|a| {
            let raw = String::from_utf8_lossy(&a.value);
            html_escape::decode_html_entities(&raw).into_owned()
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Building
// ─────────────────────────────────────────────────────────────────────────────

/// Builds a Sonos speaker URL for the given host and endpoint.
///
/// `host` may already carry a port (`192.168.1.20:1400`); otherwise the
/// default control port is used.
pub fn build_sonos_url(host: &str, endpoint: &str) -> String {
    if host.contains(':') {
        format!("http://{}{}", host, endpoint)
    } else {
        format!("http://{}:{}{}", host, SONOS_PORT, endpoint)
    }
}

/// Extracts `host:port` from a UPnP `LOCATION` URL.
///
/// # Example
/// ```ignore
/// let host = host_from_location("http://192.168.1.100:1400/xml/device_description.xml");
/// assert_eq!(host.as_deref(), Some("192.168.1.100:1400"));
/// ```
pub fn host_from_location(location: &str) -> Option<String> {
    let url = url::Url::parse(location).ok()?;
    let host = url.host_str()?;
    Some(format!("{}:{}", host, url.port_or_known_default()?))
}

// ─────────────────────────────────────────────────────────────────────────────
// XML Encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Escapes XML special characters for embedding in XML content.
///
/// Used for SOAP arguments and DIDL-Lite metadata values.
///
/// # Example
/// ```ignore
/// assert_eq!(escape_xml("Tom & Jerry"), "Tom &amp; Jerry");
/// assert_eq!(escape_xml("<title>"), "&lt;title&gt;");
/// ```
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
