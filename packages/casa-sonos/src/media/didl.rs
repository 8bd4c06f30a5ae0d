//! DIDL-Lite metadata for queue entries.
//!
//! Sonos stores one DIDL-Lite `<item>` per queue entry and hands the same
//! structure back from `ContentDirectory` browses.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use thiserror::Error;

use super::track::{format_hms_millis, parse_hms, Track};
use crate::sonos::utils::{escape_xml, get_xml_attr, read_element_text};

const DIDL_OPEN: &str = concat!(
    r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/""#,
    r#" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/""#,
    r#" xmlns:r="urn:schemas-rinconnetworks-com:metadata-1-0/""#,
    r#" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/">"#,
);

const MUSIC_TRACK_CLASS: &str = "object.item.audioItem.musicTrack";

#[derive(Debug, Error)]
pub enum DidlError {
    #[error("DIDL-Lite document has no items")]
    NoItems,

    #[error("DIDL-Lite document has {0} items, expected one")]
    MultipleItems(usize),

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("DIDL-Lite XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

pub type DidlResult<T> = Result<T, DidlError>;

/// Renders `track` as a single-item DIDL-Lite document.
///
/// The item id is the track id, so repeated references to one URI always
/// resolve to the same identifier.
pub fn marshal(track: &Track) -> String {
    let id = track.id();
    let mut didl = String::from(DIDL_OPEN);
    didl.push_str(&format!(r#"<item id="{id}" parentID="{id}">"#));
    didl.push_str(&format!("<upnp:class>{MUSIC_TRACK_CLASS}</upnp:class>"));
    didl.push_str(r#"<res protocolInfo="http-get:*:audio/mpeg:*""#);
    if let Some(secs) = track.duration_secs() {
        let duration = format_hms_millis((secs * 1000.0).round() as i64);
        didl.push_str(&format!(r#" duration="{duration}""#));
    }
    didl.push('>');
    didl.push_str(&escape_xml(&track.uri));
    didl.push_str("</res>");

    let parts = [
        ("dc:title", &track.title),
        ("dc:creator", &track.artist),
        ("upnp:album", &track.album),
        ("upnp:genre", &track.genre),
        ("upnp:albumArtURI", &track.album_art_uri),
    ];
    for (tag, value) in parts {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            didl.push_str(&format!("<{tag}>{}</{tag}>", escape_xml(value)));
        }
    }

    didl.push_str("</item></DIDL-Lite>");
    didl
}

/// Parses a document that must hold exactly one item.
pub fn unmarshal(xml: &str) -> DidlResult<Track> {
    let mut items = parse_items(xml)?;
    match items.len() {
        0 => Err(DidlError::NoItems),
        1 => Ok(items.remove(0)),
        n => Err(DidlError::MultipleItems(n)),
    }
}

/// Parses every `<item>` of a DIDL-Lite document, in document order.
pub fn parse_items(xml: &str) -> DidlResult<Vec<Track>> {
    let mut reader = Reader::from_str(xml);
    let mut tracks = Vec::new();
    let mut current: Option<Track> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let local = e.local_name();
                if local.as_ref() == b"item" {
                    current = Some(Track::default());
                    continue;
                }
                let Some(track) = current.as_mut() else {
                    continue;
                };
                match local.as_ref() {
                    b"res" => {
                        let duration = get_xml_attr(&e, b"duration");
                        track.uri = read_element_text(&mut reader)?.trim().to_string();
                        if let Some(duration) = duration.filter(|d| !d.is_empty()) {
                            let secs = parse_hms(&duration)
                                .ok_or(DidlError::InvalidDuration(duration))?;
                            track.time = Some(secs);
                        }
                    }
                    name => {
                        let slot = match name {
                            b"title" => &mut track.title,
                            b"creator" => &mut track.artist,
                            b"album" => &mut track.album,
                            b"genre" => &mut track.genre,
                            b"albumArtURI" => &mut track.album_art_uri,
                            _ => continue,
                        };
                        let text = read_element_text(&mut reader)?;
                        if !text.is_empty() && slot.is_none() {
                            *slot = Some(text);
                        }
                    }
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"item" => {
                tracks.push(Track::default());
            }
            Event::End(e) if e.local_name().as_ref() == b"item" => {
                if let Some(track) = current.take() {
                    tracks.push(track);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn while_my_guitar() -> Track {
        Track {
            uri: "http://napster.com/The_Beatles/The_White_Album/While_My_Guitar_Gently_Weeps.mp3"
                .into(),
            title: Some("While My Guitar Gently Weeps".into()),
            artist: Some("The Beatles".into()),
            album: Some("The White Album".into()),
            genre: Some("Rock".into()),
            time: Some(285.178),
            album_art_uri: Some("http://napster.com/The_Beatles/The_White_Album.jpg".into()),
        }
    }

    #[test]
    fn marshal_matches_sonos_layout() {
        let expected = concat!(
            r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns:r="urn:schemas-rinconnetworks-com:metadata-1-0/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/">"#,
            r#"<item id="346ee6a615936d25f9dac3514dd87d5b9803ceab" parentID="346ee6a615936d25f9dac3514dd87d5b9803ceab">"#,
            r#"<upnp:class>object.item.audioItem.musicTrack</upnp:class>"#,
            r#"<res protocolInfo="http-get:*:audio/mpeg:*" duration="0:04:45.178">http://napster.com/The_Beatles/The_White_Album/While_My_Guitar_Gently_Weeps.mp3</res>"#,
            r#"<dc:title>While My Guitar Gently Weeps</dc:title><dc:creator>The Beatles</dc:creator>"#,
            r#"<upnp:album>The White Album</upnp:album><upnp:genre>Rock</upnp:genre>"#,
            r#"<upnp:albumArtURI>http://napster.com/The_Beatles/The_White_Album.jpg</upnp:albumArtURI>"#,
            r#"</item></DIDL-Lite>"#,
        );
        assert_eq!(marshal(&while_my_guitar()), expected);
    }

    #[test]
    fn marshal_skips_unknown_duration_and_empty_fields() {
        let xml = marshal(&Track::new("http://host/a?x=1&y=2"));
        assert!(xml.contains(
            r#"<res protocolInfo="http-get:*:audio/mpeg:*">http://host/a?x=1&amp;y=2</res>"#
        ));
        assert!(!xml.contains("dc:title"));
    }

    #[test]
    fn unmarshal_restores_marshalled_track() {
        let original = while_my_guitar();
        let parsed = unmarshal(&marshal(&original)).unwrap();
        assert_eq!(parsed.uri, original.uri);
        assert_eq!(parsed.title, original.title);
        assert_eq!(parsed.artist, original.artist);
        assert_eq!(parsed.album, original.album);
        assert_eq!(parsed.genre, original.genre);
        assert_eq!(parsed.album_art_uri, original.album_art_uri);
        assert!((parsed.time.unwrap() - 285.178).abs() < 1e-6);
    }

    #[test]
    fn unmarshal_checks_item_count() {
        let empty = format!("{DIDL_OPEN}</DIDL-Lite>");
        assert!(matches!(unmarshal(&empty), Err(DidlError::NoItems)));

        let one = marshal(&Track::new("http://a/1.mp3"));
        let inner = one
            .trim_start_matches(DIDL_OPEN)
            .trim_end_matches("</DIDL-Lite>");
        let two = format!("{DIDL_OPEN}{inner}{inner}</DIDL-Lite>");
        assert!(matches!(unmarshal(&two), Err(DidlError::MultipleItems(2))));
    }

    #[test]
    fn parse_items_reads_sonos_queue_browse() {
        let xml = r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/">
<item id="Q:0/1" parentID="Q:0" restricted="true"><res protocolInfo="http-get:*:audio/mpeg:*" duration="0:05:20">http://192.168.1.5:12000/abc.mp3</res><upnp:albumArtURI>/getaa?u=x&amp;v=1</upnp:albumArtURI><dc:title>Jeremy</dc:title><upnp:class>object.item.audioItem.musicTrack</upnp:class><dc:creator>Pearl Jam</dc:creator><upnp:album>Ten</upnp:album></item>
<item id="Q:0/2" parentID="Q:0" restricted="true"><res protocolInfo="http-get:*:audio/mpeg:*">http://radio/stream</res><dc:title>Live</dc:title></item>
</DIDL-Lite>"#;
        let tracks = parse_items(xml).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].uri, "http://192.168.1.5:12000/abc.mp3");
        assert_eq!(tracks[0].time, Some(320.0));
        assert_eq!(tracks[0].artist.as_deref(), Some("Pearl Jam"));
        assert_eq!(tracks[0].album_art_uri.as_deref(), Some("/getaa?u=x&v=1"));
        assert_eq!(tracks[1].uri, "http://radio/stream");
        assert_eq!(tracks[1].time, None);
    }

    #[test]
    fn bad_duration_is_an_error() {
        let xml = format!(
            r#"{DIDL_OPEN}<item id="1" parentID="1"><res duration="soon">http://a</res></item></DIDL-Lite>"#
        );
        assert!(matches!(unmarshal(&xml), Err(DidlError::InvalidDuration(ref d)) if d == "soon"));
    }
}
