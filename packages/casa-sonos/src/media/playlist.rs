//! Named playlists and their iTunes-style property-list form.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::m3u;
use super::track::Track;
use crate::plist::{self, Date, PlistError};

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("property list holds no playlists")]
    NoPlaylists,

    #[error("property list holds {0} playlists, expected one")]
    MultiplePlaylists(usize),

    #[error("playlist references missing track {0}")]
    MissingTrack(i64),

    #[error(transparent)]
    Plist(#[from] PlistError),
}

pub type PlaylistResult<T> = Result<T, PlaylistError>;

/// A named, ordered list of tracks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    #[serde(default, alias = "Name")]
    pub name: String,
    #[serde(default, alias = "Items")]
    pub items: Vec<Track>,
}

impl Playlist {
    pub fn from_m3u(text: &str) -> Self {
        Self {
            name: String::new(),
            items: m3u::parse(text),
        }
    }

    #[must_use]
    pub fn to_m3u(&self) -> String {
        m3u::write(&self.items)
    }

    /// Reads a library document holding exactly one playlist.
    pub fn from_plist(xml: &str) -> PlaylistResult<Self> {
        let library: Library = plist::from_str(xml)?;
        let mut playlists = library.playlists;
        let playlist = match playlists.len() {
            0 => return Err(PlaylistError::NoPlaylists),
            1 => playlists.remove(0),
            n => return Err(PlaylistError::MultiplePlaylists(n)),
        };

        let items = playlist
            .items
            .iter()
            .map(|item| {
                library
                    .tracks
                    .get(&item.track_id)
                    .map(LibraryTrack::to_track)
                    .ok_or(PlaylistError::MissingTrack(item.track_id))
            })
            .collect::<PlaylistResult<Vec<_>>>()?;

        Ok(Self {
            name: playlist.name,
            items,
        })
    }

    /// Writes the playlist as a library document.
    ///
    /// Tracks sharing a URI are stored once; ids count up from 1.
    pub fn to_plist(&self) -> PlaylistResult<String> {
        let mut tracks = BTreeMap::new();
        let mut seen: HashMap<&str, i64> = HashMap::new();
        let mut items = Vec::with_capacity(self.items.len());

        for track in &self.items {
            let next_id = seen.len() as i64 + 1;
            let id = *seen.entry(track.uri.as_str()).or_insert_with(|| {
                tracks.insert(next_id, LibraryTrack::from_track(next_id, track));
                next_id
            });
            items.push(LibraryItem { track_id: id });
        }

        let library = Library {
            major_version: 1,
            minor_version: 1,
            date: Some(Date::now()),
            application_version: "1.0.6.10".to_string(),
            features: 5,
            show_content_ratings: true,
            tracks,
            playlists: vec![LibraryPlaylist {
                name: self.name.clone(),
                items,
            }],
        };
        Ok(plist::to_string(&library)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Library document layout
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Library {
    #[serde(rename = "Major Version")]
    major_version: i64,
    #[serde(rename = "Minor Version")]
    minor_version: i64,
    #[serde(rename = "Date", skip_serializing_if = "Option::is_none")]
    date: Option<Date>,
    #[serde(rename = "Application Version")]
    application_version: String,
    #[serde(rename = "Features")]
    features: i64,
    #[serde(rename = "Show Content Ratings")]
    show_content_ratings: bool,
    #[serde(rename = "Tracks")]
    tracks: BTreeMap<i64, LibraryTrack>,
    #[serde(rename = "Playlists")]
    playlists: Vec<LibraryPlaylist>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LibraryTrack {
    #[serde(rename = "Track ID")]
    track_id: i64,
    #[serde(rename = "Name", skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(rename = "Artist", skip_serializing_if = "String::is_empty")]
    artist: String,
    #[serde(rename = "Album", skip_serializing_if = "String::is_empty")]
    album: String,
    #[serde(rename = "Album Artist", skip_serializing_if = "String::is_empty")]
    album_artist: String,
    #[serde(rename = "Genre", skip_serializing_if = "String::is_empty")]
    genre: String,
    #[serde(rename = "Total Time")]
    total_time: i64,
    #[serde(rename = "Location")]
    location: String,
}

impl LibraryTrack {
    fn from_track(id: i64, track: &Track) -> Self {
        Self {
            track_id: id,
            name: track.title.clone().unwrap_or_default(),
            artist: track.artist.clone().unwrap_or_default(),
            album: track.album.clone().unwrap_or_default(),
            album_artist: String::new(),
            genre: track.genre.clone().unwrap_or_default(),
            total_time: track.time.map_or(0, |t| (t * 1000.0).round() as i64),
            location: track.uri.clone(),
        }
    }

    fn to_track(&self) -> Track {
        let opt = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Track {
            uri: self.location.clone(),
            title: opt(&self.name),
            artist: opt(&self.artist),
            album: opt(&self.album),
            genre: opt(&self.genre),
            time: (self.total_time > 0).then(|| self.total_time as f64 / 1000.0),
            album_art_uri: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LibraryPlaylist {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Playlist Items")]
    items: Vec<LibraryItem>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct LibraryItem {
    #[serde(rename = "Track ID")]
    track_id: i64,
}
