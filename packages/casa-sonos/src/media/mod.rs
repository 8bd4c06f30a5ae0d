//! Track and playlist formats.
//!
//! - `track` - the [`Track`] record and duration helpers
//! - `didl` - DIDL-Lite metadata used by the Sonos queue
//! - `m3u` - extended M3U playlists
//! - `playlist` - [`Playlist`] and its iTunes property-list layout

pub mod didl;
pub mod m3u;
pub mod playlist;
pub mod track;

pub use didl::{DidlError, DidlResult};
pub use playlist::{Playlist, PlaylistError, PlaylistResult};
pub use track::Track;
