//! casa-sonos - Sonos control subsystem of the casa home hub.
//!
//! # Architecture
//!
//! - [`sonos`]: discovery, SOAP control, GENA eventing and the supervised
//!   [`SonosHub`]
//! - [`state`]: the player [`State`] and the [`StateEngine`] publishing diffs
//! - [`file_server`]: HTTP server that lets the player fetch local files
//! - [`media`]: tracks, DIDL-Lite, M3U and iTunes playlists
//! - [`plist`]: serde support for XML property lists
//! - [`api`]: the HTTP API over a hub
//! - [`config`]: [`SonosConfig`]
//! - [`error`]: error types and their HTTP mapping

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod file_server;
pub mod media;
pub mod plist;
pub mod protocol_constants;
pub mod sonos;
pub mod state;

pub use config::{NetworkConfig, SonosConfig};
pub use context::{IpDetector, LocalIpDetector, NetworkContext, NetworkError, PortRange, UrlBuilder};
pub use error::{CasaError, CasaResult, ErrorCode};
pub use file_server::{FileServer, FileServerError};
pub use media::{Playlist, Track};
pub use sonos::{ControlError, SessionError, SessionResult, SonosHub};
pub use state::{PlayMode, State, StateEngine, TransportState};

pub use api::{create_router, start_server};
