//! Sonos player control over UPnP.
//!
//! # Module Structure
//!
//! - `discovery` - SSDP search for the player
//! - `device` - device description parsing
//! - `services` - UPnP service definitions (URNs, paths)
//! - `soap` - low-level SOAP requests
//! - `renderer` - the [`MediaRenderer`] seam and its SOAP implementation
//! - `gena` - event subscriptions and the NOTIFY callback server
//! - `events` - NOTIFY payload parsing
//! - `controller` - playback operations
//! - `bridge` - events to state updates
//! - `session` - one connection to the player
//! - `hub` - [`SonosHub`], the supervised long-lived handle
//! - `utils` - XML helpers

pub mod bridge;
pub mod controller;
pub mod device;
pub mod discovery;
pub mod events;
pub mod gena;
pub mod hub;
pub mod renderer;
pub(crate) mod retry;
pub mod services;
pub mod session;
pub mod soap;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use controller::{ControlError, ControlResult, PlaybackController};
pub use device::DeviceInfo;
pub use hub::SonosHub;
pub use renderer::{MediaRenderer, UpnpRenderer};
pub use services::SonosService;
pub use session::{Connector, Session, SessionError, SessionResult};
