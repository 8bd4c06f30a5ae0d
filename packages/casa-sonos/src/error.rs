//! Crate-wide error type and its HTTP mapping.
//!
//! Each module defines its own `thiserror` enum; [`CasaError`] is what the
//! HTTP surfaces return. It renders as `{"error", "message", "status"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::file_server::FileServerError;
use crate::media::{DidlError, PlaylistError};
use crate::plist::PlistError;
use crate::sonos::controller::ControlError;
use crate::sonos::discovery::DiscoveryError;
use crate::sonos::gena::GenaError;
use crate::sonos::session::SessionError;
use crate::sonos::soap::SoapError;

/// Machine-readable error codes for API responses.
pub trait ErrorCode {
    fn code(&self) -> &'static str;
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::SocketBind(_) => "socket_bind_failed",
            Self::SendSearch(_) => "ssdp_send_failed",
            Self::NoInterfaces => "no_network_interfaces",
            Self::Interface(_) => "interface_not_found",
            Self::NoDeviceFound => "no_device_found",
            Self::Http(_) => "http_request_failed",
            Self::Description(_) => "invalid_device_description",
        }
    }
}

impl ErrorCode for SoapError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_, _) => "http_error_status",
            Self::Fault(_) => "soap_fault",
            Self::Parse(_) => "soap_parse_error",
        }
    }
}

impl ErrorCode for GenaError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::SubscriptionFailed(_) => "gena_subscription_failed",
            Self::RenewalFailed(_) => "gena_renewal_failed",
            Self::MissingSid => "gena_missing_sid",
            Self::Request(_) => "gena_invalid_request",
        }
    }
}

impl ErrorCode for ControlError {
    fn code(&self) -> &'static str {
        match self {
            Self::Soap(e) => e.code(),
            Self::UnknownPlayMode(_) => "unknown_play_mode",
            Self::InvalidQueuePosition(_) => "invalid_queue_position",
            Self::NotConnected => "not_connected",
        }
    }
}

impl ErrorCode for FileServerError {
    fn code(&self) -> &'static str {
        match self {
            Self::PortExhausted(_) => "no_free_port",
            Self::Io(_) => "file_server_io",
        }
    }
}

impl ErrorCode for SessionError {
    fn code(&self) -> &'static str {
        match self {
            Self::Discovery(e) => e.code(),
            Self::PortExhausted(_) => "no_free_port",
            Self::Soap(e) => e.code(),
            Self::Control(e) => e.code(),
            Self::Gena(e) => e.code(),
            Self::Network(_) => "network_error",
            Self::FileServer(e) => e.code(),
            Self::Io(_) => "io_error",
            Self::Config(_) => "configuration_error",
        }
    }
}

impl ErrorCode for PlistError {
    fn code(&self) -> &'static str {
        match self {
            Self::TagMismatch { .. } | Self::TagNotAllowed(_) | Self::UnknownTag(_) => {
                "plist_unexpected_tag"
            }
            Self::IncompatibleType { .. } => "plist_incompatible_type",
            Self::InvalidScalar { .. } => "plist_invalid_value",
            Self::Xml(_) | Self::MissingRoot => "plist_malformed",
            Self::Custom(_) => "plist_error",
        }
    }
}

impl ErrorCode for PlaylistError {
    fn code(&self) -> &'static str {
        match self {
            Self::NoPlaylists => "playlist_missing",
            Self::MultiplePlaylists(_) => "playlist_ambiguous",
            Self::MissingTrack(_) => "playlist_missing_track",
            Self::Plist(e) => e.code(),
        }
    }
}

impl ErrorCode for DidlError {
    fn code(&self) -> &'static str {
        match self {
            Self::NoItems | Self::MultipleItems(_) => "didl_item_count",
            Self::InvalidDuration(_) => "didl_invalid_duration",
            Self::Xml(_) => "didl_malformed",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CasaError
// ─────────────────────────────────────────────────────────────────────────────

/// Error returned by the HTTP surfaces.
#[derive(Debug, Error)]
pub enum CasaError {
    /// Player discovery or description failed.
    #[error("Discovery failed: {message}")]
    Discovery { code: &'static str, message: String },

    /// A UPnP request to the player failed.
    #[error("SOAP request failed: {message}")]
    Soap { code: &'static str, message: String },

    /// No session with the player right now.
    #[error("Not connected to a Sonos player")]
    NotConnected,

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The request body is not a playable playlist.
    #[error("Invalid playlist: {message}")]
    Playlist { code: &'static str, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// IP detection or interface lookup failed.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CasaError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Discovery { code, .. }
            | Self::Soap { code, .. }
            | Self::Playlist { code, .. } => *code,
            Self::NotConnected => "not_connected",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound(_) => "not_found",
            Self::Network(_) => "network_error",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Playlist { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotConnected | Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Discovery { .. } | Self::Soap { .. } => StatusCode::BAD_GATEWAY,
            Self::Network(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for HTTP handlers.
pub type CasaResult<T> = Result<T, CasaError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for CasaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::warn!("[API] {} ({})", self, self.code());
        }
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversions
// ─────────────────────────────────────────────────────────────────────────────

impl From<SoapError> for CasaError {
    fn from(err: SoapError) -> Self {
        Self::Soap {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<DiscoveryError> for CasaError {
    fn from(err: DiscoveryError) -> Self {
        Self::Discovery {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<GenaError> for CasaError {
    fn from(err: GenaError) -> Self {
        Self::Soap {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<ControlError> for CasaError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Soap(e) => e.into(),
            ControlError::NotConnected => Self::NotConnected,
            e @ (ControlError::UnknownPlayMode(_) | ControlError::InvalidQueuePosition(_)) => {
                Self::InvalidRequest(e.to_string())
            }
        }
    }
}

impl From<SessionError> for CasaError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Discovery(e) => e.into(),
            SessionError::Soap(e) => e.into(),
            SessionError::Control(e) => e.into(),
            SessionError::Gena(e) => e.into(),
            SessionError::Network(e) => Self::Network(e.to_string()),
            SessionError::Config(message) => Self::Configuration(message),
            e => Self::Internal(e.to_string()),
        }
    }
}

impl From<PlaylistError> for CasaError {
    fn from(err: PlaylistError) -> Self {
        Self::Playlist {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<PlistError> for CasaError {
    fn from(err: PlistError) -> Self {
        Self::Playlist {
            code: err.code(),
            message: err.to_string(),
        }
    }
}
