//! One connection to the player: the device found by discovery, its
//! renderer and the GENA subscriptions delivering its events.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use super::controller::ControlError;
use super::device::{fetch_device, DeviceInfo};
use super::discovery::{discover, DiscoveryError, SsdpConfig};
use super::gena::{GenaClient, GenaError, GenaSubscriptions};
use super::renderer::{MediaRenderer, UpnpRenderer};
use super::soap::{SoapError, SoapResult};
use crate::context::{NetworkError, PortExhausted, UrlBuilder};
use crate::file_server::FileServerError;

/// Errors establishing or maintaining a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    PortExhausted(#[from] PortExhausted),

    #[error(transparent)]
    Soap(#[from] SoapError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Gena(#[from] GenaError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    FileServer(#[from] FileServerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Convenient Result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// A connected player.
pub struct Session {
    device: Arc<DeviceInfo>,
    renderer: Arc<dyn MediaRenderer>,
    subscriptions: Option<GenaSubscriptions>,
}

impl Session {
    pub fn new(
        device: Arc<DeviceInfo>,
        renderer: Arc<dyn MediaRenderer>,
        subscriptions: Option<GenaSubscriptions>,
    ) -> Self {
        Self {
            device,
            renderer,
            subscriptions,
        }
    }

    #[must_use]
    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    #[must_use]
    pub fn renderer(&self) -> &dyn MediaRenderer {
        self.renderer.as_ref()
    }

    /// Whether a notification with `sid` belongs to this session.
    /// Sessions without subscriptions accept everything.
    #[must_use]
    pub fn accepts(&self, sid: &str) -> bool {
        self.subscriptions.as_ref().map_or(true, |subs| subs.owns(sid))
    }

    /// Renews subscriptions that are close to expiry.
    pub async fn renew(&self) -> Result<(), GenaError> {
        match &self.subscriptions {
            Some(subs) => subs.renew_due().await,
            None => Ok(()),
        }
    }

    /// Points the transport at the queue when it has no source at all.
    pub async fn prepare_queue(&self) -> SoapResult<()> {
        let current = self.renderer.get_current_uri().await?;
        if current.is_empty() {
            let queue = self.device.queue_uri();
            log::info!("[Session] Transport has no source, selecting {}", queue);
            self.renderer.set_transport_uri(&queue, "").await?;
        }
        Ok(())
    }

    /// Cancels the subscriptions, best effort.
    pub async fn close(&self) {
        if let Some(subs) = &self.subscriptions {
            subs.unsubscribe_all().await;
        }
        log::debug!("[Session] Closed session with {}", self.device.host);
    }
}

/// Produces ready-to-use sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> SessionResult<Session>;
}

/// Connects over the network: SSDP, description, GENA, queue preparation.
pub struct UpnpConnector {
    client: Client,
    ssdp: SsdpConfig,
    interface: Option<String>,
    search_port: u16,
    callbacks: UrlBuilder,
}

impl UpnpConnector {
    pub fn new(
        client: Client,
        ssdp: SsdpConfig,
        interface: Option<String>,
        search_port: u16,
        callbacks: UrlBuilder,
    ) -> Self {
        Self {
            client,
            ssdp,
            interface,
            search_port,
            callbacks,
        }
    }
}

#[async_trait]
impl Connector for UpnpConnector {
    async fn connect(&self) -> SessionResult<Session> {
        let response = discover(&self.ssdp, self.interface.as_deref(), self.search_port).await?;
        let device = Arc::new(fetch_device(&self.client, &response).await?);
        log::info!(
            "[Session] Found {} ({}) at {}",
            device.friendly_name,
            device.model_name,
            device.host
        );

        let renderer: Arc<dyn MediaRenderer> =
            Arc::new(UpnpRenderer::new(self.client.clone(), Arc::clone(&device)));
        let subscriptions = GenaSubscriptions::new(GenaClient::new(self.client.clone()));
        subscriptions.subscribe_all(&device, &self.callbacks).await?;

        let session = Session::new(device, renderer, Some(subscriptions));
        if let Err(e) = session.prepare_queue().await {
            session.close().await;
            return Err(e.into());
        }
        Ok(session)
    }
}
