//! The long-lived handle to the player.
//!
//! [`SonosHub`] owns the file server, the GENA callback listener, the state
//! engine and the current [`Session`]. A supervisor task reconnects when no
//! event arrived within the idle period, when renewal fails, or on request.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::Client;
use tokio::sync::{mpsc, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::bridge::EventBridge;
use super::controller::{ControlError, ControlResult, PlaybackController};
use super::device::DeviceInfo;
use super::discovery::DiscoveryError;
use super::gena::{serve_callbacks, Notification};
use super::session::{Connector, Session, SessionError, SessionResult, UpnpConnector};
use crate::config::SonosConfig;
use crate::context::{find_available_port, LocalIpDetector, NetworkContext};
use crate::file_server::FileServer;
use crate::media::Track;
use crate::protocol_constants::{GENA_RENEWAL_CHECK_SECS, SOAP_TIMEOUT_SECS};
use crate::state::{State, StateEngine};

/// Connected Sonos player plus everything needed to keep it connected.
pub struct SonosHub {
    controller: Arc<PlaybackController>,
    bridge: EventBridge,
    connector: Box<dyn Connector>,
    session: RwLock<Option<Arc<Session>>>,
    reconnect: Notify,
    idle: Duration,
    cancel: CancellationToken,
}

impl SonosHub {
    /// Starts every service and connects to the player.
    ///
    /// Diffs of the player state are published on `updates`. Fails when the
    /// first connection attempt fails; later failures are retried.
    pub async fn start(
        config: SonosConfig,
        updates: mpsc::Sender<State>,
    ) -> SessionResult<Arc<Self>> {
        config.validate().map_err(SessionError::Config)?;

        let interface = config.network.interface.clone();
        let detector = LocalIpDetector::new(interface.clone());
        let ctx = NetworkContext::resolve(config.network.advertise_ip, interface, &detector)?;
        log::info!("[Session] Advertising {} to the player", ctx.local_ip);

        let cancel = CancellationToken::new();
        let result = Self::start_services(&config, &ctx, updates, cancel.clone()).await;
        if result.is_err() {
            cancel.cancel();
        }
        result
    }

    async fn start_services(
        config: &SonosConfig,
        ctx: &NetworkContext,
        updates: mpsc::Sender<State>,
        cancel: CancellationToken,
    ) -> SessionResult<Arc<Self>> {
        let files =
            FileServer::start(ctx, config.network.file_server_ports, cancel.child_token()).await?;

        // The control port is only reserved here; SSDP binds it per search.
        let ports = config.network.callback_ports;
        let (control_port, control_listener) = find_available_port(ports).await?;
        drop(control_listener);
        let (event_port, event_listener) = find_available_port(ports.after(control_port)).await?;
        log::info!(
            "[Session] Control point port {}, event port {}",
            control_port,
            event_port
        );

        let (notify_tx, notify_rx) = mpsc::channel(config.notification_channel_capacity);
        let callbacks_cancel = cancel.child_token();
        tokio::spawn(async move {
            if let Err(e) = serve_callbacks(event_listener, notify_tx, callbacks_cancel).await {
                log::error!("[GENA] Callback server error: {}", e);
            }
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
            .build()
            .map_err(DiscoveryError::from)?;
        let connector = UpnpConnector::new(
            client,
            config.ssdp.clone(),
            config.network.interface.clone(),
            control_port,
            ctx.url_builder(event_port),
        );

        Self::with_connector(
            Box::new(connector),
            Arc::new(StateEngine::new(updates)),
            files,
            notify_rx,
            config.idle_reconnect(),
            cancel,
        )
        .await
    }

    /// Builds a hub around an existing connector and notification source,
    /// connects once and spawns the supervisor.
    pub async fn with_connector(
        connector: Box<dyn Connector>,
        engine: Arc<StateEngine>,
        files: Arc<FileServer>,
        notifications: mpsc::Receiver<Notification>,
        idle: Duration,
        cancel: CancellationToken,
    ) -> SessionResult<Arc<Self>> {
        let controller = Arc::new(PlaybackController::new(engine, files));
        let hub = Arc::new(Self {
            bridge: EventBridge::new(Arc::clone(&controller)),
            controller,
            connector,
            session: RwLock::new(None),
            reconnect: Notify::new(),
            idle,
            cancel,
        });

        hub.reconnect_now().await?;
        tokio::spawn(Arc::clone(&hub).supervise(notifications));
        Ok(hub)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Supervisor
    // ─────────────────────────────────────────────────────────────────────────

    async fn supervise(self: Arc<Self>, mut notifications: mpsc::Receiver<Notification>) {
        let idle = tokio::time::sleep(self.idle);
        tokio::pin!(idle);

        let period = Duration::from_secs(GENA_RENEWAL_CHECK_SECS);
        let mut renewal = tokio::time::interval_at(Instant::now() + period, period);
        renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::info!("[Session] Shutting down supervisor");
                    break;
                }
                () = &mut idle => {
                    log::info!("[Session] No events for {:?}, reconnecting", self.idle);
                    self.reconnect_logged().await;
                    idle.as_mut().reset(Instant::now() + self.idle);
                }
                _ = self.reconnect.notified() => {
                    log::info!("[Session] Reconnect requested");
                    self.reconnect_logged().await;
                    idle.as_mut().reset(Instant::now() + self.idle);
                }
                Some(notification) = notifications.recv() => {
                    idle.as_mut().reset(Instant::now() + self.idle);
                    self.dispatch(&notification).await;
                }
                _ = renewal.tick() => {
                    let Some(session) = self.current_session() else {
                        continue;
                    };
                    if let Err(e) = session.renew().await {
                        log::warn!("[GENA] Renewal failed, reconnecting: {}", e);
                        self.reconnect_logged().await;
                        idle.as_mut().reset(Instant::now() + self.idle);
                    }
                }
            }
        }

        let session = self.session.write().take();
        if let Some(session) = session {
            session.close().await;
        }
    }

    async fn dispatch(&self, notification: &Notification) {
        let Some(session) = self.current_session() else {
            log::debug!("[GENA] Event before first session, ignoring");
            return;
        };
        if !session.accepts(&notification.sid) {
            log::debug!("[GENA] Ignoring event for stale SID {}", notification.sid);
            return;
        }
        self.bridge.handle(notification, session.renderer()).await;
    }

    /// Replaces the session and merges the player's full state.
    async fn reconnect_now(&self) -> SessionResult<()> {
        let session = Arc::new(self.connector.connect().await?);
        let previous = self.session.write().replace(Arc::clone(&session));
        if let Some(previous) = previous {
            previous.close().await;
        }

        let engine = self.controller.engine();
        engine.clear_error();
        let state = self.controller.fetch_state(session.renderer()).await?;
        engine.apply_update(state);
        log::info!(
            "[Session] Connected to {} at {}",
            session.device().friendly_name,
            session.device().host
        );
        Ok(())
    }

    async fn reconnect_logged(&self) {
        if let Err(e) = self.reconnect_now().await {
            log::error!("[Session] Reconnect failed: {}", e);
            let mut update = State::now();
            update.error = Some(e.to_string());
            self.controller.engine().apply_update(update);
        }
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        self.session.read().clone()
    }

    fn connected(&self) -> ControlResult<Arc<Session>> {
        self.current_session().ok_or(ControlError::NotConnected)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────────

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> State {
        self.controller.engine().snapshot()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.read().is_some()
    }

    /// The connected device, if any.
    #[must_use]
    pub fn device(&self) -> Option<DeviceInfo> {
        self.current_session().map(|s| s.device().clone())
    }

    #[must_use]
    pub fn dropped_updates(&self) -> u64 {
        self.controller.engine().dropped_updates()
    }

    /// Wakes the supervisor to reconnect now.
    pub fn request_reconnect(&self) {
        self.reconnect.notify_one();
    }

    /// Stops the supervisor and every server started by [`SonosHub::start`].
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Playback
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetches the full player state, applies it and returns the snapshot.
    pub async fn check(&self) -> ControlResult<State> {
        let session = self.connected()?;
        self.controller.check(session.renderer()).await
    }

    pub async fn play(&self) -> ControlResult<()> {
        let session = self.connected()?;
        self.controller.play(session.renderer()).await
    }

    pub async fn pause(&self) -> ControlResult<()> {
        let session = self.connected()?;
        self.controller.pause(session.renderer()).await
    }

    pub async fn stop(&self) -> ControlResult<()> {
        let session = self.connected()?;
        self.controller.stop(session.renderer()).await
    }

    pub async fn set_volume(&self, volume: i64) -> ControlResult<()> {
        let session = self.connected()?;
        self.controller.set_volume(session.renderer(), volume).await
    }

    pub async fn mute(&self) -> ControlResult<()> {
        let session = self.connected()?;
        self.controller.mute(session.renderer()).await
    }

    pub async fn unmute(&self) -> ControlResult<()> {
        let session = self.connected()?;
        self.controller.unmute(session.renderer()).await
    }

    pub async fn set_play_mode(&self, mask: u8) -> ControlResult<()> {
        let session = self.connected()?;
        self.controller.set_play_mode(session.renderer(), mask).await
    }

    pub async fn set_queue_pos(&self, index: i64) -> ControlResult<()> {
        let session = self.connected()?;
        self.controller.set_queue_pos(session.renderer(), index).await
    }

    pub async fn skip(&self, delta: i64) -> ControlResult<()> {
        let session = self.connected()?;
        self.controller.skip(session.renderer(), delta).await
    }

    pub async fn skip_forward(&self) -> ControlResult<()> {
        self.skip(1).await
    }

    pub async fn skip_backward(&self) -> ControlResult<()> {
        self.skip(-1).await
    }

    pub async fn seek_to(&self, ms: i64) -> ControlResult<()> {
        let session = self.connected()?;
        self.controller.seek_to(session.renderer(), ms).await
    }

    pub async fn seek_by(&self, delta_ms: i64) -> ControlResult<()> {
        let session = self.connected()?;
        self.controller.seek_by(session.renderer(), delta_ms).await
    }

    pub async fn clear_queue(&self) -> ControlResult<()> {
        let session = self.connected()?;
        self.controller.clear_queue(session.renderer()).await
    }

    pub async fn append_to_queue(&self, tracks: &[Track]) -> ControlResult<()> {
        let session = self.connected()?;
        self.controller.append_to_queue(session.renderer(), tracks).await
    }

    pub async fn insert_into_queue(&self, tracks: &[Track], pos: i64) -> ControlResult<()> {
        let session = self.connected()?;
        self.controller.insert_into_queue(session.renderer(), tracks, pos).await
    }

    pub async fn replace_queue(&self, tracks: &[Track]) -> ControlResult<()> {
        let session = self.connected()?;
        self.controller.replace_queue(session.renderer(), tracks).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::context::UrlBuilder;
    use crate::sonos::device::test_device;
    use crate::sonos::services::SonosService;
    use crate::sonos::test_fixtures::{rendering_control_body, MockRenderer};

    const IDLE: Duration = Duration::from_secs(600);

    /// Hands out sessions over one shared mock renderer.
    pub(crate) struct MockConnector {
        pub renderer: Arc<MockRenderer>,
        pub connects: AtomicUsize,
        pub fail: AtomicBool,
    }

    impl MockConnector {
        pub(crate) fn new(renderer: Arc<MockRenderer>) -> Arc<Self> {
            Arc::new(Self {
                renderer,
                connects: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }

        pub(crate) fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for Arc<MockConnector> {
        async fn connect(&self) -> SessionResult<Session> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(DiscoveryError::NoDeviceFound.into());
            }
            let renderer: Arc<dyn crate::sonos::renderer::MediaRenderer> = self.renderer.clone();
            Ok(Session::new(Arc::new(test_device("192.168.1.40")), renderer, None))
        }
    }

    pub(crate) struct Harness {
        pub hub: Arc<SonosHub>,
        pub connector: Arc<MockConnector>,
        pub renderer: Arc<MockRenderer>,
        pub events: mpsc::Sender<Notification>,
        pub updates: mpsc::Receiver<State>,
    }

    pub(crate) async fn harness() -> Harness {
        let renderer = Arc::new(MockRenderer::new());
        let connector = MockConnector::new(Arc::clone(&renderer));
        let (updates_tx, updates) = mpsc::channel(64);
        let (events, events_rx) = mpsc::channel(16);
        let files = Arc::new(FileServer::new(UrlBuilder::new("10.0.0.9", 12000)));

        let hub = SonosHub::with_connector(
            Box::new(Arc::clone(&connector)),
            Arc::new(StateEngine::new(updates_tx)),
            files,
            events_rx,
            IDLE,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        Harness {
            hub,
            connector,
            renderer,
            events,
            updates,
        }
    }

    fn volume_event(volume: u8) -> Notification {
        Notification {
            service: SonosService::RenderingControl,
            sid: "uuid:RINCON_1-1".into(),
            seq: None,
            body: rendering_control_body(&format!(r#"<Volume channel="Master" val="{volume}"/>"#)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_connect_fetches_full_state() {
        let h = harness().await;
        assert!(h.hub.is_connected());
        assert_eq!(h.connector.connects(), 1);

        let state = h.hub.state();
        assert_eq!(state.volume, Some(30));
        assert_eq!(state.tracks, Some(vec![]));
        assert_eq!(h.hub.device().unwrap().friendly_name, "Kitchen");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_first_connect_fails_start() {
        let renderer = Arc::new(MockRenderer::new());
        let connector = MockConnector::new(renderer);
        connector.fail.store(true, Ordering::SeqCst);
        let (updates_tx, _updates) = mpsc::channel(4);
        let (_events, events_rx) = mpsc::channel(4);

        let result = SonosHub::with_connector(
            Box::new(connector),
            Arc::new(StateEngine::new(updates_tx)),
            Arc::new(FileServer::new(UrlBuilder::new("10.0.0.9", 12000))),
            events_rx,
            IDLE,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(
            result,
            Err(SessionError::Discovery(DiscoveryError::NoDeviceFound))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_period_triggers_reconnect() {
        let h = harness().await;

        tokio::time::sleep(IDLE - Duration::from_secs(1)).await;
        assert_eq!(h.connector.connects(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn events_reset_the_idle_timer() {
        let h = harness().await;

        tokio::time::sleep(Duration::from_secs(500)).await;
        h.events.send(volume_event(12)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(500)).await;
        assert_eq!(h.connector.connects(), 1);
        assert_eq!(h.hub.state().volume, Some(12));

        tokio::time::sleep(Duration::from_secs(101)).await;
        assert_eq!(h.connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn requested_reconnect_runs_immediately() {
        let h = harness().await;
        h.hub.request_reconnect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconnect_records_error_and_keeps_session() {
        let mut h = harness().await;
        while h.updates.try_recv().is_ok() {}

        h.connector.fail.store(true, Ordering::SeqCst);
        h.hub.request_reconnect();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(h.hub.is_connected());
        let diff = h.updates.recv().await.unwrap();
        assert!(diff.error.unwrap().contains("no Sonos device found"));

        h.connector.fail.store(false, Ordering::SeqCst);
        h.hub.request_reconnect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.connector.connects(), 3);
        assert_eq!(h.hub.state().error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn operations_need_a_session_and_reach_the_renderer() {
        let h = harness().await;
        h.renderer.clear_calls();

        h.hub.set_volume(55).await.unwrap();
        assert_eq!(h.renderer.calls(), vec!["SetVolume 55"]);
        assert_eq!(h.hub.state().volume, Some(55));

        h.hub.shutdown();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!h.hub.is_connected());
        assert!(matches!(h.hub.play().await, Err(ControlError::NotConnected)));
    }
}
