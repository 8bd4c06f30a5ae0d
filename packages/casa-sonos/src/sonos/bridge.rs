//! Turns GENA notifications into state updates.

use std::sync::Arc;

use super::controller::PlaybackController;
use super::events::{parse_av_transport, parse_rendering_control, AvTransportEvent};
use super::gena::Notification;
use super::renderer::MediaRenderer;
use super::services::SonosService;
use crate::state::State;

/// Applies player events to the state engine.
pub struct EventBridge {
    controller: Arc<PlaybackController>,
}

impl EventBridge {
    pub fn new(controller: Arc<PlaybackController>) -> Self {
        Self { controller }
    }

    /// Decodes `notification` and applies what it reports.
    ///
    /// When the reported track is outside the known queue or differs from
    /// the queued entry at that index, the queue is fetched again. A failed
    /// refetch keeps the cached queue; the other fields are still applied.
    pub async fn handle(&self, notification: &Notification, renderer: &dyn MediaRenderer) {
        let update = match notification.service {
            SonosService::AVTransport => {
                let event = parse_av_transport(&notification.body);
                if event.is_empty() {
                    log::debug!("[GENA] AVTransport event carried no known fields");
                    return;
                }
                self.av_transport_update(event, renderer).await
            }
            SonosService::RenderingControl => {
                let event = parse_rendering_control(&notification.body);
                if event.is_empty() {
                    log::debug!("[GENA] RenderingControl event carried no known fields");
                    return;
                }
                let mut update = State::now();
                update.volume = event.volume;
                update.mute = event.mute;
                update
            }
            SonosService::ContentDirectory => {
                log::debug!("[GENA] Ignoring ContentDirectory event");
                return;
            }
        };

        self.controller.engine().apply_update(update);
    }

    async fn av_transport_update(
        &self,
        event: AvTransportEvent,
        renderer: &dyn MediaRenderer,
    ) -> State {
        let mut update = State::now();
        update.state = event.transport_state;
        update.play_mode = event.play_mode;

        let Some(track) = event.current_track else {
            return update;
        };
        let index = track - 1;
        update.index = Some(index);

        if self.queue_is_stale(index, event.current_track_uri.as_deref()) {
            log::debug!("[GENA] Track {} not in known queue, refetching", track);
            match self.controller.fetch_queue(renderer).await {
                Ok(tracks) => update.tracks = Some(tracks),
                Err(e) => log::warn!("[GENA] Queue refetch failed, keeping cached queue: {}", e),
            }
        }
        update
    }

    fn queue_is_stale(&self, index: i32, uri: Option<&str>) -> bool {
        let Ok(position) = usize::try_from(index) else {
            return false;
        };
        let snapshot = self.controller.engine().snapshot();
        let tracks = snapshot.tracks.as_deref().unwrap_or_default();
        match tracks.get(position) {
            None => true,
            Some(known) => match uri {
                Some(uri) => self.controller.files().localize_uri(uri) != known.uri,
                None => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::context::UrlBuilder;
    use crate::file_server::FileServer;
    use crate::media::Track;
    use crate::sonos::test_fixtures::{av_transport_body, rendering_control_body, MockRenderer};
    use crate::state::{PlayMode, StateEngine, TransportState};

    fn bridge() -> (EventBridge, Arc<PlaybackController>, mpsc::Receiver<State>) {
        let (tx, rx) = mpsc::channel(16);
        let files = Arc::new(FileServer::new(UrlBuilder::new("10.0.0.9", 12000)));
        let controller = Arc::new(PlaybackController::new(Arc::new(StateEngine::new(tx)), files));
        (EventBridge::new(Arc::clone(&controller)), controller, rx)
    }

    fn notification(service: SonosService, body: String) -> Notification {
        Notification {
            service,
            sid: "uuid:RINCON_1-7".into(),
            seq: Some(1),
            body,
        }
    }

    fn known_queue(controller: &PlaybackController, uris: &[&str]) {
        let mut update = State::now();
        update.tracks = Some(uris.iter().map(|u| Track::new(*u)).collect());
        controller.engine().apply_update(update);
    }

    #[tokio::test]
    async fn rendering_control_updates_volume_and_mute() {
        let (bridge, controller, mut rx) = bridge();
        let renderer = MockRenderer::new();
        let body = rendering_control_body(
            r#"<Volume channel="Master" val="42"/><Mute channel="Master" val="1"/>"#,
        );

        bridge
            .handle(&notification(SonosService::RenderingControl, body), &renderer)
            .await;

        let diff = rx.recv().await.unwrap();
        assert_eq!(diff.volume, Some(42));
        assert_eq!(diff.mute, Some(true));
        assert_eq!(controller.engine().snapshot().volume, Some(42));
        assert!(renderer.calls().is_empty());
    }

    #[tokio::test]
    async fn matching_track_does_not_refetch() {
        let (bridge, controller, _rx) = bridge();
        known_queue(&controller, &["http://h/a.mp3", "http://h/b.mp3"]);
        let renderer = MockRenderer::new();
        let body = av_transport_body(
            r#"<TransportState val="PLAYING"/><CurrentPlayMode val="REPEAT_ALL"/><CurrentTrack val="2"/><CurrentTrackURI val="http://h/b.mp3"/>"#,
        );

        bridge
            .handle(&notification(SonosService::AVTransport, body), &renderer)
            .await;

        let snap = controller.engine().snapshot();
        assert_eq!(snap.state, Some(TransportState::Playing));
        assert_eq!(snap.play_mode, Some(PlayMode::REPEAT));
        assert_eq!(snap.index, Some(1));
        assert!(renderer.calls().is_empty());
    }

    #[tokio::test]
    async fn different_uri_refetches_the_queue() {
        let (bridge, controller, _rx) = bridge();
        known_queue(&controller, &["http://h/a.mp3"]);
        let renderer = MockRenderer::with_queue(vec![Track::new("http://h/z.mp3")]);
        let body = av_transport_body(
            r#"<CurrentTrack val="1"/><CurrentTrackURI val="http://h/z.mp3"/>"#,
        );

        bridge
            .handle(&notification(SonosService::AVTransport, body), &renderer)
            .await;

        assert_eq!(renderer.calls(), vec!["Browse"]);
        let tracks = controller.engine().snapshot().tracks.unwrap();
        assert_eq!(tracks[0].uri, "http://h/z.mp3");
    }

    #[tokio::test]
    async fn index_past_known_queue_refetches() {
        let (bridge, _controller, _rx) = bridge();
        let renderer = MockRenderer::with_queue(vec![Track::new("http://h/a.mp3")]);
        let body = av_transport_body(r#"<CurrentTrack val="1"/>"#);

        bridge
            .handle(&notification(SonosService::AVTransport, body), &renderer)
            .await;
        assert_eq!(renderer.calls(), vec!["Browse"]);
    }

    #[tokio::test]
    async fn failed_refetch_still_applies_transport_fields() {
        let (bridge, controller, _rx) = bridge();
        known_queue(&controller, &["http://h/a.mp3"]);
        let renderer = MockRenderer::new();
        renderer.fail_on("Browse");
        let body = av_transport_body(
            r#"<TransportState val="PLAYING"/><CurrentPlayMode val="SHUFFLE"/><CurrentTrack val="3"/>"#,
        );

        bridge
            .handle(&notification(SonosService::AVTransport, body), &renderer)
            .await;

        assert_eq!(renderer.calls(), vec!["Browse"]);
        let snap = controller.engine().snapshot();
        assert_eq!(snap.state, Some(TransportState::Playing));
        assert_eq!(snap.play_mode, Some(PlayMode::SHUFFLE_REPEAT));
        assert_eq!(snap.index, Some(2));
        assert_eq!(snap.tracks.map(|t| t.len()), Some(1));
    }

    #[tokio::test]
    async fn empty_queue_index_does_not_refetch() {
        let (bridge, controller, _rx) = bridge();
        let renderer = MockRenderer::new();
        let body = av_transport_body(r#"<CurrentTrack val="0"/>"#);

        bridge
            .handle(&notification(SonosService::AVTransport, body), &renderer)
            .await;
        assert!(renderer.calls().is_empty());
        assert_eq!(controller.engine().snapshot().index, Some(-1));
    }

    #[tokio::test]
    async fn events_without_known_fields_publish_nothing() {
        let (bridge, _controller, mut rx) = bridge();
        let renderer = MockRenderer::new();
        let body = av_transport_body(r#"<TransportState val="TRANSITIONING"/>"#);

        bridge
            .handle(&notification(SonosService::AVTransport, body), &renderer)
            .await;
        assert!(rx.try_recv().is_err());
    }
}
