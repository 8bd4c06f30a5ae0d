//! Playback operations.
//!
//! Each operation talks to the player first and, only when that succeeds,
//! pushes the expected outcome into the [`StateEngine`] so consumers see
//! the change before the player's own event arrives.

use std::sync::Arc;

use thiserror::Error;

use super::renderer::MediaRenderer;
use super::soap::{SoapError, SoapResult};
use crate::file_server::FileServer;
use crate::media::track::{format_hms_millis, parse_hms};
use crate::media::{didl, Track};
use crate::state::{PlayMode, State, StateEngine, TransportState};

/// Errors from playback operations.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Soap(#[from] SoapError),

    #[error("Unknown play mode {0}")]
    UnknownPlayMode(u8),

    #[error("Invalid queue position {0}")]
    InvalidQueuePosition(i64),

    #[error("Not connected to a Sonos player")]
    NotConnected,
}

/// Convenient Result alias for playback operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Parses `CurrentSpeed`: a number or a fraction `n/d` (`d == 0` gives 0).
fn parse_speed(text: &str) -> SoapResult<f64> {
    let invalid = || SoapError::Parse(format!("CurrentSpeed: {text:?}"));
    match text.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().map_err(|_| invalid())?;
            let den: f64 = den.trim().parse().map_err(|_| invalid())?;
            Ok(if den == 0.0 { 0.0 } else { num / den })
        }
        None => text.trim().parse().map_err(|_| invalid()),
    }
}

fn hms_to_millis(text: &str) -> Option<i64> {
    parse_hms(text).map(|secs| (secs * 1000.0).round() as i64)
}

/// Runs playback operations against a renderer and records their effect.
pub struct PlaybackController {
    engine: Arc<StateEngine>,
    files: Arc<FileServer>,
}

impl PlaybackController {
    pub fn new(engine: Arc<StateEngine>, files: Arc<FileServer>) -> Self {
        Self { engine, files }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<StateEngine> {
        &self.engine
    }

    #[must_use]
    pub fn files(&self) -> &Arc<FileServer> {
        &self.files
    }

    fn apply(&self, fill: impl FnOnce(&mut State)) {
        let mut update = State::now();
        fill(&mut update);
        self.engine.apply_update(update);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn play(&self, renderer: &dyn MediaRenderer) -> ControlResult<()> {
        renderer.play().await?;
        self.apply(|s| s.state = Some(TransportState::Playing));
        Ok(())
    }

    pub async fn pause(&self, renderer: &dyn MediaRenderer) -> ControlResult<()> {
        renderer.pause().await?;
        self.apply(|s| s.state = Some(TransportState::Paused));
        Ok(())
    }

    pub async fn stop(&self, renderer: &dyn MediaRenderer) -> ControlResult<()> {
        renderer.stop().await?;
        self.apply(|s| s.state = Some(TransportState::Stopped));
        Ok(())
    }

    /// Sets the volume, clamped to 0..=100.
    pub async fn set_volume(&self, renderer: &dyn MediaRenderer, volume: i64) -> ControlResult<()> {
        let volume = volume.clamp(0, 100) as u8;
        renderer.set_volume(volume).await?;
        self.apply(|s| s.volume = Some(volume));
        Ok(())
    }

    pub async fn set_mute(&self, renderer: &dyn MediaRenderer, mute: bool) -> ControlResult<()> {
        renderer.set_mute(mute).await?;
        self.apply(|s| s.mute = Some(mute));
        Ok(())
    }

    pub async fn mute(&self, renderer: &dyn MediaRenderer) -> ControlResult<()> {
        self.set_mute(renderer, true).await
    }

    pub async fn unmute(&self, renderer: &dyn MediaRenderer) -> ControlResult<()> {
        self.set_mute(renderer, false).await
    }

    /// Sets the play mode from its bitmask (bit 0 shuffle, bit 1 repeat).
    pub async fn set_play_mode(&self, renderer: &dyn MediaRenderer, mask: u8) -> ControlResult<()> {
        let mode = PlayMode(mask);
        let upnp = mode.to_upnp().ok_or(ControlError::UnknownPlayMode(mask))?;
        renderer.set_play_mode(upnp).await?;
        self.apply(|s| s.play_mode = Some(mode));
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Position
    // ─────────────────────────────────────────────────────────────────────────

    /// Jumps to the 0-based queue position `index`.
    pub async fn set_queue_pos(
        &self,
        renderer: &dyn MediaRenderer,
        index: i64,
    ) -> ControlResult<()> {
        let Ok(index32) = i32::try_from(index) else {
            return Err(ControlError::InvalidQueuePosition(index));
        };
        if index32 < 0 {
            return Err(ControlError::InvalidQueuePosition(index));
        }
        renderer.seek("TRACK_NR", &(index + 1).to_string()).await?;
        self.apply(|s| s.index = Some(index32));
        Ok(())
    }

    /// Moves `delta` tracks from the current index (−1 when unknown).
    pub async fn skip(&self, renderer: &dyn MediaRenderer, delta: i64) -> ControlResult<()> {
        let current = self.engine.snapshot().index.map_or(-1, i64::from);
        self.set_queue_pos(renderer, current + delta).await
    }

    pub async fn skip_forward(&self, renderer: &dyn MediaRenderer) -> ControlResult<()> {
        self.skip(renderer, 1).await
    }

    pub async fn skip_backward(&self, renderer: &dyn MediaRenderer) -> ControlResult<()> {
        self.skip(renderer, -1).await
    }

    /// Seeks within the current track. Negative targets seek to 0.
    pub async fn seek_to(&self, renderer: &dyn MediaRenderer, ms: i64) -> ControlResult<()> {
        let ms = ms.max(0);
        renderer.seek("REL_TIME", &format_hms_millis(ms)).await?;
        self.apply(|s| s.time = Some(ms));
        Ok(())
    }

    /// Seeks relative to the position reported by the player.
    pub async fn seek_by(&self, renderer: &dyn MediaRenderer, delta_ms: i64) -> ControlResult<()> {
        let position = self.fetch_position(renderer).await?;
        let target = position.time.unwrap_or(0).saturating_add(delta_ms);
        self.seek_to(renderer, target).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queue
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn clear_queue(&self, renderer: &dyn MediaRenderer) -> ControlResult<()> {
        self.stop(renderer).await?;
        renderer.remove_all_tracks().await?;
        self.apply(|s| {
            s.tracks = Some(Vec::new());
            s.index = Some(0);
        });
        Ok(())
    }

    async fn enqueue(
        &self,
        renderer: &dyn MediaRenderer,
        tracks: &[Track],
        position: Option<i64>,
    ) -> ControlResult<()> {
        if tracks.is_empty() {
            return Ok(());
        }
        for (i, track) in self.files.serve_tracks(tracks).iter().enumerate() {
            let desired = match position {
                Some(pos) => u32::try_from(pos + i as i64 + 1)
                    .map_err(|_| ControlError::InvalidQueuePosition(pos))?,
                None => 0,
            };
            renderer
                .add_uri_to_queue(&track.uri, &didl::marshal(track), desired)
                .await?;
        }
        // The player already holds the new entries; a failed read-back only
        // leaves the cached queue stale until the next event or check.
        match self.fetch_queue(renderer).await {
            Ok(queue) => self.apply(|s| s.tracks = Some(queue)),
            Err(e) => log::warn!("[Control] Queue refresh after enqueue failed: {}", e),
        }
        Ok(())
    }

    /// Appends to the end of the queue.
    pub async fn append_to_queue(
        &self,
        renderer: &dyn MediaRenderer,
        tracks: &[Track],
    ) -> ControlResult<()> {
        self.enqueue(renderer, tracks, None).await
    }

    /// Inserts before the 0-based position `pos`.
    pub async fn insert_into_queue(
        &self,
        renderer: &dyn MediaRenderer,
        tracks: &[Track],
        pos: i64,
    ) -> ControlResult<()> {
        if pos < 0 {
            return Err(ControlError::InvalidQueuePosition(pos));
        }
        self.enqueue(renderer, tracks, Some(pos)).await
    }

    /// Clears the queue and starts playing `tracks` from the first one.
    ///
    /// The first track is queued and started before the rest are added.
    pub async fn replace_queue(
        &self,
        renderer: &dyn MediaRenderer,
        tracks: &[Track],
    ) -> ControlResult<()> {
        self.clear_queue(renderer).await?;
        let Some((first, rest)) = tracks.split_first() else {
            return Ok(());
        };
        self.append_to_queue(renderer, std::slice::from_ref(first)).await?;
        self.set_queue_pos(renderer, 0).await?;
        self.play(renderer).await?;
        self.append_to_queue(renderer, rest).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reading state
    // ─────────────────────────────────────────────────────────────────────────

    /// The player's queue with file-server URLs mapped back to local files.
    pub async fn fetch_queue(&self, renderer: &dyn MediaRenderer) -> ControlResult<Vec<Track>> {
        let tracks = renderer.browse_queue().await?;
        Ok(self.files.localize_tracks(tracks))
    }

    /// Index, duration and elapsed time. Unparseable times stay unset.
    pub async fn fetch_position(&self, renderer: &dyn MediaRenderer) -> ControlResult<State> {
        let position = renderer.get_position_info().await?;
        let mut state = State::now();
        state.index = i32::try_from(position.track - 1).ok();
        state.duration = hms_to_millis(&position.track_duration);
        state.time = hms_to_millis(&position.rel_time);
        Ok(state)
    }

    /// Everything the player reports, as one update.
    pub async fn fetch_state(&self, renderer: &dyn MediaRenderer) -> ControlResult<State> {
        let transport = renderer.get_transport_info().await?;
        let tracks = self.fetch_queue(renderer).await?;
        let mut state = self.fetch_position(renderer).await?;

        state.state = TransportState::from_upnp(&transport.state);
        state.speed = Some(parse_speed(&transport.speed)?);
        state.tracks = Some(tracks);
        state.volume = Some(renderer.get_volume().await?);
        state.mute = Some(renderer.get_mute().await?);
        state.play_mode = PlayMode::from_upnp(&renderer.get_play_mode().await?);
        Ok(state)
    }

    /// Fetches the full state, applies it and returns the new snapshot.
    pub async fn check(&self, renderer: &dyn MediaRenderer) -> ControlResult<State> {
        let state = self.fetch_state(renderer).await?;
        self.engine.apply_update(state);
        Ok(self.engine.snapshot())
    }
}
