//! Authoritative player state and its change feed.
//!
//! Every producer (event bridge, controller, reconnect) hands a partial
//! [`State`] to [`StateEngine::apply_update`]. The engine merges it into the
//! snapshot and publishes only the fields that actually changed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::media::Track;

// ─────────────────────────────────────────────────────────────────────────────
// Value types
// ─────────────────────────────────────────────────────────────────────────────

/// Transport state as reported by AVTransport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportState {
    Playing,
    Paused,
    Stopped,
}

impl TransportState {
    /// Parses the UPnP `TransportState` value.
    ///
    /// `TRANSITIONING` and vendor states map to `None`.
    #[must_use]
    pub fn from_upnp(value: &str) -> Option<Self> {
        match value {
            "PLAYING" => Some(Self::Playing),
            "PAUSED_PLAYBACK" | "PAUSED" => Some(Self::Paused),
            "STOPPED" => Some(Self::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Playing => "PLAYING",
            Self::Paused => "PAUSED",
            Self::Stopped => "STOPPED",
        })
    }
}

/// Play mode bitmask: bit 0 shuffle, bit 1 repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayMode(pub u8);

impl PlayMode {
    pub const NORMAL: Self = Self(0);
    pub const SHUFFLE: Self = Self(1);
    pub const REPEAT: Self = Self(2);
    pub const SHUFFLE_REPEAT: Self = Self(3);

    /// Maps a UPnP `CurrentPlayMode` onto the bitmask.
    ///
    /// Repeat-one modes have no bitmask equivalent and map to `None`.
    #[must_use]
    pub fn from_upnp(value: &str) -> Option<Self> {
        match value {
            "NORMAL" => Some(Self::NORMAL),
            "SHUFFLE_NOREPEAT" => Some(Self::SHUFFLE),
            "REPEAT_ALL" => Some(Self::REPEAT),
            "SHUFFLE" => Some(Self::SHUFFLE_REPEAT),
            _ => None,
        }
    }

    /// The UPnP name for this mask, or `None` for bits outside 0..=3.
    #[must_use]
    pub fn to_upnp(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("NORMAL"),
            1 => Some("SHUFFLE_NOREPEAT"),
            2 => Some("REPEAT_ALL"),
            3 => Some("SHUFFLE"),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Player state. Every field but `last_update` is optional; an unset field
/// means "unknown" in a snapshot and "unchanged" in an update or diff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TransportState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
    #[serde(rename = "mode", default, skip_serializing_if = "Option::is_none")]
    pub play_mode: Option<PlayMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracks: Option<Vec<Track>>,
    /// 0-based queue position; -1 when the device reports no current track.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i32>,
    /// Current track duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    /// Elapsed time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    /// Last connection error. An empty string in an update or diff means
    /// the error was cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "now")]
    pub last_update: DateTime<Utc>,
}

/// Present in `update` and either absent from `current` or different.
fn changed<T: PartialEq + Clone>(current: &Option<T>, update: &Option<T>) -> Option<T> {
    match (current, update) {
        (Some(c), Some(u)) if c == u => None,
        (_, u) => u.clone(),
    }
}

fn overwrite<T: Clone>(target: &mut Option<T>, update: &Option<T>) {
    if update.is_some() {
        target.clone_from(update);
    }
}

/// Like [`changed`], but an empty update clears: it is a change only when
/// an error is currently recorded.
fn changed_error(current: &Option<String>, update: &Option<String>) -> Option<String> {
    match update.as_deref() {
        Some("") => current.as_ref().map(|_| String::new()),
        _ => changed(current, update),
    }
}

impl State {
    /// An empty update stamped with the current time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            last_update: Utc::now(),
            ..Self::default()
        }
    }

    /// The fields of `update` that would change `self`.
    ///
    /// Track lists are compared by length and URI only.
    #[must_use]
    pub fn diff(&self, update: &State) -> State {
        let tracks = match (&self.tracks, &update.tracks) {
            (_, None) => None,
            (Some(current), Some(new))
                if current.len() == new.len()
                    && current.iter().zip(new).all(|(a, b)| a.uri == b.uri) =>
            {
                None
            }
            (_, Some(new)) => Some(new.clone()),
        };

        State {
            state: changed(&self.state, &update.state),
            speed: changed(&self.speed, &update.speed),
            volume: changed(&self.volume, &update.volume),
            mute: changed(&self.mute, &update.mute),
            play_mode: changed(&self.play_mode, &update.play_mode),
            tracks,
            index: changed(&self.index, &update.index),
            duration: changed(&self.duration, &update.duration),
            time: changed(&self.time, &update.time),
            error: changed_error(&self.error, &update.error),
            last_update: update.last_update,
        }
    }

    /// A copy of `self` with every present field of `update` written over it.
    #[must_use]
    pub fn apply_update(&self, update: &State) -> State {
        let mut out = self.clone();
        overwrite(&mut out.state, &update.state);
        overwrite(&mut out.speed, &update.speed);
        overwrite(&mut out.volume, &update.volume);
        overwrite(&mut out.mute, &update.mute);
        overwrite(&mut out.play_mode, &update.play_mode);
        overwrite(&mut out.tracks, &update.tracks);
        overwrite(&mut out.index, &update.index);
        overwrite(&mut out.duration, &update.duration);
        overwrite(&mut out.time, &update.time);
        match update.error.as_deref() {
            Some("") => out.error = None,
            _ => overwrite(&mut out.error, &update.error),
        }
        out.last_update = update.last_update;
        out
    }

    /// True when no optional field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics().is_empty()
    }

    /// Names of the categories this (diff) state touches.
    #[must_use]
    pub fn topics(&self) -> Vec<&'static str> {
        let mut topics = Vec::new();
        if let Some(state) = self.state {
            topics.push(match state {
                TransportState::Playing => "play",
                TransportState::Paused => "pause",
                TransportState::Stopped => "stop",
            });
        }
        if self.speed.is_some() {
            topics.push("speed");
        }
        if self.volume.is_some() {
            topics.push("volume");
        }
        if self.mute.is_some() {
            topics.push("mute");
        }
        if self.play_mode.is_some() {
            topics.push("mode");
        }
        if self.tracks.is_some() {
            topics.push("queue");
        }
        if self.index.is_some() {
            topics.push("track");
        }
        if self.duration.is_some() || self.time.is_some() {
            topics.push("position");
        }
        if self.error.is_some() {
            topics.push("error");
        }
        topics
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StateEngine
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the authoritative [`State`] and publishes diffs.
///
/// Publication never blocks: when the consumer falls behind, diffs are
/// dropped and counted.
pub struct StateEngine {
    current: Mutex<State>,
    updates: mpsc::Sender<State>,
    dropped: AtomicU64,
}

impl StateEngine {
    pub fn new(updates: mpsc::Sender<State>) -> Self {
        Self {
            current: Mutex::new(State::now()),
            updates,
            dropped: AtomicU64::new(0),
        }
    }

    /// Merges `update` into the snapshot and publishes the resulting diff.
    ///
    /// Returns the diff, published or not.
    pub fn apply_update(&self, update: State) -> State {
        let diff = {
            let mut current = self.current.lock();
            let diff = current.diff(&update);
            *current = current.apply_update(&update);
            diff
        };

        if diff.is_empty() {
            return diff;
        }

        tracing::debug!(topics = ?diff.topics(), "state diff");
        match self.updates.try_send(diff.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!(
                    "[State] Update channel full, dropped diff ({} dropped so far)",
                    dropped
                );
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("[State] Update channel closed, diff not delivered");
            }
        }
        diff
    }

    /// Value copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> State {
        self.current.lock().clone()
    }

    /// Forgets the last recorded error; consumers receive `error: ""`.
    pub fn clear_error(&self) -> State {
        let mut update = State::now();
        update.error = Some(String::new());
        self.apply_update(update)
    }

    /// Number of diffs dropped because the channel was full.
    #[must_use]
    pub fn dropped_updates(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(capacity: usize) -> (StateEngine, mpsc::Receiver<State>) {
        let (tx, rx) = mpsc::channel(capacity);
        (StateEngine::new(tx), rx)
    }

    #[test]
    fn volume_and_transport_updates_publish_minimal_diffs() {
        let (engine, mut rx) = engine(10);

        let mut first = State::now();
        first.volume = Some(30);
        let diff = engine.apply_update(first);
        assert_eq!(diff.volume, Some(30));

        let mut second = State::now();
        second.volume = Some(30);
        second.state = Some(TransportState::Playing);
        let diff = engine.apply_update(second.clone());
        assert_eq!(diff.volume, None);
        assert_eq!(diff.state, Some(TransportState::Playing));
        assert_eq!(diff.last_update, second.last_update);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.volume, Some(30));
        assert_eq!(snapshot.state, Some(TransportState::Playing));

        assert_eq!(rx.try_recv().unwrap().volume, Some(30));
        let published = rx.try_recv().unwrap();
        assert_eq!(published.topics(), vec!["play"]);
    }

    #[test]
    fn track_diff_compares_uris_only() {
        let (engine, mut rx) = engine(10);
        let mut update = State::now();
        update.tracks = Some(vec![Track::new("http://a/1.mp3"), Track::new("http://a/2.mp3")]);
        engine.apply_update(update);
        rx.try_recv().unwrap();

        let mut retitled = Track::new("http://a/1.mp3");
        retitled.title = Some("Renamed".into());
        let mut same_uris = State::now();
        same_uris.tracks = Some(vec![retitled, Track::new("http://a/2.mp3")]);
        let diff = engine.apply_update(same_uris);
        assert_eq!(diff.tracks, None);
        assert!(rx.try_recv().is_err());

        // The snapshot still takes the new list.
        assert_eq!(
            engine.snapshot().tracks.unwrap()[0].title.as_deref(),
            Some("Renamed")
        );

        let mut shorter = State::now();
        shorter.tracks = Some(vec![Track::new("http://a/1.mp3")]);
        let diff = engine.apply_update(shorter);
        assert_eq!(diff.tracks.map(|t| t.len()), Some(1));
    }

    #[test]
    fn independent_updates_commute() {
        let base = State::now();
        let mut a = State::now();
        a.volume = Some(10);
        a.mute = Some(true);
        let mut b = State::now();
        b.index = Some(4);
        b.play_mode = Some(PlayMode::SHUFFLE);
        b.last_update = a.last_update;

        let ab = base.apply_update(&a).apply_update(&b);
        let ba = base.apply_update(&b).apply_update(&a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn overlapping_updates_resolve_to_the_last_writer() {
        let base = State::now();
        let mut a = State::now();
        a.volume = Some(10);
        a.state = Some(TransportState::Paused);
        let mut b = State::now();
        b.volume = Some(25);
        b.index = Some(1);

        let ab = base.apply_update(&a).apply_update(&b);
        assert_eq!(ab.volume, Some(25));
        assert_eq!(ab.state, Some(TransportState::Paused));
        assert_eq!(ab.index, Some(1));

        let ba = base.apply_update(&b).apply_update(&a);
        assert_eq!(ba.volume, Some(10));
        assert_eq!(ba.index, Some(1));
    }

    #[test]
    fn repeated_update_publishes_once() {
        let (engine, mut rx) = engine(4);
        let update = || {
            let mut u = State::now();
            u.state = Some(TransportState::Playing);
            u.index = Some(0);
            u
        };

        let first = engine.apply_update(update());
        assert_eq!(first.state, Some(TransportState::Playing));
        assert_eq!(first.index, Some(0));

        let second = engine.apply_update(update());
        assert!(second.is_empty());

        assert_eq!(rx.try_recv().unwrap().index, Some(0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn clearing_an_error_is_published_once() {
        let (engine, mut rx) = engine(4);
        let mut failed = State::now();
        failed.error = Some("no Sonos device found".into());
        engine.apply_update(failed);
        assert!(rx.try_recv().unwrap().error.is_some());

        let diff = engine.clear_error();
        assert_eq!(diff.error.as_deref(), Some(""));
        assert_eq!(diff.topics(), vec!["error"]);
        assert_eq!(engine.snapshot().error, None);
        assert_eq!(rx.try_recv().unwrap().error.as_deref(), Some(""));

        assert!(engine.clear_error().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn diff_never_contains_fields_absent_from_update() {
        let mut current = State::now();
        current.volume = Some(10);
        current.time = Some(1000);
        let mut update = State::now();
        update.mute = Some(false);

        let diff = current.diff(&update);
        assert_eq!(diff.volume, None);
        assert_eq!(diff.time, None);
        assert_eq!(diff.mute, Some(false));
    }

    #[test]
    fn full_channel_drops_and_counts() {
        let (engine, mut rx) = engine(1);
        for v in [1u8, 2, 3] {
            let mut update = State::now();
            update.volume = Some(v);
            engine.apply_update(update);
        }
        assert_eq!(engine.dropped_updates(), 2);
        assert_eq!(engine.snapshot().volume, Some(3));
        assert_eq!(rx.try_recv().unwrap().volume, Some(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn empty_diffs_are_not_published() {
        let (engine, mut rx) = engine(4);
        engine.apply_update(State::now());
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.dropped_updates(), 0);
    }

    #[test]
    fn play_mode_maps_to_and_from_upnp() {
        assert_eq!(PlayMode::from_upnp("SHUFFLE"), Some(PlayMode(3)));
        assert_eq!(PlayMode::from_upnp("REPEAT_ONE"), None);
        assert_eq!(PlayMode(2).to_upnp(), Some("REPEAT_ALL"));
        assert_eq!(PlayMode(4).to_upnp(), None);
    }

    #[test]
    fn snapshot_serializes_with_wire_names() {
        let mut state = State::now();
        state.state = Some(TransportState::Paused);
        state.play_mode = Some(PlayMode::REPEAT);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "PAUSED");
        assert_eq!(json["mode"], 2);
        assert!(json.get("now").is_some());
        assert!(json.get("volume").is_none());
    }
}
