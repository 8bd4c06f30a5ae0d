//! The track record shared by every codec and by the controller.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// A single playable item.
///
/// Only `uri` is required; the descriptive fields are omitted from JSON
/// when unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    /// Duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(rename = "cover", default, skip_serializing_if = "Option::is_none")]
    pub album_art_uri: Option<String>,
}

impl Track {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Stable identifier: hex SHA-1 of the URI.
    #[must_use]
    pub fn id(&self) -> String {
        hex::encode(Sha1::digest(self.uri.as_bytes()))
    }

    /// Duration when it is known and positive.
    #[must_use]
    pub fn duration_secs(&self) -> Option<f64> {
        self.time.filter(|t| *t > 0.0)
    }

    /// Duration as `h:mm:ss.fff`, or `0:00` when unknown.
    #[must_use]
    pub fn time_string(&self) -> String {
        match self.duration_secs() {
            Some(secs) => format_hms_millis((secs * 1000.0).round() as i64),
            None => "0:00".to_string(),
        }
    }
}

/// Formats milliseconds as `h:mm:ss.fff`.
#[must_use]
pub fn format_hms_millis(ms: i64) -> String {
    let ms = ms.max(0);
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) as f64 / 1000.0;
    format!("{hours}:{minutes:02}:{seconds:06.3}")
}

/// Parses `h:mm:ss[.fff]`, `m:ss` or plain seconds into seconds.
///
/// Returns `None` for anything that does not parse, including the
/// `NOT_IMPLEMENTED` placeholder some renderers report.
#[must_use]
pub fn parse_hms(text: &str) -> Option<f64> {
    let parts: Vec<&str> = text.trim().split(':').collect();
    if parts.len() > 3 {
        return None;
    }
    let (last, rest) = parts.split_last()?;
    let seconds: f64 = last.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let mut total = seconds;
    let mut unit = 60.0;
    for part in rest.iter().rev() {
        let n: u32 = part.trim().parse().ok()?;
        total += f64::from(n) * unit;
        unit *= 60.0;
    }
    Some(total)
}
