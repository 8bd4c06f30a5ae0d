//! Extended M3U playlists.

use super::track::Track;

/// Parses an extended M3U document.
///
/// Line endings may be LF, CRLF or bare CR (iTunes exports). Any line
/// starting with `http` ends the current record; tags before it describe
/// that track.
pub fn parse(text: &str) -> Vec<Track> {
    let lines: Vec<&str> = if text.contains('\n') {
        text.split('\n').collect()
    } else {
        text.split('\r').collect()
    };

    let mut tracks = Vec::new();
    let mut current = Track::default();

    for line in lines {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            apply_extinf(&mut current, rest);
        } else if let Some(album) = line.strip_prefix("#EXTALB:") {
            current.album = non_empty(album);
        } else if let Some(artist) = line.strip_prefix("#EXTART:") {
            current.artist = non_empty(artist);
        } else if let Some(genre) = line.strip_prefix("#EXTGENRE:") {
            current.genre = non_empty(genre);
        } else if let Some(image) = line.strip_prefix("#EXTIMG:") {
            current.album_art_uri = non_empty(image);
        } else if line.starts_with("http") {
            current.uri = line.trim().to_string();
            tracks.push(std::mem::take(&mut current));
        }
    }

    tracks
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// `#EXTINF:<secs>,<info>` where info is `<artist><album><title>`,
/// `Title - Artist` or a bare title.
fn apply_extinf(track: &mut Track, rest: &str) {
    let Some((secs, info)) = rest.split_once(',') else {
        return;
    };
    if let Ok(secs) = secs.trim().parse::<f64>() {
        track.time = Some(secs).filter(|s| *s > 0.0);
    }

    let info = info.trim();
    if let Some(inner) = info.strip_prefix('<').filter(|_| info.ends_with('>')) {
        let parts: Vec<&str> = inner
            .split('<')
            .map(|p| p.trim().trim_end_matches('>').trim())
            .collect();
        if let [artist, album, title] = parts[..] {
            track.artist = non_empty(artist);
            track.album = non_empty(album);
            track.title = non_empty(title);
        }
    } else if let Some((title, artist)) = info.split_once(" - ") {
        if track.title.is_none() && track.artist.is_none() {
            track.title = non_empty(title);
            track.artist = non_empty(artist);
        }
    } else {
        track.title = non_empty(info);
    }
}

/// Renders tracks as an extended M3U document.
pub fn write(tracks: &[Track]) -> String {
    let mut out = String::from("#EXTM3U\n");
    for track in tracks {
        let secs = track.time.unwrap_or(0.0).round() as i64;
        let mut title = track.title.clone().unwrap_or_default();
        if let Some(artist) = track.artist.as_deref().filter(|a| !a.is_empty()) {
            title.push_str(" - ");
            title.push_str(artist);
        }
        out.push_str(&format!("#EXTINF:{secs},{title}\n"));

        let tags = [
            ("ALB", &track.album),
            ("ART", &track.artist),
            ("GENRE", &track.genre),
            ("IMG", &track.album_art_uri),
        ];
        for (tag, value) in tags {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                out.push_str(&format!("#EXT{tag}:{value}\n"));
            }
        }
        out.push_str(&track.uri);
        out.push('\n');
    }
    out
}
