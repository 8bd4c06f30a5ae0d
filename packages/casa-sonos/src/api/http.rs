//! HTTP route handlers.
//!
//! Handlers are thin: they parse the body, call the hub and answer with a
//! fresh state snapshot.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use bytes::Bytes;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::api::response::{api_accepted, api_success};
use crate::error::{CasaError, CasaResult};
use crate::media::{Playlist, Track};
use crate::sonos::SonosHub;
use crate::state::State as PlayerState;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(hub: Arc<SonosHub>) -> Router {
    Router::new()
        .route("/sonos", get(get_state))
        .route("/sonos/health", get(health_check))
        .route("/sonos/volume", put(put_volume))
        .route("/sonos/playlist", get(get_playlist).put(put_playlist))
        .route("/sonos/playback", put(put_playback))
        .route("/sonos/track", post(post_track))
        .route("/sonos/reconnect", post(post_reconnect))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_integer(body: &str, what: &str) -> CasaResult<i64> {
    body.trim()
        .parse()
        .map_err(|_| CasaError::InvalidRequest(format!("{what} must be an integer, got {body:?}")))
}

/// Re-reads the player and returns the snapshot.
async fn refreshed(hub: &SonosHub) -> CasaResult<Json<PlayerState>> {
    Ok(Json(hub.check().await?))
}

/// First media type named by `name`, lowercased and without parameters.
fn media_type(headers: &HeaderMap, name: HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split([',', ';']).next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

fn parse_playlist(content_type: &str, body: &[u8]) -> CasaResult<Playlist> {
    match content_type {
        "application/json" => serde_json::from_slice(body)
            .map_err(|e| CasaError::InvalidRequest(format!("invalid playlist JSON: {e}"))),
        "audio/x-mpegurl" | "audio/mpegurl" => {
            Ok(Playlist::from_m3u(&String::from_utf8_lossy(body)))
        }
        "application/x-plist" | "application/xml" | "text/xml" => {
            Ok(Playlist::from_plist(&String::from_utf8_lossy(body))?)
        }
        other => Err(CasaError::InvalidRequest(format!(
            "unsupported playlist content type {other:?}"
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn get_state(State(hub): State<Arc<SonosHub>>) -> impl IntoResponse {
    api_success(hub.state())
}

async fn health_check(State(hub): State<Arc<SonosHub>>) -> impl IntoResponse {
    api_success(json!({
        "connected": hub.is_connected(),
        "droppedUpdates": hub.dropped_updates(),
    }))
}

/// PUT /sonos/volume
///
/// Body is a plain integer in 0..=100.
async fn put_volume(
    State(hub): State<Arc<SonosHub>>,
    body: String,
) -> CasaResult<Json<PlayerState>> {
    let volume = parse_integer(&body, "volume")?;
    if !(0..=100).contains(&volume) {
        return Err(CasaError::InvalidRequest(format!(
            "volume must be between 0 and 100, got {volume}"
        )));
    }
    log::info!("[API] Set volume to {}", volume);
    hub.set_volume(volume).await?;
    refreshed(&hub).await
}

/// GET /sonos/playlist
///
/// Exports the queue as JSON, M3U or a property list, chosen by `Accept`.
async fn get_playlist(
    State(hub): State<Arc<SonosHub>>,
    headers: HeaderMap,
) -> CasaResult<Response> {
    let playlist = Playlist {
        name: hub.device().map(|d| d.friendly_name).unwrap_or_default(),
        items: hub.state().tracks.unwrap_or_default(),
    };
    let response = match media_type(&headers, header::ACCEPT).as_str() {
        "audio/x-mpegurl" | "audio/mpegurl" => {
            ([(header::CONTENT_TYPE, "audio/x-mpegurl")], playlist.to_m3u()).into_response()
        }
        "application/x-plist" | "application/xml" | "text/xml" => {
            ([(header::CONTENT_TYPE, "application/x-plist")], playlist.to_plist()?).into_response()
        }
        _ => Json(playlist).into_response(),
    };
    Ok(response)
}

/// PUT /sonos/playlist
///
/// Replaces the queue with a JSON, M3U or property-list playlist.
async fn put_playlist(
    State(hub): State<Arc<SonosHub>>,
    headers: HeaderMap,
    body: Bytes,
) -> CasaResult<Json<PlayerState>> {
    let playlist = parse_playlist(&media_type(&headers, header::CONTENT_TYPE), &body)?;
    log::info!(
        "[API] Replacing queue with playlist {:?} ({} tracks)",
        playlist.name,
        playlist.items.len()
    );
    hub.replace_queue(&playlist.items).await?;
    refreshed(&hub).await
}

/// PUT /sonos/playback
///
/// Negative pauses, 0 resumes, `n` plays the n-th queue entry (1-based).
async fn put_playback(
    State(hub): State<Arc<SonosHub>>,
    body: String,
) -> CasaResult<Json<PlayerState>> {
    let n = parse_integer(&body, "playback")?;
    match n {
        n if n < 0 => hub.pause().await?,
        0 => hub.play().await?,
        n => {
            hub.set_queue_pos(n - 1).await?;
            hub.play().await?;
        }
    }
    refreshed(&hub).await
}

/// POST /sonos/track
///
/// Plays a single track, replacing the queue.
async fn post_track(
    State(hub): State<Arc<SonosHub>>,
    Json(track): Json<Track>,
) -> CasaResult<Json<PlayerState>> {
    if track.uri.trim().is_empty() {
        return Err(CasaError::InvalidRequest("track uri must not be empty".into()));
    }
    log::info!("[API] Playing {}", track.uri);
    hub.replace_queue(std::slice::from_ref(&track)).await?;
    refreshed(&hub).await
}

async fn post_reconnect(State(hub): State<Arc<SonosHub>>) -> impl IntoResponse {
    hub.request_reconnect();
    api_accepted()
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::sonos::hub::tests::harness;

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn put(path: &str, content_type: &str, body: &str) -> Request<Body> {
        Request::put(path)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn state_and_health() {
        let h = harness().await;

        let (status, json) = send(
            create_router(h.hub.clone()),
            Request::get("/sonos").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["volume"], 30);
        assert_eq!(json["state"], "STOPPED");

        let (status, json) = send(
            create_router(h.hub.clone()),
            Request::get("/sonos/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({ "connected": true, "droppedUpdates": 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn volume_is_validated_then_applied() {
        let h = harness().await;
        h.renderer.clear_calls();

        let (status, json) = send(
            create_router(h.hub.clone()),
            put("/sonos/volume", "text/plain", "101"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "invalid_request");

        let (status, _) = send(
            create_router(h.hub.clone()),
            put("/sonos/volume", "text/plain", "loud"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(h.renderer.calls().is_empty());

        let (status, json) = send(
            create_router(h.hub.clone()),
            put("/sonos/volume", "text/plain", " 42\n"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["volume"], 42);
        assert_eq!(h.renderer.calls()[0], "SetVolume 42");
    }

    #[tokio::test(start_paused = true)]
    async fn playback_numbers_select_pause_play_or_track() {
        let h = harness().await;

        h.renderer.clear_calls();
        let (status, json) = send(
            create_router(h.hub.clone()),
            put("/sonos/playback", "text/plain", "3"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&h.renderer.calls()[..2], ["Seek TRACK_NR 3", "Play"]);
        assert_eq!(json["state"], "PLAYING");

        h.renderer.clear_calls();
        let (_, json) = send(
            create_router(h.hub.clone()),
            put("/sonos/playback", "text/plain", "-1"),
        )
        .await;
        assert_eq!(h.renderer.calls()[0], "Pause");
        assert_eq!(json["state"], "PAUSED");
    }

    #[tokio::test(start_paused = true)]
    async fn m3u_playlist_replaces_the_queue() {
        let h = harness().await;
        let m3u = "#EXTM3U\n#EXTINF:200,Song - Artist\nhttp://h/a.mp3\nhttp://h/b.mp3\n";

        let (status, json) = send(
            create_router(h.hub.clone()),
            put("/sonos/playlist", "audio/x-mpegurl; charset=utf-8", m3u),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let tracks = json["tracks"].as_array().unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0]["uri"], "http://h/a.mp3");
        assert_eq!(tracks[0]["title"], "Song");
        assert_eq!(json["index"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_exports_follow_the_accept_header() {
        let h = harness().await;
        let m3u = "#EXTM3U\n#EXTINF:200,Song - Artist\nhttp://h/a.mp3\n";
        send(create_router(h.hub.clone()), put("/sonos/playlist", "audio/x-mpegurl", m3u)).await;

        let request = Request::get("/sonos/playlist")
            .header(header::ACCEPT, "audio/x-mpegurl, */*;q=0.8")
            .body(Body::empty())
            .unwrap();
        let response = create_router(h.hub.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/x-mpegurl");
        let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("#EXTM3U\n"));
        assert!(text.contains("http://h/a.mp3"));

        let request = Request::get("/sonos/playlist")
            .header(header::ACCEPT, "application/x-plist")
            .body(Body::empty())
            .unwrap();
        let response = create_router(h.hub.clone()).oneshot(request).await.unwrap();
        let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        let playlist = Playlist::from_plist(&String::from_utf8_lossy(&body)).unwrap();
        assert_eq!(playlist.name, "Kitchen");
        assert_eq!(playlist.items[0].uri, "http://h/a.mp3");

        let (status, json) = send(
            create_router(h.hub.clone()),
            Request::get("/sonos/playlist").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["items"][0]["title"], "Song");
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_playlist_type_is_rejected() {
        let h = harness().await;
        let (status, json) = send(
            create_router(h.hub.clone()),
            put("/sonos/playlist", "text/csv", "a,b"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["message"].as_str().unwrap().contains("text/csv"));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_plist_is_a_playlist_error() {
        let h = harness().await;
        let (status, json) = send(
            create_router(h.hub.clone()),
            put("/sonos/playlist", "application/xml", "<nothing/>"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().starts_with("plist_"));
    }

    #[tokio::test(start_paused = true)]
    async fn track_needs_a_uri() {
        let h = harness().await;
        let request = Request::post("/sonos/track")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"uri": ""}"#))
            .unwrap();
        let (status, _) = send(create_router(h.hub.clone()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::post("/sonos/track")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"uri": "http://h/one.mp3", "title": "One"}"#))
            .unwrap();
        let (status, json) = send(create_router(h.hub.clone()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["tracks"][0]["title"], "One");
        assert_eq!(json["state"], "PLAYING");
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_is_accepted_and_runs() {
        let h = harness().await;
        let (status, json) = send(
            create_router(h.hub.clone()),
            Request::post("/sonos/reconnect").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["accepted"], true);

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(h.connector.connects(), 2);
    }
}
