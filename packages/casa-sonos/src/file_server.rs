//! Ephemeral HTTP server exposing local files to the player.
//!
//! Files are registered under an opaque id (`hex(sha256(path)[..16])` plus
//! the original extension) and served at `/<id>`. Registrations are never
//! evicted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use url::Url;

use crate::context::{find_available_port, NetworkContext, PortExhausted, PortRange, UrlBuilder};
use crate::media::Track;

/// Errors starting the file server.
#[derive(Debug, Error)]
pub enum FileServerError {
    #[error(transparent)]
    PortExhausted(#[from] PortExhausted),

    #[error("file server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenient Result alias for file-server operations.
pub type FileServerResult<T> = Result<T, FileServerError>;

/// Maps opaque ids to local paths and serves them over HTTP.
pub struct FileServer {
    urls: UrlBuilder,
    files: RwLock<HashMap<String, PathBuf>>,
}

impl FileServer {
    /// A registry whose URLs point at `urls`. Does not listen.
    pub fn new(urls: UrlBuilder) -> Self {
        Self {
            urls,
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Binds the first free port of `ports` and serves until `cancel` fires.
    pub async fn start(
        ctx: &NetworkContext,
        ports: PortRange,
        cancel: CancellationToken,
    ) -> FileServerResult<Arc<Self>> {
        let (port, listener) = find_available_port(ports).await?;
        let server = Arc::new(Self::new(ctx.url_builder(port)));

        log::info!("[FileServer] Serving files at {}", server.urls.base_url());
        let router = server.router();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
            {
                log::error!("[FileServer] Server error: {}", e);
            }
        });
        Ok(server)
    }

    /// The opaque id of `path`.
    #[must_use]
    pub fn file_id(path: &Path) -> String {
        let hash = Sha256::digest(path.to_string_lossy().as_bytes());
        let mut id = hex::encode(&hash[..16]);
        if let Some(ext) = path.extension() {
            id.push('.');
            id.push_str(&ext.to_string_lossy());
        }
        id
    }

    /// Registers `path` and returns its id.
    pub fn serve_file(&self, path: impl Into<PathBuf>) -> String {
        let path = path.into();
        let id = Self::file_id(&path);
        log::debug!("[FileServer] Registered {} as {}", path.display(), id);
        self.files.write().insert(id.clone(), path);
        id
    }

    #[must_use]
    pub fn file_name(&self, id: &str) -> Option<PathBuf> {
        self.files.read().get(id).cloned()
    }

    /// The URL the player should fetch `path` from.
    #[must_use]
    pub fn file_url(&self, path: &Path) -> String {
        self.urls.file_url(&Self::file_id(path))
    }

    /// The registered path behind a file-server URL.
    #[must_use]
    pub fn file_for_url(&self, uri: &str) -> Option<PathBuf> {
        let url = Url::parse(uri).ok()?;
        let id = url.path_segments()?.next_back()?;
        self.file_name(id)
    }

    /// Rewrites a file-server URL back to a `file://` URI. Other URIs pass
    /// through unchanged.
    #[must_use]
    pub fn localize_uri(&self, uri: &str) -> String {
        self.file_for_url(uri)
            .and_then(|path| Url::from_file_path(&path).ok())
            .map_or_else(|| uri.to_string(), String::from)
    }

    #[must_use]
    pub fn localize_tracks(&self, tracks: Vec<Track>) -> Vec<Track> {
        tracks
            .into_iter()
            .map(|mut track| {
                track.uri = self.localize_uri(&track.uri);
                track
            })
            .collect()
    }

    /// Registers local tracks (no scheme or `file:`) and points them at
    /// their HTTP URL. Remote tracks pass through unchanged.
    #[must_use]
    pub fn serve_tracks(&self, tracks: &[Track]) -> Vec<Track> {
        tracks
            .iter()
            .map(|track| {
                let local = match Url::parse(&track.uri) {
                    Ok(url) if url.scheme() == "file" => {
                        Some(url.to_file_path().unwrap_or_else(|()| PathBuf::from(url.path())))
                    }
                    Ok(_) => None,
                    Err(_) => Some(PathBuf::from(&track.uri)),
                };
                match local {
                    Some(path) => {
                        let mut served = track.clone();
                        served.uri = self.file_url(&path);
                        self.serve_file(path);
                        served
                    }
                    None => track.clone(),
                }
            })
            .collect()
    }

    /// Router answering `GET /<id>`.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/{id}", get(serve_registered))
            .with_state(Arc::clone(self))
    }
}

async fn serve_registered(
    State(server): State<Arc<FileServer>>,
    UrlPath(id): UrlPath<String>,
    req: Request<Body>,
) -> Response {
    let Some(path) = server.file_name(&id) else {
        log::debug!("[FileServer] Unknown id {}", id);
        return (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            "Not Found",
        )
            .into_response();
    };

    match ServeFile::new(&path).oneshot(req).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}
