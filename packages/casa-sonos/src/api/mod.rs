//! HTTP API layer.
//!
//! Thin handlers over [`SonosHub`]; see [`http::create_router`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::sonos::SonosHub;

pub mod http;
pub mod response;

pub use http::create_router;

/// Serves the API on `addr` until `shutdown` resolves.
pub async fn start_server(
    hub: Arc<SonosHub>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("[API] HTTP server listening on {}", listener.local_addr()?);
    axum::serve(listener, create_router(hub))
        .with_graceful_shutdown(shutdown)
        .await
}
