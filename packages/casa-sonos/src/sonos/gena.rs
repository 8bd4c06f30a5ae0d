//! GENA (UPnP eventing): subscriptions and the NOTIFY callback server.
//!
//! The player pushes `NOTIFY` requests to `/gena/{service}` on the eventing
//! listener. Each accepted request becomes a [`Notification`] on an mpsc
//! channel consumed by the session supervisor.

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::any;
use axum::Router;
use parking_lot::Mutex;
use reqwest::{Client, Method};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::device::DeviceInfo;
use super::services::SonosService;
use crate::context::UrlBuilder;
use crate::error::{CasaError, CasaResult};
use crate::protocol_constants::{
    GENA_RENEWAL_BUFFER_SECS, GENA_SUBSCRIPTION_TIMEOUT_SECS, MAX_GENA_BODY_SIZE,
};

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from GENA subscription requests.
#[derive(Debug, Error)]
pub enum GenaError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The player refused the subscription.
    #[error("Subscription failed with status {0}")]
    SubscriptionFailed(u16),

    /// The player refused to renew.
    #[error("Renewal failed with status {0}")]
    RenewalFailed(u16),

    /// The SUBSCRIBE response had no SID header.
    #[error("Missing SID in subscription response")]
    MissingSid,

    /// The request could not be built.
    #[error("Invalid GENA request: {0}")]
    Request(String),
}

/// Convenient Result alias for GENA operations.
pub type GenaResult<T> = Result<T, GenaError>;

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Response from a successful GENA subscription.
pub struct SubscribeResponse {
    pub sid: String,
    pub timeout_secs: u64,
}

/// HTTP side of SUBSCRIBE / renew / UNSUBSCRIBE.
#[derive(Clone)]
pub struct GenaClient {
    client: Client,
}

impl GenaClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn method(name: &str) -> GenaResult<Method> {
        Method::from_bytes(name.as_bytes()).map_err(|e| GenaError::Request(e.to_string()))
    }

    /// Parses `TIMEOUT: Second-N`, falling back to the requested timeout.
    fn extract_timeout_secs(headers: &reqwest::header::HeaderMap) -> u64 {
        headers
            .get("TIMEOUT")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Second-"))
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(GENA_SUBSCRIPTION_TIMEOUT_SECS)
    }

    /// Creates a subscription on `event_url` delivering to `callback_url`.
    pub async fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
    ) -> GenaResult<SubscribeResponse> {
        let response = self
            .client
            .request(Self::method("SUBSCRIBE")?, event_url)
            .header("CALLBACK", format!("<{}>", callback_url))
            .header("NT", "upnp:event")
            .header("TIMEOUT", format!("Second-{}", GENA_SUBSCRIPTION_TIMEOUT_SECS))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenaError::SubscriptionFailed(response.status().as_u16()));
        }

        let sid = response
            .headers()
            .get("SID")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or(GenaError::MissingSid)?;

        Ok(SubscribeResponse {
            sid,
            timeout_secs: Self::extract_timeout_secs(response.headers()),
        })
    }

    /// Renews `sid`, returning the granted timeout.
    pub async fn renew(&self, event_url: &str, sid: &str) -> GenaResult<u64> {
        let response = self
            .client
            .request(Self::method("SUBSCRIBE")?, event_url)
            .header("SID", sid)
            .header("TIMEOUT", format!("Second-{}", GENA_SUBSCRIPTION_TIMEOUT_SECS))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenaError::RenewalFailed(response.status().as_u16()));
        }
        Ok(Self::extract_timeout_secs(response.headers()))
    }

    /// Cancels `sid`. Returns false when the player did not confirm.
    pub async fn unsubscribe(&self, event_url: &str, sid: &str) -> bool {
        let Ok(method) = Self::method("UNSUBSCRIBE") else {
            return false;
        };
        match self.client.request(method, event_url).header("SID", sid).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscriptions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Subscription {
    service: SonosService,
    sid: String,
    event_url: String,
    expires_at: Instant,
}

/// The subscriptions held by one session.
pub struct GenaSubscriptions {
    client: GenaClient,
    active: Mutex<Vec<Subscription>>,
}

impl GenaSubscriptions {
    pub fn new(client: GenaClient) -> Self {
        Self {
            client,
            active: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes to every evented service of `device`.
    ///
    /// Subscriptions made before a failure are cancelled again.
    pub async fn subscribe_all(
        &self,
        device: &DeviceInfo,
        callbacks: &UrlBuilder,
    ) -> GenaResult<()> {
        for service in SonosService::EVENTED {
            let event_url = device.event_url(service);
            let callback_url = callbacks.gena_callback_url(service.name());
            match self.client.subscribe(&event_url, &callback_url).await {
                Ok(response) => {
                    log::info!(
                        "[GENA] Subscribed to {} (SID {}, {}s)",
                        service.name(),
                        response.sid,
                        response.timeout_secs
                    );
                    self.active.lock().push(Subscription {
                        service,
                        sid: response.sid,
                        event_url,
                        expires_at: Instant::now() + Duration::from_secs(response.timeout_secs),
                    });
                }
                Err(e) => {
                    log::warn!("[GENA] Subscribe to {} failed: {}", service.name(), e);
                    self.unsubscribe_all().await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Whether `sid` belongs to this session.
    #[must_use]
    pub fn owns(&self, sid: &str) -> bool {
        self.active.lock().iter().any(|s| s.sid == sid)
    }

    /// Renews subscriptions expiring within the renewal buffer.
    pub async fn renew_due(&self) -> GenaResult<()> {
        let buffer = Duration::from_secs(GENA_RENEWAL_BUFFER_SECS);
        let due: Vec<Subscription> = self
            .active
            .lock()
            .iter()
            .filter(|s| s.expires_at.saturating_duration_since(Instant::now()) <= buffer)
            .cloned()
            .collect();

        for sub in due {
            let timeout_secs = self.client.renew(&sub.event_url, &sub.sid).await?;
            log::debug!("[GENA] Renewed {} for {}s", sub.service.name(), timeout_secs);
            if let Some(entry) = self.active.lock().iter_mut().find(|s| s.sid == sub.sid) {
                entry.expires_at = Instant::now() + Duration::from_secs(timeout_secs);
            }
        }
        Ok(())
    }

    /// Cancels every subscription, best effort.
    pub async fn unsubscribe_all(&self) {
        let subs = std::mem::take(&mut *self.active.lock());
        for sub in subs {
            if !self.client.unsubscribe(&sub.event_url, &sub.sid).await {
                log::debug!("[GENA] Unsubscribe {} not confirmed", sub.sid);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Callback server
// ─────────────────────────────────────────────────────────────────────────────

/// One NOTIFY delivered by the player.
#[derive(Debug, Clone)]
pub struct Notification {
    pub service: SonosService,
    pub sid: String,
    pub seq: Option<u32>,
    pub body: String,
}

/// Validates the GENA headers and returns SID and SEQ.
fn validate_gena_headers(headers: &HeaderMap) -> CasaResult<(String, Option<u32>)> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if header("NT") != Some("upnp:event") {
        log::warn!("[GENA] NOTIFY missing or invalid NT header: {:?}", header("NT"));
        return Err(CasaError::InvalidRequest("Missing or invalid NT header".into()));
    }
    if header("NTS") != Some("upnp:propchange") {
        log::warn!("[GENA] NOTIFY missing or invalid NTS header: {:?}", header("NTS"));
        return Err(CasaError::InvalidRequest("Missing or invalid NTS header".into()));
    }
    let sid = match header("SID") {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => {
            log::warn!("[GENA] NOTIFY missing SID header");
            return Err(CasaError::InvalidRequest("Missing SID header".into()));
        }
    };
    let seq = header("SEQ").and_then(|v| v.trim().parse().ok());
    Ok((sid, seq))
}

async fn handle_notify(
    State(tx): State<mpsc::Sender<Notification>>,
    Path(service): Path<String>,
    req: Request<Body>,
) -> CasaResult<StatusCode> {
    let (parts, body) = req.into_parts();

    if parts.method.as_str() != "NOTIFY" {
        return Err(CasaError::InvalidRequest(format!(
            "Expected NOTIFY method, got {}",
            parts.method
        )));
    }
    let service = SonosService::from_name(&service)
        .ok_or_else(|| CasaError::NotFound(format!("unknown service {service}")))?;
    let (sid, seq) = validate_gena_headers(&parts.headers)?;

    let body = axum::body::to_bytes(body, MAX_GENA_BODY_SIZE)
        .await
        .map_err(|e| {
            log::warn!("[GENA] Failed to read NOTIFY body: {}", e);
            CasaError::InvalidRequest("Failed to read body".into())
        })?;

    log::debug!(
        "[GENA] NOTIFY {} from {} (SEQ: {:?}, {} bytes)",
        service.name(),
        sid,
        seq,
        body.len()
    );

    let notification = Notification {
        service,
        sid,
        seq,
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    match tx.try_send(notification) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(n)) => {
            log::warn!("[GENA] Notification queue full, dropping {} event", n.service.name());
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            log::debug!("[GENA] Notification receiver closed");
        }
    }
    Ok(StatusCode::OK)
}

/// Router answering `NOTIFY /gena/{service}`.
pub fn callback_router(tx: mpsc::Sender<Notification>) -> Router {
    Router::new()
        .route("/gena/{service}", any(handle_notify))
        .with_state(tx)
}

/// Serves GENA callbacks on `listener` until `cancel` fires.
pub async fn serve_callbacks(
    listener: TcpListener,
    tx: mpsc::Sender<Notification>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("[GENA] Callback server listening on {}", addr);
    }
    axum::serve(listener, callback_router(tx))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}

#[cfg(test)]
mod tests {
    use axum::http::Method as HttpMethod;
    use tower::ServiceExt;

    use super::*;

    fn notify(path: &str, sid: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(HttpMethod::from_bytes(b"NOTIFY").unwrap())
            .uri(path)
            .header("NT", "upnp:event")
            .header("NTS", "upnp:propchange")
            .header("SEQ", "4");
        if let Some(sid) = sid {
            builder = builder.header("SID", sid);
        }
        builder.body(Body::from("<e:propertyset/>")).unwrap()
    }

    #[tokio::test]
    async fn notify_is_forwarded_to_the_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let response = callback_router(tx)
            .oneshot(notify("/gena/AVTransport", Some("uuid:RINCON_1-42")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let n = rx.recv().await.unwrap();
        assert_eq!(n.service, SonosService::AVTransport);
        assert_eq!(n.sid, "uuid:RINCON_1-42");
        assert_eq!(n.seq, Some(4));
        assert_eq!(n.body, "<e:propertyset/>");
    }

    #[tokio::test]
    async fn missing_sid_is_rejected() {
        let (tx, mut rx) = mpsc::channel(4);
        let response = callback_router(tx)
            .oneshot(notify("/gena/RenderingControl", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_service_is_not_found() {
        let (tx, _rx) = mpsc::channel(4);
        let response = callback_router(tx)
            .oneshot(notify("/gena/AlarmClock", Some("uuid:x")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn other_methods_are_rejected() {
        let (tx, _rx) = mpsc::channel(4);
        let request = Request::builder()
            .method(HttpMethod::POST)
            .uri("/gena/AVTransport")
            .body(Body::empty())
            .unwrap();
        let response = callback_router(tx).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn timeout_header_is_parsed() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("TIMEOUT", "Second-1800".parse().unwrap());
        assert_eq!(GenaClient::extract_timeout_secs(&headers), 1800);

        headers.insert("TIMEOUT", "infinite".parse().unwrap());
        assert_eq!(
            GenaClient::extract_timeout_secs(&headers),
            GENA_SUBSCRIPTION_TIMEOUT_SECS
        );
    }
}
