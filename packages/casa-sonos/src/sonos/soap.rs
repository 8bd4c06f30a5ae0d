//! Low-level SOAP transport for UPnP control requests.
//!
//! Builds the envelope, posts it and turns faults into errors. The typed
//! Sonos actions live in `renderer.rs`.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use super::retry::with_retry;
use super::services::SonosService;
use super::utils::{build_sonos_url, escape_xml, extract_xml_text};
use crate::protocol_constants::SOAP_TIMEOUT_SECS;

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during SOAP operations with the player.
#[derive(Debug, Error)]
pub enum SoapError {
    /// HTTP request to the player failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status without a SOAP fault.
    #[error("HTTP error {0}: {1}")]
    HttpStatus(u16, String),

    /// The player returned a SOAP fault.
    #[error("SOAP fault: {0}")]
    Fault(String),

    /// A response field was missing or malformed.
    #[error("Failed to parse SOAP response: {0}")]
    Parse(String),
}

/// Convenient Result alias for SOAP operations.
pub type SoapResult<T> = Result<T, SoapError>;

impl SoapError {
    /// Returns true if this error is transient and the operation should be retried.
    ///
    /// Transient Sonos fault codes:
    /// - 701: Transition not available (device changing states)
    /// - 714: Illegal seek target (previous source still loading)
    /// - 716: Resource not found (device busy initializing)
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            SoapError::Fault(msg) => {
                msg.contains("701")
                    || msg.contains("714")
                    || msg.contains("716")
                    || msg.to_lowercase().contains("transition")
            }
            SoapError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SOAP Request/Response
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the single-line SOAP envelope for `action`.
///
/// Sonos rejects documents with whitespace before the root element.
fn build_envelope(service: &str, action: &str, args: &[(&str, String)]) -> String {
    let mut body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{} xmlns:u="{}">"#,
        action, service
    );
    for (k, v) in args {
        body.push_str(&format!("<{k}>{}</{k}>", escape_xml(v)));
    }
    body.push_str(&format!(r#"</u:{}></s:Body></s:Envelope>"#, action));
    body
}

/// Posts one SOAP action and returns the response body.
async fn send_soap_request(
    client: &Client,
    url: &str,
    service: &str,
    action: &str,
    body: String,
) -> SoapResult<String> {
    log::info!("[SOAP] {} -> {} (body: {} bytes)", action, url, body.len());
    log::debug!("[SOAP] Request body: {}", body);

    let start = std::time::Instant::now();
    let res = client
        .post(url)
        .header("Content-Type", "text/xml; charset=\"utf-8\"")
        .header("SOAPAction", format!("\"{}#{}\"", service, action))
        .body(body)
        .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
        .send()
        .await;

    log::debug!(
        "[SOAP] {} completed in {:?}: {:?}",
        action,
        start.elapsed(),
        res.as_ref().map(|r| r.status())
    );

    let res = res?;
    let status = res.status();
    let response_text = res.text().await?;

    // Faults usually arrive with a 500, so check them before the status.
    if let Some(fault) = extract_fault(&response_text) {
        return Err(SoapError::Fault(fault));
    }
    if !status.is_success() {
        return Err(SoapError::HttpStatus(status.as_u16(), response_text));
    }

    Ok(response_text)
}

/// Fault string plus the UPnP error code when present.
fn extract_fault(xml: &str) -> Option<String> {
    if !xml.contains(":Fault>") && !xml.contains("<Fault>") {
        return None;
    }
    let message =
        extract_xml_text(xml, "faultstring").unwrap_or_else(|| "Unknown SOAP fault".into());
    Some(match extract_xml_text(xml, "errorCode") {
        Some(code) => format!("{} ({})", message, code.trim()),
        None => message,
    })
}

/// Text of a required response element.
pub fn response_field(xml: &str, name: &str) -> SoapResult<String> {
    extract_xml_text(xml, name).ok_or_else(|| SoapError::Parse(format!("missing {name}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// SOAP Request Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for constructing and sending SOAP requests.
///
/// # Example
/// ```ignore
/// let response = SoapRequestBuilder::new(&client, "192.168.1.100:1400")
///     .service(SonosService::AVTransport)
///     .action("Play")
///     .instance_id()
///     .arg("Speed", "1")
///     .send()
///     .await?;
/// ```
pub struct SoapRequestBuilder<'a> {
    client: &'a Client,
    host: &'a str,
    service: Option<SonosService>,
    control_path: Option<&'a str>,
    action: Option<&'a str>,
    args: Vec<(&'a str, String)>,
    retry: bool,
}

impl<'a> SoapRequestBuilder<'a> {
    #[must_use]
    pub fn new(client: &'a Client, host: &'a str) -> Self {
        Self {
            client,
            host,
            service: None,
            control_path: None,
            action: None,
            args: Vec::new(),
            retry: false,
        }
    }

    /// Sets the service for this request.
    #[must_use]
    pub fn service(mut self, service: SonosService) -> Self {
        self.service = Some(service);
        self
    }

    /// Overrides the service's default control path.
    #[must_use]
    pub fn control_path(mut self, path: &'a str) -> Self {
        self.control_path = Some(path);
        self
    }

    /// Sets the SOAP action name.
    #[must_use]
    pub fn action(mut self, action: &'a str) -> Self {
        self.action = Some(action);
        self
    }

    /// Adds an argument. Arguments keep insertion order.
    #[must_use]
    pub fn arg(mut self, key: &'a str, value: impl Into<String>) -> Self {
        self.args.push((key, value.into()));
        self
    }

    /// Adds the standard InstanceID="0" argument.
    #[must_use]
    pub fn instance_id(self) -> Self {
        self.arg("InstanceID", "0")
    }

    /// Retries transient faults (see [`SoapError::is_transient`]).
    #[must_use]
    pub fn with_retry(mut self) -> Self {
        self.retry = true;
        self
    }

    /// Sends the request and returns the response body.
    pub async fn send(self) -> SoapResult<String> {
        let service = self
            .service
            .ok_or_else(|| SoapError::Fault("SoapRequestBuilder: service not set".into()))?;
        let action = self
            .action
            .ok_or_else(|| SoapError::Fault("SoapRequestBuilder: action not set".into()))?;

        let url = build_sonos_url(
            self.host,
            self.control_path.unwrap_or_else(|| service.control_path()),
        );
        let body = build_envelope(service.urn(), action, &self.args);

        if self.retry {
            with_retry(action, || {
                send_soap_request(self.client, &url, service.urn(), action, body.clone())
            })
            .await
        } else {
            send_soap_request(self.client, &url, service.urn(), action, body).await
        }
    }

    /// Returns the request parts without sending.
    #[cfg(test)]
    pub fn into_parts(self) -> Option<(SonosService, &'a str, Vec<(&'a str, String)>)> {
        let service = self.service?;
        let action = self.action?;
        Some((service, action, self.args))
    }
}
