//! Shared HTTP client used by outputs
//!
//! Serializes a payload as one NDJSON line, gzips it when the request asks for
//! `Content-Encoding: gzip`, and POSTs it to a fixed endpoint. Headers are
//! passed per request, so the client holds no mutable state and can be shared
//! by any number of concurrent callers.

use crate::error::SinkError;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Url};
use serde::Serialize;
use std::io::Write;
use std::time::Duration;
use tracing::debug;

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default connection timeout in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const CONTENT_TYPE_NDJSON: &str = "application/ndjson";

/// TLS settings of an output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsPolicy {
    /// Present a client certificate. No output loads one, so building a
    /// client with this set fails.
    pub mutual_tls: bool,
    /// Verify the server certificate
    pub check_cert: bool,
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self {
            mutual_tls: false,
            check_cert: true,
        }
    }
}

/// HTTP client bound to one endpoint
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    endpoint: Url,
    content_type: &'static str,
}

impl HttpClient {
    /// Create a client posting to `endpoint`
    ///
    /// Uses default timeouts: 30s request timeout, 10s connection timeout
    ///
    /// # Errors
    /// Returns `SinkError::Transport` if the HTTP client cannot be created or
    /// the TLS policy asks for mutual TLS
    pub fn new(endpoint: Url, content_type: &'static str, tls: TlsPolicy) -> Result<Self, SinkError> {
        let client = build_client(tls, Duration::from_secs(DEFAULT_TIMEOUT_SECS))?;

        Ok(Self {
            client,
            endpoint,
            content_type,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POST `payload` with the given request-scoped headers
    ///
    /// Any 2xx status is a success. Other statuses become an error carrying
    /// the status and response body (see [`SinkError::from_status`]).
    pub async fn post<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        mut headers: HeaderMap,
    ) -> Result<(), SinkError> {
        let gzip = headers
            .get(CONTENT_ENCODING)
            .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"gzip"));

        let mut body = serde_json::to_vec(payload).map_err(|e| SinkError::Encode(e.to_string()))?;
        body.push(b'\n');
        if gzip {
            body = gzip_body(&body)?;
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));

        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(url = %self.endpoint, status = %status, "Payload delivered");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(SinkError::from_status(status, body))
        }
    }
}

/// Build a reqwest client honoring the TLS policy
pub(crate) fn build_client(tls: TlsPolicy, timeout: Duration) -> Result<Client, SinkError> {
    if tls.mutual_tls {
        return Err(SinkError::Transport(
            "mutual TLS requested but no client certificate is configured".to_string(),
        ));
    }

    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS).min(timeout))
        .danger_accept_invalid_certs(!tls.check_cert)
        .build()
        .map_err(|e| SinkError::Transport(format!("Failed to build HTTP client: {e}")))
}

fn gzip_body(body: &[u8]) -> Result<Vec<u8>, SinkError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2 + 64), Compression::default());
    encoder
        .write_all(body)
        .map_err(|e| SinkError::Encode(format!("gzip: {e}")))?;
    encoder
        .finish()
        .map_err(|e| SinkError::Encode(format!("gzip: {e}")))
}
