//! Spyderbat ingestion source management
//!
//! Events can only be posted once the org has a source named
//! `kubearmor_<orgUID>`. The name is derived from configuration alone, so a
//! restarted gateway finds the source it created earlier without any
//! persisted state.

use crate::config::SpyderbatConfig;
use crate::error::SinkError;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Prefix of the deterministic source identifier
pub const SOURCE_PREFIX: &str = "kubearmor_";

/// Deterministic source identifier for an organization
pub fn source_uid(org_uid: &str) -> String {
    format!("{SOURCE_PREFIX}{org_uid}")
}

/// Body of the source creation request
#[derive(Debug, Serialize)]
struct SourceBody<'a> {
    name: &'a str,
    description: &'a str,
    uid: String,
}

/// Append path segments to a base URL, percent-encoding each one
///
/// An empty last segment keeps a trailing slash. The base URL's own path is
/// kept, so the API can sit behind a path prefix.
pub(crate) fn join_url(base: &str, segments: &[&str]) -> Result<Url, SinkError> {
    let invalid = |reason: String| SinkError::Transport(format!("invalid URL {base}: {reason}"));

    let mut url = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("not a base URL".to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// `{apiURL}/api/v1/org/{orgUID}/source/`
pub(crate) fn sources_url(config: &SpyderbatConfig) -> Result<Url, SinkError> {
    join_url(
        &config.api_url,
        &["api", "v1", "org", &config.org_uid, "source", ""],
    )
}

/// `{apiURL}/api/v1/org/{orgUID}/source/kubearmor_{orgUID}/data/sb-agent`
pub(crate) fn data_url(config: &SpyderbatConfig) -> Result<Url, SinkError> {
    let uid = source_uid(&config.org_uid);
    join_url(
        &config.api_url,
        &["api", "v1", "org", &config.org_uid, "source", &uid, "data", "sb-agent"],
    )
}

/// Check whether the org's KubeArmor source already exists
///
/// # Errors
/// - `SinkError::Transport` on network failure or a server-side status
/// - `SinkError::Rejected` on a client error status (bad key, unknown org)
/// - `SinkError::Decode` if the body is not a JSON list of objects
pub async fn source_exists(client: &Client, config: &SpyderbatConfig) -> Result<bool, SinkError> {
    let url = sources_url(config)?;
    let response = client
        .get(url)
        .bearer_auth(&config.api_key)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SinkError::from_status(status, body));
    }

    let body = response.bytes().await?;
    let sources: Vec<Map<String, Value>> =
        serde_json::from_slice(&body).map_err(|e| SinkError::Decode(e.to_string()))?;

    let uid = source_uid(&config.org_uid);
    let found = sources
        .iter()
        .any(|source| source.get("uid").and_then(Value::as_str) == Some(uid.as_str()));

    debug!(uid = %uid, sources = sources.len(), found = found, "Probed Spyderbat sources");
    Ok(found)
}

/// Create the org's KubeArmor source
///
/// # Errors
/// - `SinkError::Validation` with the vendor's message on HTTP 400
/// - `SinkError::Rejected` on any other client error status
/// - `SinkError::Transport` on network failure or any other non-200 status
pub async fn create_source(client: &Client, config: &SpyderbatConfig) -> Result<(), SinkError> {
    let url = sources_url(config)?;
    let body = SourceBody {
        name: &config.source,
        description: &config.source_description,
        uid: source_uid(&config.org_uid),
    };

    let response = client
        .post(url)
        .bearer_auth(&config.api_key)
        .json(&body)
        .send()
        .await?;

    match response.status() {
        StatusCode::OK => {
            info!(uid = %body.uid, name = %body.name, "Created Spyderbat source");
            Ok(())
        }
        StatusCode::BAD_REQUEST => {
            let reason = response.text().await.unwrap_or_default();
            Err(SinkError::Validation(reason))
        }
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(SinkError::from_status(status, body))
        }
    }
}

/// Make sure the source exists: probe, create if absent, re-probe on failure
///
/// A failed create is recovered when the re-probe finds the source, which
/// happens when another gateway created it concurrently.
pub async fn ensure_source(client: &Client, config: &SpyderbatConfig) -> Result<(), SinkError> {
    if source_exists(client, config).await? {
        return Ok(());
    }

    let Err(create_err) = create_source(client, config).await else {
        return Ok(());
    };

    match source_exists(client, config).await {
        Ok(true) => {
            warn!(error = %create_err, "Source creation failed but source now exists");
            Ok(())
        }
        Ok(false) | Err(_) => Err(create_err),
    }
}
