//! Spyderbat output
//!
//! POSTs KubeArmor events to a Spyderbat org as `kubearmor_alert` records.
//!
//! Construction makes sure the org's `kubearmor_<orgUID>` ingestion source
//! exists (probe, create, re-probe), bounded by the configured
//! [`StartupPolicy`]. After that every event is transformed and posted to
//! the source's `sb-agent` data channel.
//!
//! # Example
//!
//! ```ignore
//! let (queue, worker) = MetricsQueue::new(1024);
//! let output = SpyderbatOutput::new(&config.spyderbat, stats.for_output("spyderbat"), queue).await?;
//! registry.register_output(Arc::new(output));
//! ```

pub mod payload;
pub mod source;

pub use payload::SpyderbatPayload;
pub use source::source_uid;

use crate::config::{SpyderbatConfig, StartupPolicy};
use crate::error::SinkError;
use crate::event::KubearmorEvent;
use crate::metrics::{self, MetricsQueue};
use crate::output::Output;
use crate::output::http::{CONTENT_TYPE_NDJSON, HttpClient, TlsPolicy, build_client};
use crate::stats::{self, OutputStats};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, HeaderMap, HeaderValue};
use std::sync::Arc;
use tracing::{error, warn};

const NAME: &str = "spyderbat";

/// Spyderbat output
pub struct SpyderbatOutput {
    http: HttpClient,
    auth: HeaderValue,
    stats: Arc<OutputStats>,
    metrics: MetricsQueue,
}

impl SpyderbatOutput {
    /// Provision the org's source and build the output
    ///
    /// # Errors
    /// Returns `SinkError::ClientCreation` when the source neither exists nor
    /// can be created within the startup policy.
    pub async fn new(
        config: &SpyderbatConfig,
        stats: Arc<OutputStats>,
        metrics: MetricsQueue,
    ) -> Result<Self, SinkError> {
        let creation_error = |reason: String| SinkError::ClientCreation {
            output: NAME,
            reason,
        };

        bearer_header(&config.api_key).map_err(|e| creation_error(e.to_string()))?;

        let tls = TlsPolicy {
            mutual_tls: false,
            check_cert: config.check_cert,
        };
        let client =
            build_client(tls, config.startup.request_timeout).map_err(|e| creation_error(e.to_string()))?;

        provision(&client, config)
            .await
            .map_err(|e| creation_error(e.to_string()))?;

        let endpoint = source::data_url(config).map_err(|e| creation_error(e.to_string()))?;
        let http = HttpClient::new(endpoint, CONTENT_TYPE_NDJSON, tls)
            .map_err(|e| creation_error(e.to_string()))?;
        Self::with_endpoint(http, &config.api_key, stats, metrics)
            .map_err(|e| creation_error(e.to_string()))
    }

    /// Build the output around an existing HTTP client, skipping provisioning
    pub(crate) fn with_endpoint(
        http: HttpClient,
        api_key: &str,
        stats: Arc<OutputStats>,
        metrics: MetricsQueue,
    ) -> Result<Self, SinkError> {
        Ok(Self {
            http,
            auth: bearer_header(api_key)?,
            stats,
            metrics,
        })
    }

    /// Data channel URL events are posted to
    pub fn endpoint(&self) -> &reqwest::Url {
        self.http.endpoint()
    }

    /// Headers of a single event request
    fn request_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(3);
        headers.insert(AUTHORIZATION, self.auth.clone());
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers
    }

    async fn deliver(&self, event: &KubearmorEvent) -> Result<(), SinkError> {
        let payload = SpyderbatPayload::from_event(event)?;
        self.http.post(&payload, self.request_headers()).await
    }
}

fn bearer_header(api_key: &str) -> Result<HeaderValue, SinkError> {
    let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|e| SinkError::Validation(format!("invalid API key: {e}")))?;
    auth.set_sensitive(true);
    Ok(auth)
}

/// Run [`source::ensure_source`] under the startup deadline, retrying
/// transport failures with backoff
async fn provision(client: &reqwest::Client, config: &SpyderbatConfig) -> Result<(), SinkError> {
    let policy: &StartupPolicy = &config.startup;

    let attempts = async {
        let mut attempt = 1;
        loop {
            match source::ensure_source(client, config).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.backoff_for(attempt);
                    warn!(
                        output = NAME,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Source provisioning failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    };

    tokio::time::timeout(policy.deadline, attempts)
        .await
        .map_err(|_| {
            SinkError::Transport(format!(
                "source provisioning exceeded deadline of {:?}",
                policy.deadline
            ))
        })?
}

#[async_trait]
impl Output for SpyderbatOutput {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn post(&self, event: &KubearmorEvent) {
        self.stats.inc_total();

        if let Err(e) = self.deliver(event).await {
            self.metrics
                .count(metrics::OUTPUTS, 1, &["output:spyderbat", "status:error"]);
            self.stats.inc_error();
            metrics::try_record_output(NAME, stats::ERROR);
            error!(output = NAME, error = %e, "Failed to post event");
            return;
        }

        self.metrics
            .count(metrics::OUTPUTS, 1, &["output:spyderbat", "status:ok"]);
        self.stats.inc_ok();
        metrics::try_record_output(NAME, stats::OK);
    }
}
