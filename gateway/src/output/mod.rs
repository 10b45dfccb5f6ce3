//! Output system for the sidekick gateway
//!
//! Outputs forward KubeArmor events to destinations (Spyderbat, stdout, ...).
//! All registered outputs receive every event in a fan-out pattern.

pub mod http;
pub mod spyderbat;
pub mod stdout;

use crate::event::KubearmorEvent;
use async_trait::async_trait;

pub use http::HttpClient;
pub use spyderbat::SpyderbatOutput;
pub use stdout::StdoutOutput;

/// Output trait - forwards one event to a destination
///
/// Delivery is fire-and-forget: an output records its own success or failure
/// (statistics, metrics, logs) and never reports it back to the caller, so a
/// broken destination cannot stall the event source.
///
/// # Example
///
/// ```ignore
/// struct MyDestinationOutput {
///     http: HttpClient,
/// }
///
/// #[async_trait]
/// impl Output for MyDestinationOutput {
///     fn name(&self) -> &'static str { "my-destination" }
///
///     async fn post(&self, event: &KubearmorEvent) {
///         if let Err(e) = self.http.post(event, HeaderMap::new()).await {
///             tracing::error!(error = %e, "delivery failed");
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Output: Send + Sync {
    /// Output name for identification, statistics and logging
    fn name(&self) -> &'static str;

    /// Deliver a single event
    async fn post(&self, event: &KubearmorEvent);
}
