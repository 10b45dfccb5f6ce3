//! Sidekick gateway - KubeArmor alert forwarding with pluggable outputs
//!
//! Receives KubeArmor events over HTTP and forwards each one to every
//! enabled output. The Spyderbat output provisions its ingestion source on
//! startup and posts events in Spyderbat's `kubearmor_alert` schema.
//!
//! # Architecture
//!
//! ```text
//! POST / ──► OutputRegistry ──► Output (Spyderbat, stdout, ...)
//!                                  │
//!                                  └──► Statistics / Prometheus / MetricsQueue
//! ```
//!
//! Outputs are pluggable via the [`Output`] trait.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod output;
pub mod registry;
pub mod server;
pub mod stats;

pub use config::Config;
pub use error::{GatewayError, Result, SinkError};
pub use event::KubearmorEvent;
pub use metrics::{MetricsQueue, MetricsWorker};
pub use output::{HttpClient, Output, SpyderbatOutput, StdoutOutput};
pub use registry::OutputRegistry;
pub use stats::{OutputStats, Statistics};
