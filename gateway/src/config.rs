//! Configuration for the sidekick gateway
//!
//! Everything is read from environment variables once at startup. The
//! resulting [`Config`] is immutable and shared read-only by every output.

use crate::error::{GatewayError, Result};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration for the gateway
#[derive(Debug, Clone)]
pub struct Config {
    /// Ingest/metrics HTTP server address
    pub listen_addr: SocketAddr,

    /// Log level (EnvFilter directive)
    pub log_level: String,

    /// Log format (json or pretty)
    pub log_format: TextFormat,

    /// Capacity of the count-metrics queue
    pub metrics_queue_capacity: usize,

    /// Print every event to stdout
    pub stdout: bool,

    /// Rendering of the stdout output (json lines or pretty blocks)
    pub stdout_format: TextFormat,

    /// Spyderbat output settings
    pub spyderbat: SpyderbatConfig,
}

/// Rendering of log lines and stdout events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Json,
    Pretty,
}

/// Spyderbat destination settings
#[derive(Debug, Clone)]
pub struct SpyderbatConfig {
    /// Base API URL
    pub api_url: String,

    /// Organization UID
    pub org_uid: String,

    /// API key sent as a bearer token
    pub api_key: String,

    /// Display name of the ingestion source
    pub source: String,

    /// Description of the ingestion source
    pub source_description: String,

    /// Verify TLS certificates
    pub check_cert: bool,

    /// Bounds on source provisioning at startup
    pub startup: StartupPolicy,
}

impl SpyderbatConfig {
    /// The output is enabled once both org UID and API key are set
    pub fn is_enabled(&self) -> bool {
        !self.org_uid.is_empty() && !self.api_key.is_empty()
    }
}

impl Default for SpyderbatConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.spyderbat.com".to_string(),
            org_uid: String::new(),
            api_key: String::new(),
            source: "KubeArmor".to_string(),
            source_description: "KubeArmor alerts".to_string(),
            check_cert: true,
            startup: StartupPolicy::default(),
        }
    }
}

/// Deadline and retry policy for construction-time vendor calls
#[derive(Debug, Clone)]
pub struct StartupPolicy {
    /// Overall deadline for probing and provisioning
    pub deadline: Duration,

    /// Timeout of a single HTTP request
    pub request_timeout: Duration,

    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_backoff: Duration,

    /// Upper bound on the delay between attempts
    pub max_backoff: Duration,
}

impl StartupPolicy {
    /// Delay to wait after the given failed attempt (1-based)
    ///
    /// Doubles per attempt, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for StartupPolicy {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 2801)),
            log_level: "info".to_string(),
            log_format: TextFormat::Pretty,
            metrics_queue_capacity: 1024,
            stdout: false,
            stdout_format: TextFormat::Json,
            spyderbat: SpyderbatConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(addr) = lookup("SIDEKICK_LISTEN_ADDR") {
            config.listen_addr = parse_var("SIDEKICK_LISTEN_ADDR", &addr)?;
        }

        if let Some(level) = lookup("SIDEKICK_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(format) = lookup("SIDEKICK_LOG_FORMAT") {
            config.log_format = parse_format("SIDEKICK_LOG_FORMAT", &format)?;
        }

        if let Some(cap) = lookup("SIDEKICK_METRICS_QUEUE_CAPACITY") {
            config.metrics_queue_capacity = parse_var("SIDEKICK_METRICS_QUEUE_CAPACITY", &cap)?;
            if config.metrics_queue_capacity == 0 {
                return Err(GatewayError::Config(
                    "invalid SIDEKICK_METRICS_QUEUE_CAPACITY: must be greater than 0".to_string(),
                ));
            }
        }

        if let Some(stdout) = lookup("SIDEKICK_STDOUT") {
            config.stdout = parse_var("SIDEKICK_STDOUT", &stdout)?;
        }

        if let Some(format) = lookup("SIDEKICK_STDOUT_FORMAT") {
            config.stdout_format = parse_format("SIDEKICK_STDOUT_FORMAT", &format)?;
        }

        let sb = &mut config.spyderbat;
        if let Some(url) = lookup("SPYDERBAT_APIURL") {
            sb.api_url = url;
        }
        if let Some(org) = lookup("SPYDERBAT_ORGUID") {
            sb.org_uid = org;
        }
        if let Some(key) = lookup("SPYDERBAT_APIKEY") {
            sb.api_key = key;
        }
        if let Some(source) = lookup("SPYDERBAT_SOURCE") {
            sb.source = source;
        }
        if let Some(description) = lookup("SPYDERBAT_SOURCEDESCRIPTION") {
            sb.source_description = description;
        }
        if let Some(check) = lookup("SPYDERBAT_CHECKCERT") {
            sb.check_cert = parse_var("SPYDERBAT_CHECKCERT", &check)?;
        }
        if let Some(secs) = lookup("SPYDERBAT_STARTUP_TIMEOUT_SECS") {
            sb.startup.deadline =
                Duration::from_secs(parse_var("SPYDERBAT_STARTUP_TIMEOUT_SECS", &secs)?);
        }
        if let Some(attempts) = lookup("SPYDERBAT_STARTUP_MAX_ATTEMPTS") {
            sb.startup.max_attempts = parse_var("SPYDERBAT_STARTUP_MAX_ATTEMPTS", &attempts)?;
            if sb.startup.max_attempts == 0 {
                return Err(GatewayError::Config(
                    "invalid SPYDERBAT_STARTUP_MAX_ATTEMPTS: must be at least 1".to_string(),
                ));
            }
        }
        if let Some(ms) = lookup("SPYDERBAT_STARTUP_BACKOFF_MS") {
            sb.startup.initial_backoff =
                Duration::from_millis(parse_var("SPYDERBAT_STARTUP_BACKOFF_MS", &ms)?);
        }

        Ok(config)
    }
}

fn parse_format(name: &str, value: &str) -> Result<TextFormat> {
    match value.to_lowercase().as_str() {
        "json" => Ok(TextFormat::Json),
        "pretty" => Ok(TextFormat::Pretty),
        other => Err(GatewayError::Config(format!(
            "invalid {name}: {other} (expected 'json' or 'pretty')"
        ))),
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| GatewayError::Config(format!("invalid {name}: {e}")))
}
