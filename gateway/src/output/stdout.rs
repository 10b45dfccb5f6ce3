//! Stdout output for debugging
//!
//! Prints every event to stdout, either as one JSON line or as a
//! human-readable block.

use crate::config::TextFormat;
use crate::event::KubearmorEvent;
use crate::output::Output;
use crate::stats::OutputStats;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;

/// Stdout output - prints events for debugging
pub struct StdoutOutput {
    /// Pretty print events
    pretty: bool,
    stats: Arc<OutputStats>,
}

impl StdoutOutput {
    /// Create a new StdoutOutput printing JSON lines
    pub fn new(stats: Arc<OutputStats>) -> Self {
        Self {
            pretty: false,
            stats,
        }
    }

    /// Create a new StdoutOutput with pretty printing
    pub fn pretty(stats: Arc<OutputStats>) -> Self {
        Self {
            pretty: true,
            stats,
        }
    }

    /// Create a new StdoutOutput rendering events in `format`
    pub fn with_format(format: TextFormat, stats: Arc<OutputStats>) -> Self {
        match format {
            TextFormat::Json => Self::new(stats),
            TextFormat::Pretty => Self::pretty(stats),
        }
    }

    fn render(&self, event: &KubearmorEvent) -> Result<String, serde_json::Error> {
        if !self.pretty {
            return serde_json::to_string(event);
        }

        let mut out = String::new();
        let _ = writeln!(out, "┌─ {} ─────────────────────────────────────────", event.event_type);
        let _ = writeln!(out, "│ Timestamp: {} ns", event.timestamp);
        if !event.cluster_name.is_empty() {
            let _ = writeln!(out, "│ Cluster:   {}", event.cluster_name);
        }
        if !event.hostname.is_empty() {
            let _ = writeln!(out, "│ Host:      {}", event.hostname);
        }
        let mut keys: Vec<_> = event.output_fields.keys().collect();
        keys.sort();
        for key in keys {
            let _ = writeln!(out, "│ {key}: {}", event.output_fields[key]);
        }
        let _ = write!(out, "└─────────────────────────────────────────────────────");
        Ok(out)
    }
}

#[async_trait]
impl Output for StdoutOutput {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn post(&self, event: &KubearmorEvent) {
        self.stats.inc_total();
        match self.render(event) {
            Ok(line) => {
                println!("{line}");
                self.stats.inc_ok();
            }
            Err(e) => {
                self.stats.inc_error();
                tracing::error!(output = "stdout", error = %e, "Failed to render event");
            }
        }
    }
}
