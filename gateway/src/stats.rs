//! Per-output delivery statistics
//!
//! Increment-only `Total` / `OK` / `Error` counters, one set per output,
//! exposed as JSON on `/debug/vars`.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub const TOTAL: &str = "total";
pub const OK: &str = "ok";
pub const ERROR: &str = "error";

/// Counters for a single output
#[derive(Debug, Default)]
pub struct OutputStats {
    total: AtomicU64,
    ok: AtomicU64,
    error: AtomicU64,
}

/// Point-in-time copy of an output's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub ok: u64,
    pub error: u64,
}

impl OutputStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_total(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ok(&self) {
        self.ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_error(&self) {
        self.error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn ok(&self) -> u64 {
        self.ok.load(Ordering::Relaxed)
    }

    pub fn error(&self) -> u64 {
        self.error.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total(),
            ok: self.ok(),
            error: self.error(),
        }
    }
}

/// Statistics for every output, keyed by output name
#[derive(Default)]
pub struct Statistics {
    outputs: RwLock<BTreeMap<&'static str, Arc<OutputStats>>>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the counters of an output
    pub fn for_output(&self, name: &'static str) -> Arc<OutputStats> {
        if let Some(stats) = self.outputs.read().get(name) {
            return Arc::clone(stats);
        }
        Arc::clone(self.outputs.write().entry(name).or_default())
    }

    /// Snapshot of all outputs
    pub fn snapshot(&self) -> BTreeMap<&'static str, StatsSnapshot> {
        self.outputs
            .read()
            .iter()
            .map(|(name, stats)| (*name, stats.snapshot()))
            .collect()
    }
}
