//! Spyderbat `kubearmor_alert` wire format

use crate::error::SinkError;
use crate::event::KubearmorEvent;
use chrono::Utc;
use serde::Serialize;

/// Schema tag of every payload
pub const SCHEMA: &str = "kubearmor_alert::1.0.0";

const PID_FIELD: &str = "PID";
const CMDLINE_FIELD: &str = "proc.cmdline";
const CONTAINER_FIELD: &str = "container.id";
const MESSAGE_FIELD: &str = "Message";

/// Event type → Spyderbat severity
///
/// Keys mix bare names (`Alert`, `Log`) with `types.`-prefixed ones; events
/// whose type uses the other spelling get an empty level.
const PRIORITY_MAP: &[(&str, &str)] = &[
    ("types.Emergency", "critical"),
    ("Alert", "high"),
    ("types.Critical", "critical"),
    ("types.Error", "high"),
    ("types.Warning", "medium"),
    ("types.Notice", "low"),
    ("Log", "info"),
    ("types.Debug", "info"),
];

/// Spyderbat severity for an event type, or `""` when unmapped
pub fn priority(event_type: &str) -> &'static str {
    PRIORITY_MAP
        .iter()
        .find(|(key, _)| *key == event_type)
        .map(|(_, level)| *level)
        .unwrap_or_default()
}

/// One event in Spyderbat's ingestion schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpyderbatPayload {
    pub schema: &'static str,
    pub id: String,
    pub monotonic_time: u32,
    pub orc_time: f64,
    pub time: f64,
    pub pid: i32,
    pub level: &'static str,
    pub msg: Vec<String>,
    pub args: String,
    pub container: String,
}

impl SpyderbatPayload {
    /// Transform a KubeArmor event
    ///
    /// `orc_time` and `monotonic_time` mark when the gateway processed the
    /// event; `time` is the event's own timestamp.
    ///
    /// # Errors
    /// `SinkError::MissingField` / `SinkError::TypeMismatch` when `PID`,
    /// `proc.cmdline` or `container.id` is absent or mistyped.
    pub fn from_event(event: &KubearmorEvent) -> Result<Self, SinkError> {
        let pid = event.field_i32(PID_FIELD)?;
        let args = event.field_str(CMDLINE_FIELD)?.to_string();
        let container = event.field_str(CONTAINER_FIELD)?.to_string();
        let msg = event
            .field_str_opt(MESSAGE_FIELD)
            .map(|m| m.lines().map(str::to_string).collect())
            .unwrap_or_default();

        let now = Utc::now();
        let orc_time = now.timestamp_nanos_opt().unwrap_or_default() as f64 / 1e9;

        Ok(Self {
            schema: SCHEMA,
            id: uuid::Uuid::new_v4().to_string(),
            monotonic_time: now.timestamp_subsec_nanos(),
            orc_time,
            time: event.timestamp as f64 / 1e9,
            pid,
            level: priority(&event.event_type),
            msg,
            args,
            container,
        })
    }
}
