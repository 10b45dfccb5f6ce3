//! KubeArmor event as received by the gateway
//!
//! The event is read-only for outputs. Outputs pull the fields they need out
//! of `output_fields` through the typed accessors, which turn a missing or
//! mistyped field into a per-event [`SinkError`] instead of a crash.

use crate::error::SinkError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A single KubeArmor alert or log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubearmorEvent {
    /// Unix timestamp in nanoseconds
    #[serde(default)]
    pub timestamp: i64,

    /// Human-readable update time as reported by KubeArmor
    #[serde(default)]
    pub updated_time: String,

    #[serde(default)]
    pub cluster_name: String,

    #[serde(default)]
    pub hostname: String,

    /// Event type / severity label (e.g. "Alert", "Log")
    #[serde(default)]
    pub event_type: String,

    /// Arbitrary typed fields of the event
    #[serde(default)]
    pub output_fields: HashMap<String, Value>,
}

impl KubearmorEvent {
    pub fn new(event_type: impl Into<String>, timestamp: i64) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp,
            ..Default::default()
        }
    }

    /// Add an output field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.output_fields.insert(key.into(), value.into());
        self
    }

    /// Borrow a required string field
    pub fn field_str(&self, key: &str) -> Result<&str, SinkError> {
        match self.output_fields.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(SinkError::TypeMismatch {
                field: key.to_string(),
                expected: "string",
            }),
            None => Err(SinkError::MissingField(key.to_string())),
        }
    }

    /// Read a required field holding a 32-bit signed integer
    pub fn field_i32(&self, key: &str) -> Result<i32, SinkError> {
        let mismatch = || SinkError::TypeMismatch {
            field: key.to_string(),
            expected: "32-bit integer",
        };
        match self.output_fields.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(mismatch),
            Some(_) => Err(mismatch()),
            None => Err(SinkError::MissingField(key.to_string())),
        }
    }

    /// Optional string field; absent or non-string yields `None`
    pub fn field_str_opt(&self, key: &str) -> Option<&str> {
        self.output_fields.get(key).and_then(Value::as_str)
    }
}
