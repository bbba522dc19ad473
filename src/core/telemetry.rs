// src/core/telemetry.rs — Per-run telemetry log
//
// Append-only, in-memory, one instance per pipeline. Internal metadata
// (timestamp, session id) is attached on emit under the `_` prefix and
// stripped before external exposure.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::types::StopReason;

/// Key prefix marking internal-only metadata fields.
pub const META_PREFIX: &str = "_";

/// Metrics recorded for one loop pass.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEntry {
    pub iteration: u32,
    pub cumulative_latency_ms: u64,
    pub scores: Value,
    pub response_feedback: Value,
    pub residual_error: f64,
    pub failed_instructions_count: usize,
    pub stop_reason: StopReason,
    pub prompt_template_text: String,
    pub response_text: String,
}

/// Append-only telemetry trail for one pipeline instance.
#[derive(Debug)]
pub struct TelemetryLog {
    session_id: String,
    entries: Vec<Map<String, Value>>,
}

impl TelemetryLog {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            entries: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, attaching session id and UTC timestamp internally.
    pub fn emit(&mut self, entry: &TelemetryEntry) -> anyhow::Result<()> {
        let value = serde_json::to_value(entry)?;
        let Value::Object(mut map) = value else {
            anyhow::bail!("telemetry entry did not serialize to an object");
        };
        map.insert(
            format!("{}timestamp", META_PREFIX),
            Value::String(Utc::now().to_rfc3339()),
        );
        map.insert(
            format!("{}session_id", META_PREFIX),
            Value::String(self.session_id.clone()),
        );
        self.entries.push(map);
        Ok(())
    }

    /// The full trail. With `include_meta` false (the only mode used
    /// externally) every key starting with [`META_PREFIX`] is stripped.
    pub fn get_all(&self, include_meta: bool) -> Vec<Value> {
        self.entries
            .iter()
            .map(|entry| {
                if include_meta {
                    Value::Object(entry.clone())
                } else {
                    Value::Object(
                        entry
                            .iter()
                            .filter(|(k, _)| !k.starts_with(META_PREFIX))
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                    )
                }
            })
            .collect()
    }
}

impl Default for TelemetryLog {
    fn default() -> Self {
        Self::new()
    }
}
