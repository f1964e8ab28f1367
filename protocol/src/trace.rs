//! Trace records: one self-contained JSON object per line.
//!
//! ```text
//! { "record_type":"step", "source", "request_id", "capability", "run_index",
//!   "step", "start_ns", "end_ns", "duration_ms", "success", "error",
//!   "wall_time_ms", ...extra }
//! { "record_type":"meta", "source", "wall_time_ms", ...fields }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum TraceRecord {
    Step(TraceSpan),
    Meta(MetaRecord),
}

/// Timing of one dispatch phase for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSpan {
    pub source: String,
    pub request_id: String,
    pub capability: String,
    pub run_index: i64,
    pub step: String,
    pub start_ns: i64,
    pub end_ns: i64,
    pub duration_ms: f64,
    pub success: bool,
    pub error: Option<String>,
    pub wall_time_ms: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TraceSpan {
    /// Interval span. An inverted interval is clamped to zero width so
    /// `end_ns >= start_ns` always holds.
    #[allow(clippy::too_many_arguments)]
    pub fn interval(
        source: impl Into<String>,
        request_id: impl Into<String>,
        capability: impl Into<String>,
        run_index: i64,
        step: impl Into<String>,
        start_ns: i64,
        end_ns: i64,
        wall_time_ms: i64,
    ) -> Self {
        let end_ns = end_ns.max(start_ns);
        Self {
            source: source.into(),
            request_id: request_id.into(),
            capability: capability.into(),
            run_index,
            step: step.into(),
            start_ns,
            end_ns,
            duration_ms: (end_ns - start_ns) as f64 / 1_000_000.0,
            success: true,
            error: None,
            wall_time_ms,
            extra: Map::new(),
        }
    }

    pub fn with_outcome(mut self, success: bool, error: Option<String>) -> Self {
        self.success = success;
        self.error = error;
        self
    }

    /// Merge extra key/values. Reserved keys are left untouched.
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        for (key, value) in extra {
            if !RESERVED_KEYS.contains(&key.as_str()) {
                self.extra.insert(key, value);
            }
        }
        self
    }

    pub fn is_mark(&self) -> bool {
        self.start_ns == self.end_ns
    }
}

const RESERVED_KEYS: [&str; 12] = [
    "record_type",
    "source",
    "request_id",
    "capability",
    "run_index",
    "step",
    "start_ns",
    "end_ns",
    "duration_ms",
    "success",
    "error",
    "wall_time_ms",
];

/// Suite-level metadata (device, versions, cold start) written once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub source: String,
    pub wall_time_ms: i64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl MetaRecord {
    /// Reserved keys in `fields` are dropped so every line keeps a single
    /// `record_type` and `source`.
    pub fn new(source: impl Into<String>, wall_time_ms: i64, fields: Map<String, Value>) -> Self {
        let fields = fields
            .into_iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .collect();
        Self {
            source: source.into(),
            wall_time_ms,
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn interval_computes_duration_in_ms() {
        let span = TraceSpan::interval("tool-app", "r1", "query_clock_in", 2, "handler", 1_000, 2_501_000, 7);
        assert_eq!(span.duration_ms, 2.5);
        assert!(!span.is_mark());
    }

    #[test]
    fn inverted_interval_is_clamped() {
        let span = TraceSpan::interval("tool-app", "r1", "x", -1, "parse", 500, 100, 0);
        assert_eq!(span.end_ns, 500);
        assert_eq!(span.duration_ms, 0.0);
        assert!(span.is_mark());
    }

    #[test]
    fn step_line_has_flat_wire_shape() {
        let mut extra = Map::new();
        extra.insert("reply_route".to_string(), Value::from("channel"));
        extra.insert("step".to_string(), Value::from("ignored"));
        let span = TraceSpan::interval("tool-app", "r1", "clock_in_today", -1, "route", 10, 20, 99)
            .with_outcome(false, Some("boom".to_string()))
            .with_extra(extra);

        let value = serde_json::to_value(TraceRecord::Step(span)).unwrap();
        assert_eq!(value["record_type"], "step");
        assert_eq!(value["step"], "route");
        assert_eq!(value["error"], "boom");
        assert_eq!(value["reply_route"], "channel");
        assert_eq!(value["run_index"], -1);
    }

    #[test]
    fn null_error_is_written_explicitly() {
        let span = TraceSpan::interval("tool-app", "r1", "x", 1, "receive", 5, 5, 0);
        let line = serde_json::to_string(&TraceRecord::Step(span)).unwrap();
        assert!(line.contains(r#""error":null"#), "line: {line}");
    }

    #[test]
    fn meta_record_parses_back() {
        let mut fields = Map::new();
        fields.insert("cold_start".to_string(), Value::from(false));
        let record = TraceRecord::Meta(MetaRecord::new("llm-app", 1, fields));

        let line = serde_json::to_string(&record).unwrap();
        let parsed: TraceRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn meta_fields_cannot_shadow_reserved_keys() {
        let mut fields = Map::new();
        fields.insert("source".to_string(), Value::from("spoofed"));
        fields.insert("record_type".to_string(), Value::from("step"));
        fields.insert("wall_time_ms".to_string(), Value::from(0));
        fields.insert("os".to_string(), Value::from("linux"));
        let record = TraceRecord::Meta(MetaRecord::new("llm-app", 42, fields));

        let line = serde_json::to_string(&record).unwrap();
        assert_eq!(line.matches(r#""source""#).count(), 1, "line: {line}");
        assert_eq!(line.matches(r#""record_type""#).count(), 1, "line: {line}");
        assert_eq!(line.matches(r#""wall_time_ms""#).count(), 1, "line: {line}");

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["record_type"], "meta");
        assert_eq!(value["source"], "llm-app");
        assert_eq!(value["wall_time_ms"], 42);
        assert_eq!(value["os"], "linux");
    }
}
