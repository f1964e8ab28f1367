//! Latency trace logger.
//!
//! Every record is one JSON line. Appends are serialized through a mutex
//! and written with a single `write_all`, so concurrent dispatches never
//! interleave partial lines. Logging is best-effort: a failing sink is
//! reported through `tracing` and never fails the request path.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cmdgate_protocol::{MetaRecord, TraceRecord, TraceSpan};
use serde_json::{Map, Value};

use crate::timing::wall_time_ms;

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable destination for trace records.
pub trait TraceSink: Send + Sync {
    fn append(&self, record: &TraceRecord) -> Result<(), TraceError>;

    /// Drop every record written so far.
    fn reset(&self) -> Result<(), TraceError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// JSONL file sink
// ─────────────────────────────────────────────────────────────────────────────

pub struct JsonlTraceFile {
    path: PathBuf,
    file: Mutex<File>,
    fsync: bool,
}

impl JsonlTraceFile {
    pub fn open(path: impl Into<PathBuf>, fsync: bool) -> Result<Self, TraceError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            fsync,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, File> {
        self.file
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl TraceSink for JsonlTraceFile {
    fn append(&self, record: &TraceRecord) -> Result<(), TraceError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = self.lock();
        file.write_all(line.as_bytes())?;
        if self.fsync {
            file.sync_data()?;
        }
        Ok(())
    }

    fn reset(&self) -> Result<(), TraceError> {
        let file = self.lock();
        // Append mode: later writes land at the new end.
        file.set_len(0)?;
        if self.fsync {
            file.sync_all()?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory sink
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryTraceSink {
    records: Mutex<Vec<TraceRecord>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.lock().clone()
    }

    /// Step spans for one request, in write order.
    pub fn steps_for(&self, request_id: &str) -> Vec<TraceSpan> {
        self.lock()
            .iter()
            .filter_map(|record| match record {
                TraceRecord::Step(span) if span.request_id == request_id => Some(span.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TraceRecord>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl TraceSink for MemoryTraceSink {
    fn append(&self, record: &TraceRecord) -> Result<(), TraceError> {
        self.lock().push(record.clone());
        Ok(())
    }

    fn reset(&self) -> Result<(), TraceError> {
        self.lock().clear();
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logger
// ─────────────────────────────────────────────────────────────────────────────

/// Identity shared by every span of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanKey {
    pub request_id: String,
    pub capability: String,
    pub run_index: i64,
}

impl SpanKey {
    pub fn new(request_id: impl Into<String>, capability: impl Into<String>, run_index: i64) -> Self {
        Self {
            request_id: request_id.into(),
            capability: capability.into(),
            run_index,
        }
    }
}

/// Cheap to clone; all clones share one sink.
#[derive(Clone)]
pub struct TraceLogger {
    sink: Arc<dyn TraceSink>,
    source: String,
}

impl TraceLogger {
    pub fn new(sink: Arc<dyn TraceSink>, source: impl Into<String>) -> Self {
        Self {
            sink,
            source: source.into(),
        }
    }

    /// Logger writing into a fresh in-memory sink, returned alongside.
    pub fn in_memory(source: impl Into<String>) -> (Self, Arc<MemoryTraceSink>) {
        let sink = Arc::new(MemoryTraceSink::new());
        (Self::new(sink.clone(), source), sink)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Zero-width span at `timestamp_ns`.
    pub fn mark(&self, key: &SpanKey, step: &str, timestamp_ns: i64, success: bool, error: Option<&str>) {
        self.span(key, step, timestamp_ns, timestamp_ns, success, error);
    }

    pub fn span(
        &self,
        key: &SpanKey,
        step: &str,
        start_ns: i64,
        end_ns: i64,
        success: bool,
        error: Option<&str>,
    ) {
        self.span_with_extra(key, step, start_ns, end_ns, success, error, Map::new());
    }

    #[allow(clippy::too_many_arguments)]
    pub fn span_with_extra(
        &self,
        key: &SpanKey,
        step: &str,
        start_ns: i64,
        end_ns: i64,
        success: bool,
        error: Option<&str>,
        extra: Map<String, Value>,
    ) {
        let span = TraceSpan::interval(
            self.source.as_str(),
            key.request_id.as_str(),
            key.capability.as_str(),
            key.run_index,
            step,
            start_ns,
            end_ns,
            wall_time_ms(),
        )
        .with_outcome(success, error.map(str::to_string))
        .with_extra(extra);
        self.write(TraceRecord::Step(span));
    }

    /// Suite-level metadata record.
    pub fn meta(&self, fields: Map<String, Value>) {
        self.write(TraceRecord::Meta(MetaRecord::new(
            self.source.as_str(),
            wall_time_ms(),
            fields,
        )));
    }

    pub fn reset(&self) {
        match self.sink.reset() {
            Ok(()) => tracing::info!("Trace log reset"),
            Err(e) => tracing::warn!("Trace log reset failed: {e}"),
        }
    }

    fn write(&self, record: TraceRecord) {
        if let Err(e) = self.sink.append(&record) {
            tracing::warn!("Dropping trace record: {e}");
        }
    }
}
