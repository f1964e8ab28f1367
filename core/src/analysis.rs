//! Offline analysis of a JSONL trace.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

use cmdgate_protocol::{MetaRecord, TraceRecord, TraceSpan};
use serde::Serialize;

use crate::trace::TraceError;

/// Parsed contents of one trace file.
#[derive(Debug, Default)]
pub struct TraceDump {
    pub steps: Vec<TraceSpan>,
    pub meta: Vec<MetaRecord>,
    /// Lines that were not valid trace records. Blank lines are ignored.
    pub unparsable: usize,
}

impl TraceDump {
    pub fn read(path: &Path) -> Result<Self, TraceError> {
        let file = std::fs::File::open(path)?;
        let mut dump = Self::default();
        for line in std::io::BufReader::new(file).lines() {
            dump.push_line(&line?);
        }
        Ok(dump)
    }

    pub fn parse(contents: &str) -> Self {
        let mut dump = Self::default();
        for line in contents.lines() {
            dump.push_line(line);
        }
        dump
    }

    fn push_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<TraceRecord>(line) {
            Ok(TraceRecord::Step(span)) => self.steps.push(span),
            Ok(TraceRecord::Meta(meta)) => self.meta.push(meta),
            Err(e) => {
                tracing::debug!("Unparsable trace line: {e}");
                self.unparsable += 1;
            }
        }
    }

    /// Every span of one request across all sources, ordered by start.
    pub fn waterfall(&self, request_id: &str) -> Vec<&TraceSpan> {
        let mut spans: Vec<_> = self
            .steps
            .iter()
            .filter(|s| s.request_id == request_id)
            .collect();
        spans.sort_by_key(|s| (s.start_ns, s.end_ns));
        spans
    }

    /// Per (capability, step) duration statistics.
    pub fn summary(&self) -> Vec<StepSummary> {
        let mut groups: BTreeMap<(&str, &str), (Vec<f64>, usize)> = BTreeMap::new();
        for span in &self.steps {
            let (durations, failures) = groups
                .entry((span.capability.as_str(), span.step.as_str()))
                .or_default();
            durations.push(span.duration_ms);
            if !span.success {
                *failures += 1;
            }
        }

        groups
            .into_iter()
            .map(|((capability, step), (mut durations, failures))| {
                durations.sort_by(f64::total_cmp);
                let count = durations.len();
                StepSummary {
                    capability: capability.to_string(),
                    step: step.to_string(),
                    count,
                    mean_ms: durations.iter().sum::<f64>() / count as f64,
                    p50_ms: durations[(count - 1) / 2],
                    max_ms: durations[count - 1],
                    failures,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub capability: String,
    pub step: String,
    pub count: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub max_ms: f64,
    pub failures: usize,
}
