//! Offline trace analysis.
//!
//! Reads one or more JSONL traces (the gateway's and the benchmark
//! client's) and either rebuilds the waterfall of a single request or
//! summarizes step durations per capability.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use cmdgate_core::{GatewayConfig, TraceDump};
use cmdgate_protocol::TraceSpan;

#[derive(Debug, Parser)]
pub struct TraceCli {
    #[command(subcommand)]
    pub command: TraceSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum TraceSubcommand {
    /// Every span of one request, ordered by start time.
    Waterfall(WaterfallArgs),
    /// Duration statistics per capability and step.
    Summary(SummaryArgs),
}

#[derive(Debug, Parser)]
pub struct WaterfallArgs {
    /// Request id to reconstruct.
    pub request_id: String,

    /// Trace file to read; repeat to join several (defaults to the
    /// gateway's trace).
    #[arg(long = "file", short = 'f')]
    pub files: Vec<PathBuf>,

    /// Output as JSON.
    #[arg(long = "json", short = 'j')]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct SummaryArgs {
    /// Trace file to read; repeat to join several.
    #[arg(long = "file", short = 'f')]
    pub files: Vec<PathBuf>,

    /// Output as JSON.
    #[arg(long = "json", short = 'j')]
    pub json: bool,
}

impl TraceCli {
    pub fn run(&self, config: &GatewayConfig) -> Result<()> {
        match &self.command {
            TraceSubcommand::Waterfall(args) => cmd_waterfall(args, config),
            TraceSubcommand::Summary(args) => cmd_summary(args, config),
        }
    }
}

/// Read and concatenate every trace file.
pub fn load_dump(files: &[PathBuf], config: &GatewayConfig) -> Result<TraceDump> {
    let files = if files.is_empty() {
        vec![config.trace_path()]
    } else {
        files.to_vec()
    };

    let mut joined = TraceDump::default();
    for path in &files {
        let dump = TraceDump::read(path).with_context(|| format!("Read trace {}", path.display()))?;
        joined.steps.extend(dump.steps);
        joined.meta.extend(dump.meta);
        joined.unparsable += dump.unparsable;
    }
    if joined.unparsable > 0 {
        tracing::warn!(lines = joined.unparsable, "Skipped unparsable trace lines");
    }
    Ok(joined)
}

/// One line per span, offsets relative to the earliest start.
pub fn render_waterfall(spans: &[&TraceSpan]) -> Vec<String> {
    let Some(origin) = spans.iter().map(|s| s.start_ns).min() else {
        return Vec::new();
    };
    spans
        .iter()
        .map(|span| {
            let offset_ms = (span.start_ns - origin) as f64 / 1_000_000.0;
            let outcome = match (&span.error, span.success) {
                (Some(error), _) => format!("FAIL {error}"),
                (None, false) => "FAIL".to_string(),
                (None, true) => "ok".to_string(),
            };
            format!(
                "{offset_ms:>10.3}ms {:>9.3}ms  {:<8} {:<13} {outcome}",
                span.duration_ms, span.source, span.step
            )
        })
        .collect()
}

fn cmd_waterfall(args: &WaterfallArgs, config: &GatewayConfig) -> Result<()> {
    let dump = load_dump(&args.files, config)?;
    let spans = dump.waterfall(&args.request_id);
    if spans.is_empty() {
        bail!("No spans recorded for request {}", args.request_id);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&spans)?);
        return Ok(());
    }

    let first = spans[0];
    println!(
        "{} ({}, run {})",
        args.request_id, first.capability, first.run_index
    );
    for line in render_waterfall(&spans) {
        println!("{line}");
    }
    Ok(())
}

fn cmd_summary(args: &SummaryArgs, config: &GatewayConfig) -> Result<()> {
    let dump = load_dump(&args.files, config)?;
    let summary = dump.summary();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if summary.is_empty() {
        println!("No spans recorded");
        return Ok(());
    }
    println!(
        "{:<18} {:<13} {:>5} {:>10} {:>10} {:>10} {:>6}",
        "capability", "step", "n", "mean_ms", "p50_ms", "max_ms", "fail"
    );
    for row in &summary {
        println!(
            "{:<18} {:<13} {:>5} {:>10.3} {:>10.3} {:>10.3} {:>6}",
            row.capability, row.step, row.count, row.mean_ms, row.p50_ms, row.max_ms, row.failures
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdgate_core::ConfigLoader;
    use cmdgate_protocol::TraceRecord;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn span(source: &str, request_id: &str, step: &str, start: i64, end: i64) -> TraceSpan {
        TraceSpan::interval(source, request_id, "query_clock_in", 1, step, start, end, 0)
    }

    #[test]
    fn waterfall_offsets_from_first_start() {
        let request = span("llm-app", "r1", "request", 1_000_000, 9_000_000);
        let handler = span("tool-app", "r1", "handler", 3_000_000, 4_500_000)
            .with_outcome(false, Some("invalid date: x".to_string()));
        let lines = render_waterfall(&[&request, &handler]);

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("     0.000ms     8.000ms"), "{}", lines[0]);
        assert!(lines[0].ends_with("ok"));
        assert!(lines[1].starts_with("     2.000ms     1.500ms"), "{}", lines[1]);
        assert!(lines[1].ends_with("FAIL invalid date: x"));
    }

    #[test]
    fn empty_waterfall_renders_nothing() {
        assert!(render_waterfall(&[]).is_empty());
    }

    #[test]
    fn joins_several_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let write = |name: &str, spans: &[TraceSpan]| {
            let path = dir.path().join(name);
            let mut file = std::fs::File::create(&path).unwrap();
            for s in spans {
                let line = serde_json::to_string(&TraceRecord::Step(s.clone())).unwrap();
                writeln!(file, "{line}").unwrap();
            }
            writeln!(file, "garbage").unwrap();
            path
        };
        let service = write("service.jsonl", &[span("tool-app", "r1", "handler", 20, 30)]);
        let client = write("client.jsonl", &[span("llm-app", "r1", "request", 10, 40)]);

        let config = ConfigLoader::new().skip_file_layer().skip_env_layer().load().unwrap();
        let dump = load_dump(&[service, client], &config).unwrap();

        assert_eq!(dump.unparsable, 2);
        let steps: Vec<_> = dump.waterfall("r1").iter().map(|s| s.step.as_str()).collect();
        assert_eq!(steps, vec!["request", "handler"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ConfigLoader::new().skip_file_layer().skip_env_layer().load().unwrap();
        assert!(load_dump(&[dir.path().join("nope.jsonl")], &config).is_err());
    }
}
