//! Latency benchmark suite.
//!
//! Runs every built-in capability `--runs` times against a live gateway,
//! pausing between invocations, and records one client-side span per
//! invocation into its own JSONL trace: `request` for a round trip that
//! produced a response, `error` when the connection or the timeout failed
//! first. A `meta` record opens each suite. Joining this file with the
//! gateway's trace on `request_id` yields end-to-end waterfalls.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Days, NaiveDate};
use clap::Parser;
use cmdgate_core::timing::Stopwatch;
use cmdgate_core::{ClockStore, GatewayConfig, JsonlTraceFile, SpanKey, TraceDump, TraceLogger};
use cmdgate_protocol::capabilities::{ARG_DATE, CLOCK_IN_TODAY, MAKE_UP_CLOCK_IN, QUERY_CLOCK_IN};
use cmdgate_protocol::{Args, Request};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::client::GatewayClient;
use crate::gateway_cmd::resolve_socket;

pub const BENCH_TRACE_FILE: &str = "bench_trace.jsonl";
pub const BENCH_TRACE_SOURCE: &str = "llm-app";

pub const STEP_REQUEST: &str = "request";
pub const STEP_ERROR: &str = "error";

#[derive(Debug, Parser)]
pub struct BenchArgs {
    /// Invocations of each capability.
    #[arg(long = "runs", short = 'n', default_value_t = 5)]
    pub runs: u32,

    /// Pause between invocations, in milliseconds.
    #[arg(long = "delay-ms", default_value_t = 1200)]
    pub delay_ms: u64,

    /// Per-invocation timeout, in seconds.
    #[arg(long = "timeout-secs", default_value_t = 180)]
    pub timeout_secs: u64,

    /// Client trace file (defaults to bench_trace.jsonl in the data dir).
    #[arg(long = "trace-file")]
    pub trace_file: Option<PathBuf>,

    /// Append to the client trace instead of truncating it first.
    #[arg(long = "keep-trace")]
    pub keep_trace: bool,

    /// Output the report as JSON.
    #[arg(long = "json", short = 'j')]
    pub json: bool,

    /// Override socket path.
    #[arg(long = "socket")]
    pub socket: Option<PathBuf>,
}

/// One planned invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchCase {
    pub capability: &'static str,
    pub run_index: i64,
    pub args: Args,
}

/// Per run: trigger, query today, backfill yesterday.
pub fn bench_cases(runs: u32, today: NaiveDate) -> Vec<BenchCase> {
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    let date_arg = |date: NaiveDate| {
        let mut args = Args::new();
        args.insert(ARG_DATE.to_string(), Value::String(ClockStore::format_date(date)));
        args
    };

    (1..=i64::from(runs))
        .flat_map(|run_index| {
            [
                BenchCase {
                    capability: CLOCK_IN_TODAY,
                    run_index,
                    args: Args::new(),
                },
                BenchCase {
                    capability: QUERY_CLOCK_IN,
                    run_index,
                    args: date_arg(today),
                },
                BenchCase {
                    capability: MAKE_UP_CLOCK_IN,
                    run_index,
                    args: date_arg(yesterday),
                },
            ]
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct BenchSettings {
    pub runs: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchOutcome {
    pub request_id: String,
    pub capability: String,
    pub run_index: i64,
    pub success: bool,
    pub duration_ms: f64,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BenchReport {
    pub outcomes: Vec<BenchOutcome>,
}

impl BenchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Run the suite, writing client spans through `trace`.
pub fn run_bench(
    socket: &Path,
    settings: &BenchSettings,
    today: NaiveDate,
    trace: &TraceLogger,
) -> BenchReport {
    let cases = bench_cases(settings.runs, today);

    let mut meta = Map::new();
    meta.insert("meta".to_string(), Value::Bool(true));
    meta.insert("client_version".to_string(), Value::from(env!("CARGO_PKG_VERSION")));
    meta.insert("os".to_string(), Value::from(std::env::consts::OS));
    meta.insert("arch".to_string(), Value::from(std::env::consts::ARCH));
    meta.insert("cold_start".to_string(), Value::Bool(false));
    meta.insert("total_runs".to_string(), Value::from(cases.len()));
    trace.meta(meta);

    let mut report = BenchReport::default();
    let mut client: Option<GatewayClient> = None;

    for (i, case) in cases.iter().enumerate() {
        if i > 0 && !settings.delay.is_zero() {
            std::thread::sleep(settings.delay);
        }

        let request = Request::new(uuid::Uuid::new_v4().to_string(), case.capability, case.args.clone())
            .with_run_index(case.run_index);
        let key = SpanKey::new(request.id.as_str(), case.capability, case.run_index);

        let stopwatch = Stopwatch::start();
        let result = match client.as_mut() {
            Some(connected) => connected.request(&request),
            None => GatewayClient::connect(socket, Some(settings.timeout)).and_then(|mut fresh| {
                let response = fresh.request(&request);
                client = Some(fresh);
                response
            }),
        };
        let (start_ns, end_ns) = stopwatch.stop();

        let outcome = match result {
            Ok(response) => {
                let error = (!response.is_success()).then_some(response.message.as_str());
                trace.span(&key, STEP_REQUEST, start_ns, end_ns, response.is_success(), error);
                BenchOutcome {
                    request_id: request.id.clone(),
                    capability: case.capability.to_string(),
                    run_index: case.run_index,
                    success: response.is_success(),
                    duration_ms: (end_ns - start_ns) as f64 / 1_000_000.0,
                    message: response.message,
                }
            }
            Err(e) => {
                let message = format!("{e:#}");
                trace.span(&key, STEP_ERROR, start_ns, end_ns, false, Some(message.as_str()));
                tracing::warn!(request_id = %request.id, capability = case.capability, "{message}");
                // The stream may hold half a reply; start over next time.
                client = None;
                BenchOutcome {
                    request_id: request.id.clone(),
                    capability: case.capability.to_string(),
                    run_index: case.run_index,
                    success: false,
                    duration_ms: (end_ns - start_ns) as f64 / 1_000_000.0,
                    message,
                }
            }
        };
        tracing::info!(
            capability = case.capability,
            run = case.run_index,
            success = outcome.success,
            "benchmark_status"
        );
        report.outcomes.push(outcome);
    }

    report
}

pub fn cmd_bench(args: &BenchArgs, config: &GatewayConfig) -> Result<()> {
    let socket = resolve_socket(args.socket.as_ref(), config);
    let trace_path = args
        .trace_file
        .clone()
        .unwrap_or_else(|| config.data_dir.join(BENCH_TRACE_FILE));

    let sink = JsonlTraceFile::open(&trace_path, config.trace.fsync)?;
    let trace = TraceLogger::new(Arc::new(sink), BENCH_TRACE_SOURCE);
    if !args.keep_trace {
        trace.reset();
    }

    let settings = BenchSettings {
        runs: args.runs,
        delay: Duration::from_millis(args.delay_ms),
        timeout: Duration::from_secs(args.timeout_secs),
    };
    let report = run_bench(&socket, &settings, ClockStore::today(), &trace);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Benchmark: {} invocation(s), {} succeeded, {} failed",
        report.outcomes.len(),
        report.succeeded(),
        report.failed()
    );
    let dump = TraceDump::read(&trace_path)?;
    for row in dump
        .summary()
        .iter()
        .filter(|s| s.step == STEP_REQUEST || s.step == STEP_ERROR)
    {
        println!(
            "  {:<18} {:<8} n={:<3} mean={:>8.3}ms p50={:>8.3}ms max={:>8.3}ms",
            row.capability, row.step, row.count, row.mean_ms, row.p50_ms, row.max_ms
        );
    }
    println!("Client trace: {}", trace_path.display());
    Ok(())
}
