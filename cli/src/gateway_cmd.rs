//! Commands that talk to a running gateway over its socket.
//!
//! - `cmdgate invoke <CAPABILITY> [--arg k=v]... [--id ID] [--run-index N]`
//! - `cmdgate hello`
//! - `cmdgate status`
//! - `cmdgate reset trace|store`

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use cmdgate_core::GatewayConfig;
use cmdgate_protocol::{Args, Request, Response};
use cmdgate_service::protocol::{
    METHOD_SERVICE_STATUS, METHOD_STORE_RESET, METHOD_TRACE_RESET, ServiceStatusResult,
};
use serde_json::Value;

use crate::client::GatewayClient;

#[derive(Debug, Parser)]
pub struct InvokeArgs {
    /// Capability id (clock_in_today, query_clock_in, make_up_clock_in).
    pub capability: String,

    /// Capability argument as key=value; repeatable. Values that parse as
    /// JSON are sent as JSON, anything else as a string.
    #[arg(long = "arg", short = 'a', value_name = "KEY=VALUE")]
    pub args: Vec<String>,

    /// Request id (defaults to a fresh UUID).
    #[arg(long = "id")]
    pub request_id: Option<String>,

    /// Benchmark run index recorded in the trace.
    #[arg(long = "run-index")]
    pub run_index: Option<i64>,

    /// Output as JSON.
    #[arg(long = "json", short = 'j')]
    pub json: bool,

    /// Override socket path.
    #[arg(long = "socket")]
    pub socket: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct ConnectArgs {
    /// Output as JSON.
    #[arg(long = "json", short = 'j')]
    pub json: bool,

    /// Override socket path.
    #[arg(long = "socket")]
    pub socket: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResetTarget {
    /// Truncate the gateway's trace file.
    Trace,
    /// Forget every clock-in.
    Store,
}

#[derive(Debug, Parser)]
pub struct ResetArgs {
    #[arg(value_enum)]
    pub target: ResetTarget,

    /// Override socket path.
    #[arg(long = "socket")]
    pub socket: Option<PathBuf>,
}

pub(crate) fn resolve_socket(socket: Option<&PathBuf>, config: &GatewayConfig) -> PathBuf {
    socket
        .cloned()
        .unwrap_or_else(|| cmdgate_service::socket_path(config))
}

/// Parse repeated `key=value` pairs into capability arguments.
pub fn parse_arg_pairs(pairs: &[String]) -> Result<Args> {
    let mut args = Args::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Invalid argument '{pair}': expected KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid argument '{pair}': empty key");
        }
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        args.insert(key.to_string(), value);
    }
    Ok(args)
}

/// Human-readable lines for one response.
pub fn render_response(response: &Response) -> Vec<String> {
    let status = if response.is_success() { "success" } else { "failure" };
    let mut lines = vec![format!("[{status}] {}", response.message)];
    for output in &response.capability.output {
        lines.push(format!("  {} = {}", output.name, output.value));
    }
    lines
}

pub fn cmd_invoke(args: &InvokeArgs, config: &GatewayConfig) -> Result<()> {
    let socket = resolve_socket(args.socket.as_ref(), config);
    let mut request = Request::new(
        args.request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        args.capability.clone(),
        parse_arg_pairs(&args.args)?,
    );
    if let Some(run_index) = args.run_index {
        request = request.with_run_index(run_index);
    }

    let mut client = GatewayClient::connect(&socket, Some(config.sync_call_timeout()))?;
    let response = client.request(&request)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        for line in render_response(&response) {
            println!("{line}");
        }
    }

    if !response.is_success() {
        bail!("{} failed: {}", request.capability_id(), response.message);
    }
    Ok(())
}

pub fn cmd_hello(args: &ConnectArgs, config: &GatewayConfig) -> Result<()> {
    let socket = resolve_socket(args.socket.as_ref(), config);
    let client = GatewayClient::connect(&socket, Some(config.sync_call_timeout()))?;
    let hello = client.hello();

    if args.json {
        println!("{}", serde_json::to_string_pretty(hello)?);
        return Ok(());
    }

    println!(
        "cmdgate-service {} (protocol {}) at {}",
        hello.service_version,
        hello.protocol_version,
        client.socket_path().display()
    );
    println!("Capabilities:");
    for capability in &hello.capabilities {
        let args: Vec<_> = capability
            .args
            .iter()
            .map(|a| if a.required { a.name.clone() } else { format!("[{}]", a.name) })
            .collect();
        println!("  {} {} : {}", capability.id, args.join(" "), capability.description);
    }
    println!("Methods: {}", hello.methods.join(", "));
    Ok(())
}

pub fn cmd_status(args: &ConnectArgs, config: &GatewayConfig) -> Result<()> {
    let socket = resolve_socket(args.socket.as_ref(), config);
    let mut client = GatewayClient::connect(&socket, Some(config.sync_call_timeout()))?;
    let result = client.control(METHOD_SERVICE_STATUS, serde_json::json!({}))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let status: ServiceStatusResult =
        serde_json::from_value(result).context("Parse service.status result")?;
    println!(
        "Gateway: uptime {}s, {} connection(s), {} request(s) dispatched",
        status.uptime_s, status.connections, status.dispatched
    );
    if let Some(store) = status.store_path {
        println!("Store: {store}");
    }
    Ok(())
}

pub fn cmd_reset(args: &ResetArgs, config: &GatewayConfig) -> Result<()> {
    let socket = resolve_socket(args.socket.as_ref(), config);
    let mut client = GatewayClient::connect(&socket, Some(config.sync_call_timeout()))?;
    let method = match args.target {
        ResetTarget::Trace => METHOD_TRACE_RESET,
        ResetTarget::Store => METHOD_STORE_RESET,
    };
    client.control(method, serde_json::json!({}))?;
    println!("Reset {}", method.trim_end_matches(".reset"));
    Ok(())
}
