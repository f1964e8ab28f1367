//! `cmdgate`: command-line client for the command gateway.

pub mod bench_cmd;
pub mod client;
pub mod gateway_cmd;
pub mod store_cmd;
pub mod trace_cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cmdgate_core::{ConfigLoader, GatewayConfig};

pub use client::GatewayClient;

#[derive(Debug, Parser)]
#[command(name = "cmdgate", version, about = "Invoke and inspect the command gateway")]
pub struct Cli {
    /// Directory holding config.toml (overrides $CMDGATE_HOME).
    #[arg(long = "home", global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Invoke one capability on the running gateway.
    Invoke(gateway_cmd::InvokeArgs),
    /// Handshake and list the gateway's capabilities.
    Hello(gateway_cmd::ConnectArgs),
    /// Gateway uptime, connections and dispatch count.
    Status(gateway_cmd::ConnectArgs),
    /// Reset the gateway's trace or clock store.
    Reset(gateway_cmd::ResetArgs),
    /// Run the latency benchmark suite.
    Bench(bench_cmd::BenchArgs),
    /// Analyze trace files offline.
    Trace(trace_cmd::TraceCli),
    /// Inspect the local clock store.
    Store(store_cmd::StoreCli),
}

impl Cli {
    pub fn load_config(&self) -> Result<GatewayConfig> {
        let mut loader = ConfigLoader::new();
        if let Some(home) = &self.home {
            loader = loader.with_home(home.clone());
        }
        Ok(loader.load()?)
    }

    pub fn run(&self) -> Result<()> {
        let config = self.load_config()?;
        match &self.command {
            Command::Invoke(args) => gateway_cmd::cmd_invoke(args, &config),
            Command::Hello(args) => gateway_cmd::cmd_hello(args, &config),
            Command::Status(args) => gateway_cmd::cmd_status(args, &config),
            Command::Reset(args) => gateway_cmd::cmd_reset(args, &config),
            Command::Bench(args) => bench_cmd::cmd_bench(args, &config),
            Command::Trace(trace) => trace.run(&config),
            Command::Store(store) => store.run(&config),
        }
    }
}
