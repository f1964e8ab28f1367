//! Blocking socket client for `cmdgate-service`.
//!
//! One connection, one outstanding frame at a time. Every connection opens
//! with the `hello` handshake; replies that do not match the frame just sent
//! (a late answer to a request that already timed out) are skipped.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use cmdgate_protocol::{Request, Response};
use cmdgate_service::PROTOCOL_VERSION;
use cmdgate_service::protocol::{HelloParams, HelloResult, METHOD_HELLO};
use serde_json::Value;

pub struct GatewayClient {
    path: PathBuf,
    writer: UnixStream,
    reader: BufReader<UnixStream>,
    next_control_id: u64,
    hello: HelloResult,
}

impl GatewayClient {
    /// Connect and handshake. `read_timeout` bounds every later read; a
    /// zero duration waits forever, like `None`.
    pub fn connect(socket_path: &Path, read_timeout: Option<Duration>) -> Result<Self> {
        let read_timeout = read_timeout.filter(|timeout| !timeout.is_zero());
        let stream = UnixStream::connect(socket_path).with_context(|| {
            format!(
                "Cannot connect to gateway at {}\nHint: start it with: cmdgate-service",
                socket_path.display()
            )
        })?;
        stream
            .set_read_timeout(read_timeout)
            .context("Set read timeout")?;
        let writer = stream.try_clone().context("Clone stream")?;

        let mut client = Self {
            path: socket_path.to_path_buf(),
            writer,
            reader: BufReader::new(stream),
            next_control_id: 0,
            hello: HelloResult {
                protocol_version: String::new(),
                service_version: String::new(),
                methods: Vec::new(),
                capabilities: Vec::new(),
            },
        };

        let params = serde_json::to_value(HelloParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        })?;
        let result = client
            .control(METHOD_HELLO, params)
            .context("Handshake failed")?;
        client.hello = serde_json::from_value(result).context("Parse hello result")?;
        tracing::debug!(
            service_version = %client.hello.service_version,
            capabilities = client.hello.capabilities.len(),
            "Connected to gateway"
        );
        Ok(client)
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    pub fn hello(&self) -> &HelloResult {
        &self.hello
    }

    /// Send a control frame and return its `result`.
    pub fn control(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_control_id;
        self.next_control_id += 1;

        let frame = serde_json::json!({
            "id": id,
            "method": method,
            "params": params,
        });
        self.send_line(&serde_json::to_string(&frame)?)?;

        loop {
            let line = self.read_line()?;
            let reply: Value = serde_json::from_str(&line).context("Parse control reply")?;
            if reply.get("id") != Some(&Value::from(id)) {
                tracing::debug!("Skipping unrelated frame: {line}");
                continue;
            }
            if let Some(error) = reply.get("error") {
                bail!(
                    "RPC error ({}): {}",
                    error.get("code").and_then(Value::as_i64).unwrap_or(0),
                    error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                );
            }
            return Ok(reply.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    /// Send one capability request and wait for its response.
    pub fn request(&mut self, request: &Request) -> Result<Response> {
        self.send_line(&request.to_json()?)?;
        loop {
            let line = self.read_line()?;
            match Response::from_json(&line) {
                Ok(response) if response.id == request.id => return Ok(response),
                Ok(response) => {
                    tracing::debug!(request_id = %response.id, "Skipping stale response");
                }
                Err(_) => tracing::debug!("Skipping non-response frame: {line}"),
            }
        }
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.writer.write_all(&bytes).context("Write frame")?;
        self.writer.flush().context("Flush frame")?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).context("Read reply")?;
        if n == 0 {
            bail!("Gateway closed the connection");
        }
        Ok(line.trim_end().to_string())
    }
}
