//! Unix domain socket listener.
//!
//! Reads newline-delimited JSON. Control frames are answered inline;
//! capability requests go through the binding their `"transport"` names
//! (see [`crate::protocol`]), run concurrently on the blocking pool, and
//! their replies are multiplexed back through one writer task per
//! connection, so replies may arrive out of request order.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use cmdgate_core::Dispatcher;
use cmdgate_core::config_loader::DEFAULT_SYNC_CALL_TIMEOUT_MS;
use cmdgate_protocol::{GatewayError, RawPayload, Response};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::PROTOCOL_VERSION;
use crate::bindings::{CallbackBinding, CommandExtras, PendingCallback, SignalBinding, SyncCallBinding};
use crate::protocol::*;

/// Shared daemon state.
pub struct ServiceState {
    dispatcher: Arc<Dispatcher>,
    sync_call_timeout: Duration,
    started_at: Instant,
    connections: AtomicU32,
    last_activity: Mutex<Instant>,
}

impl ServiceState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let now = Instant::now();
        Self {
            dispatcher,
            sync_call_timeout: Duration::from_millis(DEFAULT_SYNC_CALL_TIMEOUT_MS),
            started_at: now,
            connections: AtomicU32::new(0),
            last_activity: Mutex::new(now),
        }
    }

    /// How long a `sync` request may take before it is answered with a
    /// timeout failure.
    pub fn with_sync_call_timeout(mut self, timeout: Duration) -> Self {
        self.sync_call_timeout = timeout;
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn sync_call_timeout(&self) -> Duration {
        self.sync_call_timeout
    }

    pub fn uptime_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Time since the last frame was received.
    pub fn idle_for(&self) -> Duration {
        self.activity().elapsed()
    }

    fn touch(&self) {
        *self.last_activity_guard() = Instant::now();
    }

    fn activity(&self) -> Instant {
        *self.last_activity_guard()
    }

    fn last_activity_guard(&self) -> std::sync::MutexGuard<'_, Instant> {
        self.last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Bind at `path`, replacing a stale socket file.
pub fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(path)?;
    tracing::info!("Gateway listening on {}", path.display());
    Ok(listener)
}

/// Accept connections until `shutdown` flips to `true`.
pub async fn serve(
    state: Arc<ServiceState>,
    listener: UnixListener,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            tracing::warn!("Connection error: {e}");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {e}");
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Listener shutting down");
                    return Ok(());
                }
            }
        }
    }
}

struct ConnectionGuard(Arc<ServiceState>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.connections.fetch_sub(1, Ordering::SeqCst);
        self.0.touch();
    }
}

async fn handle_connection(state: Arc<ServiceState>, stream: UnixStream) -> std::io::Result<()> {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let _guard = ConnectionGuard(Arc::clone(&state));

    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer_task = tokio::spawn(async move {
        while let Some(mut line) = rx.recv().await {
            line.push('\n');
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::debug!("Writer closed: {e}");
                break;
            }
            if let Err(e) = writer.flush().await {
                tracing::debug!("Writer closed: {e}");
                break;
            }
        }
    });

    let bindings = ConnectionBindings::new(&state, Handle::current());
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            break; // EOF
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(text) => text.trim(),
            Err(e) => {
                // Still a request on this channel; it gets an anonymous
                // failure and the connection stays open.
                state.touch();
                bindings.sync(RawPayload::Unreadable(e.to_string()), &tx);
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        state.touch();

        let value = serde_json::from_str::<Value>(line).ok();
        if let Some(value) = value.as_ref().filter(|v| is_control_frame(v)) {
            let reply = dispatch_control(&state, value.clone());
            let encoded = serde_json::to_string(&reply).unwrap_or_else(|_| "{}".to_string());
            if tx.send(encoded).is_err() {
                break;
            }
            continue;
        }

        match Transport::of(value.as_ref()) {
            // Undecodable lines land here too and are answered by the
            // dispatcher: the connection is the correlation.
            Ok(Transport::Sync) => bindings.sync(RawPayload::Envelope(line.to_string()), &tx),
            Ok(Transport::Callback) => bindings.callback(value.as_ref(), &tx),
            Ok(Transport::Signal) => bindings.signal(value.as_ref()),
            Err(name) => {
                let id = value.as_ref().and_then(|v| v.get("id")).and_then(Value::as_str);
                let err = GatewayError::MalformedPayload(format!("unknown transport: {name}"));
                tracing::debug!(request_id = ?id, "{err}");
                send_response(&tx, &Response::failure(id.unwrap_or_default(), "", err.to_string()));
            }
        }
    }

    // In-flight dispatches hold sender clones; the writer drains them first.
    drop(tx);
    let _ = writer_task.await;
    Ok(())
}

/// The bindings a connection's request lines are routed through.
struct ConnectionBindings {
    sync_call: Arc<SyncCallBinding>,
    callback: CallbackBinding,
    signal: SignalBinding,
}

impl ConnectionBindings {
    fn new(state: &ServiceState, runtime: Handle) -> Self {
        let dispatcher = &state.dispatcher;
        Self {
            sync_call: Arc::new(SyncCallBinding::new(
                Arc::clone(dispatcher),
                runtime.clone(),
                state.sync_call_timeout,
            )),
            callback: CallbackBinding::new(Arc::clone(dispatcher), runtime.clone()),
            signal: SignalBinding::new(Arc::clone(dispatcher), runtime),
        }
    }

    /// Block a pool thread on the call; the response, or the timeout
    /// failure, is written back.
    fn sync(&self, payload: RawPayload, tx: &mpsc::UnboundedSender<String>) {
        let binding = Arc::clone(&self.sync_call);
        let tx = tx.clone();
        tokio::task::spawn_blocking(move || {
            let response = binding.call(payload);
            send_response(&tx, &response);
        });
    }

    /// Flat command plus a callback handle whose replies are forwarded to
    /// the connection as callback reply extras. Without an id the dispatcher
    /// drops the request and nothing is written.
    fn callback(&self, frame: Option<&Value>, tx: &mpsc::UnboundedSender<String>) {
        let field = |key: &str| frame.and_then(|f| f.get(key));
        let command = field(CALLBACK_COMMAND_KEY);
        let extras = CommandExtras {
            command_json: command.map(Value::to_string),
            request_id: field("id").and_then(Value::as_str).map(str::to_string),
            callback: None,
            trace_capability: command
                .and_then(|c| c.get(cmdgate_protocol::wire::FLAT_CAPABILITY_KEY))
                .and_then(Value::as_str)
                .map(str::to_string),
            trace_run_index: field("run_index").and_then(Value::as_i64),
        };

        let (handle, mut replies) = PendingCallback::channel(1);
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(reply) = replies.recv().await {
                match serde_json::to_string(&reply) {
                    Ok(line) => {
                        let _ = tx.send(line);
                    }
                    Err(e) => tracing::warn!(request_id = %reply.request_id, "Encode callback reply: {e}"),
                }
            }
        });
        self.callback.start(extras.with_callback(handle));
    }

    /// Fire and forget. The frame's id, when present, names the dispatch.
    fn signal(&self, frame: Option<&Value>) {
        let capability = frame
            .and_then(|f| f.pointer("/capability/id"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let request_id = frame
            .and_then(|f| f.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let fired = match request_id {
            Some(request_id) => self.signal.fire_as(request_id, capability),
            None => self.signal.fire(capability),
        };
        tracing::trace!(request_id = %fired.request_id, "Signal line accepted");
    }
}

fn send_response(tx: &mpsc::UnboundedSender<String>, response: &Response) {
    match response.to_json() {
        Ok(line) => {
            let _ = tx.send(line);
        }
        Err(e) => tracing::warn!(request_id = %response.id, "Encode response: {e}"),
    }
}

/// Answer one control frame.
fn dispatch_control(state: &ServiceState, value: Value) -> Value {
    let request: ControlRequest = match serde_json::from_value(value) {
        Ok(req) => req,
        Err(e) => {
            return error_frame(Value::from(0), ERR_INVALID_REQUEST, format!("Invalid control frame: {e}"));
        }
    };

    let id = request.id.clone();
    match dispatch_method(state, &request.method, request.params) {
        Ok(result) => serde_json::to_value(ControlResponse { id, result }).unwrap_or_default(),
        Err((code, message)) => error_frame(id, code, message),
    }
}

fn error_frame(id: Value, code: i64, message: String) -> Value {
    serde_json::to_value(ControlError {
        id,
        error: ControlErrorBody { code, message },
    })
    .unwrap_or_default()
}

fn dispatch_method(
    state: &ServiceState,
    method: &str,
    params: Option<Value>,
) -> Result<Value, (i64, String)> {
    match method {
        METHOD_HELLO => handle_hello(state, params),
        METHOD_SERVICE_STATUS => handle_service_status(state),
        METHOD_TRACE_RESET => {
            state.dispatcher.trace().reset();
            to_result(ResetResult {
                reset: "trace".to_string(),
            })
        }
        METHOD_STORE_RESET => {
            state.dispatcher.store().reset();
            to_result(ResetResult {
                reset: "store".to_string(),
            })
        }
        _ => Err((ERR_METHOD_NOT_FOUND, format!("Unknown method: {method}"))),
    }
}

/// Handle the `hello` handshake.
fn handle_hello(state: &ServiceState, params: Option<Value>) -> Result<Value, (i64, String)> {
    let hello: HelloParams = params
        .ok_or_else(|| (ERR_INVALID_PARAMS, "Missing params".to_string()))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| (ERR_INVALID_PARAMS, format!("Invalid hello params: {e}")))
        })?;

    if hello.protocol_version != PROTOCOL_VERSION {
        return Err((
            ERR_INVALID_PARAMS,
            format!(
                "Incompatible protocol version: client={}, service={}",
                hello.protocol_version, PROTOCOL_VERSION
            ),
        ));
    }
    tracing::debug!(client_version = %hello.client_version, "Handshake");

    to_result(HelloResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        service_version: env!("CARGO_PKG_VERSION").to_string(),
        methods: METHODS.iter().map(ToString::to_string).collect(),
        capabilities: state.dispatcher.registry().describe(),
    })
}

fn handle_service_status(state: &ServiceState) -> Result<Value, (i64, String)> {
    to_result(ServiceStatusResult {
        uptime_s: state.uptime_s(),
        connections: state.connection_count(),
        dispatched: state.dispatcher.dispatched_count(),
        store_path: state
            .dispatcher
            .store()
            .path()
            .map(|p| p.display().to_string()),
    })
}

fn to_result(value: impl serde::Serialize) -> Result<Value, (i64, String)> {
    serde_json::to_value(value).map_err(|e| (ERR_INFRA, format!("Serialize error: {e}")))
}
