//! Control frames spoken on the gateway socket.
//!
//! A line carrying a `"method"` key is a control frame; any other line is a
//! canonical capability request and is answered with a canonical response.
//!
//! ```text
//! → {"id":0,"method":"hello","params":{"protocol_version":"1.0","client_version":"x"}}
//! ← {"id":0,"result":{...}}  |  {"id":0,"error":{"code":-32601,"message":"..."}}
//! ```
//!
//! A request line may name the binding it goes through in `"transport"`:
//!
//! ```text
//! "sync" (default)  canonical envelope, one response or a timeout failure
//! "callback"        {"id","transport","command":{"capability",...},"run_index"?}
//!                   answered with callback reply extras
//! "signal"          {"id"?,"transport","capability":{"id"}}, never answered
//! ```

use cmdgate_core::CapabilityDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Error codes (error.code)
// ─────────────────────────────────────────────────────────────────────────────

pub const ERR_INVALID_REQUEST: i64 = -32600;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;
pub const ERR_INFRA: i64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Methods
// ─────────────────────────────────────────────────────────────────────────────

pub const METHOD_HELLO: &str = "hello";
pub const METHOD_SERVICE_STATUS: &str = "service.status";
pub const METHOD_TRACE_RESET: &str = "trace.reset";
pub const METHOD_STORE_RESET: &str = "store.reset";

pub const METHODS: [&str; 4] = [
    METHOD_HELLO,
    METHOD_SERVICE_STATUS,
    METHOD_TRACE_RESET,
    METHOD_STORE_RESET,
];

// ─────────────────────────────────────────────────────────────────────────────
// Transports
// ─────────────────────────────────────────────────────────────────────────────

pub const TRANSPORT_KEY: &str = "transport";
pub const TRANSPORT_SYNC: &str = "sync";
pub const TRANSPORT_CALLBACK: &str = "callback";
pub const TRANSPORT_SIGNAL: &str = "signal";

/// Flat command object of a callback frame.
pub const CALLBACK_COMMAND_KEY: &str = "command";

/// Binding a capability request line is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Sync,
    Callback,
    Signal,
}

impl Transport {
    /// Read `"transport"` from a decoded line. Lines that are not JSON
    /// objects, or name no transport, use [`Transport::Sync`]. An unknown
    /// name is returned as the error.
    pub fn of(value: Option<&Value>) -> Result<Self, String> {
        let Some(name) = value.and_then(|v| v.get(TRANSPORT_KEY)) else {
            return Ok(Transport::Sync);
        };
        match name.as_str() {
            Some(TRANSPORT_SYNC) => Ok(Transport::Sync),
            Some(TRANSPORT_CALLBACK) => Ok(Transport::Callback),
            Some(TRANSPORT_SIGNAL) => Ok(Transport::Signal),
            _ => Err(name.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frames
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    /// Integer or string, echoed back verbatim.
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub id: Value,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlError {
    pub id: Value,
    pub error: ControlErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlErrorBody {
    pub code: i64,
    pub message: String,
}

/// True when a decoded line should be routed as a control frame.
pub fn is_control_frame(value: &Value) -> bool {
    value.get("method").is_some()
}

// ─────────────────────────────────────────────────────────────────────────────
// hello
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloParams {
    pub protocol_version: String,
    pub client_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResult {
    pub protocol_version: String,
    pub service_version: String,
    pub methods: Vec<String>,
    pub capabilities: Vec<CapabilityDescriptor>,
}

// ─────────────────────────────────────────────────────────────────────────────
// service.status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusResult {
    pub uptime_s: u64,
    pub connections: u32,
    pub dispatched: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// trace.reset / store.reset
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetResult {
    pub reset: String,
}
