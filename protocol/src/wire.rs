//! Per-transport wire shapes and their adapters onto [`Request`].
//!
//! Transports never branch on protocol details themselves: they wrap what
//! they received in a [`RawPayload`] and the dispatcher decodes it here.

use serde_json::Value;

use crate::envelope::{Args, Request};
use crate::error::GatewayError;

/// Key holding the capability id in a flat extras command.
pub const FLAT_CAPABILITY_KEY: &str = "capability";

/// A raw invocation as received by one transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// Canonical envelope JSON: `{"id", "capability": {"id", "args"}}`.
    Envelope(String),
    /// Flat extras command: the request id travels beside the command and
    /// the arguments sit next to `"capability"` in the command object.
    Flat {
        request_id: Option<String>,
        command_json: Option<String>,
        run_index: Option<i64>,
    },
    /// Trigger-only signal carrying nothing but a capability id.
    Signal {
        request_id: String,
        capability: String,
    },
    /// Bytes that never became text. Carries the decoder's complaint.
    Unreadable(String),
}

/// Decode failure with whatever correlation id could still be recovered.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeFailure {
    pub recovered_id: Option<String>,
    pub error: GatewayError,
}

impl DecodeFailure {
    fn new(recovered_id: Option<String>, error: GatewayError) -> Self {
        Self {
            recovered_id: recovered_id.filter(|id| !id.is_empty()),
            error,
        }
    }
}

impl RawPayload {
    /// Normalize into the canonical request.
    pub fn decode(&self) -> Result<Request, DecodeFailure> {
        match self {
            RawPayload::Envelope(raw) => decode_envelope(raw),
            RawPayload::Flat {
                request_id,
                command_json,
                run_index,
            } => decode_flat(request_id.as_deref(), command_json.as_deref(), *run_index),
            RawPayload::Signal {
                request_id,
                capability,
            } => {
                if request_id.is_empty() {
                    return Err(DecodeFailure::new(None, GatewayError::MissingRequestId));
                }
                Ok(Request::new(request_id.clone(), capability.clone(), Args::new()))
            }
            RawPayload::Unreadable(reason) => Err(DecodeFailure::new(
                None,
                GatewayError::MalformedPayload(format!("unreadable payload: {reason}")),
            )),
        }
    }

    /// Best-effort request id without a full decode. Used by transports that
    /// must answer even when the dispatcher never does.
    pub fn peek_request_id(&self) -> Option<String> {
        match self {
            RawPayload::Envelope(raw) => serde_json::from_str::<Value>(raw)
                .ok()
                .and_then(|value| id_of(&value)),
            RawPayload::Flat { request_id, .. } => request_id.clone().filter(|id| !id.is_empty()),
            RawPayload::Signal { request_id, .. } => {
                Some(request_id.clone()).filter(|id| !id.is_empty())
            }
            RawPayload::Unreadable(_) => None,
        }
    }

    /// Short tag naming the wire shape, recorded on trace spans.
    pub fn shape(&self) -> &'static str {
        match self {
            RawPayload::Envelope(_) => "envelope",
            RawPayload::Flat { .. } => "flat",
            RawPayload::Signal { .. } => "signal",
            RawPayload::Unreadable(_) => "unreadable",
        }
    }
}

fn id_of(value: &Value) -> Option<String> {
    value
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn decode_envelope(raw: &str) -> Result<Request, DecodeFailure> {
    let value: Value = serde_json::from_str(raw).map_err(|e| {
        DecodeFailure::new(None, GatewayError::MalformedPayload(format!("invalid JSON: {e}")))
    })?;
    let recovered_id = id_of(&value);

    let request: Request = serde_json::from_value(value).map_err(|e| {
        DecodeFailure::new(
            recovered_id.clone(),
            GatewayError::MalformedPayload(format!("invalid request envelope: {e}")),
        )
    })?;

    if request.id.is_empty() {
        return Err(DecodeFailure::new(None, GatewayError::MissingRequestId));
    }
    Ok(request)
}

fn decode_flat(
    request_id: Option<&str>,
    command_json: Option<&str>,
    run_index: Option<i64>,
) -> Result<Request, DecodeFailure> {
    let recovered_id = request_id.map(str::to_string);
    let Some(command_json) = command_json else {
        return Err(DecodeFailure::new(
            recovered_id,
            GatewayError::MalformedPayload("missing command json".to_string()),
        ));
    };

    let value: Value = serde_json::from_str(command_json).map_err(|e| {
        DecodeFailure::new(
            recovered_id.clone(),
            GatewayError::MalformedPayload(format!("invalid command json: {e}")),
        )
    })?;
    let Value::Object(mut fields) = value else {
        return Err(DecodeFailure::new(
            recovered_id,
            GatewayError::MalformedPayload("command json is not an object".to_string()),
        ));
    };

    let capability = match fields.remove(FLAT_CAPABILITY_KEY) {
        Some(Value::String(id)) => id,
        _ => {
            return Err(DecodeFailure::new(
                recovered_id,
                GatewayError::MalformedPayload("command has no capability".to_string()),
            ));
        }
    };

    let Some(request_id) = request_id.filter(|id| !id.is_empty()) else {
        return Err(DecodeFailure::new(None, GatewayError::MissingRequestId));
    };

    let mut request = Request::new(request_id, capability, fields);
    request.run_index = run_index;
    Ok(request)
}
