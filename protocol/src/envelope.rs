//! Canonical request/response envelopes.
//!
//! ```text
//! Request:  { "id", "capability": { "id", "args": {..} }, "run_index"? }
//! Response: { "id", "status", "message", "capability": { "id", "output": [..] } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::UNTRACKED_RUN;

/// Capability-specific arguments.
pub type Args = serde_json::Map<String, Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Client-supplied correlation id. Echoed on the response.
    pub id: String,
    pub capability: CapabilityCall,
    /// Groups repeated invocations of a benchmark; absent means untracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_index: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub id: String,
    #[serde(default)]
    pub args: Args,
}

impl Request {
    pub fn new(id: impl Into<String>, capability: impl Into<String>, args: Args) -> Self {
        Self {
            id: id.into(),
            capability: CapabilityCall {
                id: capability.into(),
                args,
            },
            run_index: None,
        }
    }

    pub fn with_run_index(mut self, run_index: i64) -> Self {
        self.run_index = Some(run_index);
        self
    }

    pub fn capability_id(&self) -> &str {
        &self.capability.id
    }

    /// Run index, or [`UNTRACKED_RUN`] when absent.
    pub fn run_index(&self) -> i64 {
        self.run_index.unwrap_or(UNTRACKED_RUN)
    }

    /// String argument lookup. `None` for absent, null, or empty values.
    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.capability
            .args
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub status: Status,
    pub message: String,
    pub capability: CapabilityResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResult {
    pub id: String,
    #[serde(default)]
    pub output: Vec<OutputValue>,
}

/// Fallback text for failures constructed without a message.
const GENERIC_FAILURE: &str = "request failed";

impl Response {
    pub fn success(
        id: impl Into<String>,
        capability: impl Into<String>,
        message: impl Into<String>,
        output: Vec<OutputValue>,
    ) -> Self {
        Self {
            id: id.into(),
            status: Status::Success,
            message: message.into(),
            capability: CapabilityResult {
                id: capability.into(),
                output,
            },
        }
    }

    /// Failure response. A blank message is replaced so failures always
    /// explain themselves.
    pub fn failure(
        id: impl Into<String>,
        capability: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = GENERIC_FAILURE.to_string();
        }
        Self {
            id: id.into(),
            status: Status::Failure,
            message,
            capability: CapabilityResult {
                id: capability.into(),
                output: Vec::new(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// First output value with the given name.
    pub fn output(&self, name: &str) -> Option<&OutputValue> {
        self.capability.output.iter().find(|o| o.name == name)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed output values
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Boolean,
    Number,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ValueType,
    pub value: Value,
}

impl OutputValue {
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ValueType::String,
            value: Value::String(value.into()),
        }
    }

    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self {
            name: name.into(),
            kind: ValueType::Boolean,
            value: Value::Bool(value),
        }
    }

    pub fn number(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            kind: ValueType::Number,
            value: Value::from(value),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind {
            ValueType::Boolean => self.value.as_bool(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.kind {
            ValueType::String => self.value.as_str(),
            _ => None,
        }
    }
}
