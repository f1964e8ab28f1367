//! Gateway error taxonomy.
//!
//! Every variant is converted into a failure response (or a traced drop)
//! at the dispatcher boundary; none of them is fatal to the process.

/// Errors that can surface while handling one invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("missing request id")]
    MissingRequestId,

    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("missing argument: {0}")]
    MissingArgument(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("reply delivery failed: {0}")]
    ReplyDeliveryFailed(String),

    #[error("handler fault: {0}")]
    HandlerFault(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Stable machine-readable tag, used in trace extras and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::MalformedPayload(_) => "malformed_payload",
            GatewayError::MissingRequestId => "missing_request_id",
            GatewayError::UnknownCapability(_) => "unknown_capability",
            GatewayError::MissingArgument(_) => "missing_argument",
            GatewayError::InvalidDate(_) => "invalid_date",
            GatewayError::ReplyDeliveryFailed(_) => "reply_delivery_failed",
            GatewayError::HandlerFault(_) => "handler_fault",
            GatewayError::Unavailable(_) => "unavailable",
        }
    }
}
