//! `cmdgate-protocol`: canonical request/response model for the gateway.
//!
//! Every transport converts to and from the types in this crate, so the
//! dispatcher only ever sees one request shape and produces one response
//! shape regardless of how the invocation arrived.

pub mod capabilities;
pub mod envelope;
pub mod error;
pub mod trace;
pub mod wire;

pub use envelope::{Args, CapabilityCall, CapabilityResult, OutputValue, Request, Response, Status, ValueType};
pub use error::GatewayError;
pub use trace::{MetaRecord, TraceRecord, TraceSpan};
pub use wire::{DecodeFailure, RawPayload};

/// Run index used when a request is not part of a tracked benchmark run.
pub const UNTRACKED_RUN: i64 = -1;
