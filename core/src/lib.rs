//! `cmdgate-core`: state, capabilities, tracing and dispatch.
//!
//! The dispatcher owns no globals: the clock store, the trace logger and
//! the UI notifier are injected at construction so every binding and every
//! test decides which concrete pieces it runs against.

pub mod analysis;
pub mod capability;
pub mod config_loader;
pub mod dispatcher;
pub mod notify;
pub mod store;
pub mod timing;
pub mod trace;

pub use analysis::{StepSummary, TraceDump};
pub use capability::{
    CapabilityDescriptor, CapabilityHandler, CapabilityOptions, CapabilityRegistry, HandlerOutput,
};
pub use config_loader::{ConfigLoadError, ConfigLoader, GatewayConfig};
pub use dispatcher::{DispatchOutcome, Disposition, Dispatcher, Inbound, ReplyRoute, StageTiming};
pub use notify::{BroadcastNotifier, NoopNotifier, NotifyError, UiNotification, UiNotifier};
pub use store::{ClockStore, StoreError};
pub use trace::{JsonlTraceFile, MemoryTraceSink, SpanKey, TraceError, TraceLogger, TraceSink};
