//! Request dispatcher.
//!
//! ```text
//! RECEIVED ─▶ PARSED ─▶ ROUTED ─▶ EXECUTED ─▶ REPLIED
//!     │          │          │
//!     └──────────┴──────────┴──▶ FAILED ─▶ failure response ─▶ REPLIED
//!                                   └─▶ (no id, no channel) dropped: parse_failed
//! ```
//!
//! Each phase is written as one trace span once it closes; every dispatch
//! ends in exactly one terminal mark (`replied` or `parse_failed`). The
//! transport's delivery result arrives later through
//! [`Dispatcher::record_delivery`].

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cmdgate_protocol::{GatewayError, RawPayload, Request, Response, UNTRACKED_RUN};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capability::{CapabilityOptions, CapabilityRegistry, HandlerOutput};
use crate::config_loader::GatewayConfig;
use crate::notify::{BroadcastNotifier, UiNotifier};
use crate::store::ClockStore;
use crate::timing::monotonic_ns;
use crate::trace::{JsonlTraceFile, SpanKey, TraceError, TraceLogger};

pub const STEP_RECEIVE: &str = "receive";
pub const STEP_PARSE: &str = "parse";
pub const STEP_ROUTE: &str = "route";
pub const STEP_HANDLER: &str = "handler";
pub const STEP_NOTIFY: &str = "notify";
pub const STEP_ENCODE: &str = "encode";
pub const STEP_REPLIED: &str = "replied";
pub const STEP_PARSE_FAILED: &str = "parse_failed";
pub const STEP_DELIVER: &str = "deliver";

/// Capability recorded when neither the payload nor the transport names one.
const UNKNOWN_CAPABILITY: &str = "unknown";

/// How the transport can get a reply back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyRoute {
    /// The channel itself identifies the caller; an empty id still arrives.
    ChannelBound,
    /// The caller matches replies by request id.
    IdCorrelated,
    /// Nobody is listening.
    Discarded,
}

impl ReplyRoute {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplyRoute::ChannelBound => "channel_bound",
            ReplyRoute::IdCorrelated => "id_correlated",
            ReplyRoute::Discarded => "discarded",
        }
    }
}

/// One invocation handed over by a transport.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub payload: RawPayload,
    pub route: ReplyRoute,
    /// Capability the transport believes this is, for tracing decode failures.
    pub capability_hint: Option<String>,
    pub run_index_hint: Option<i64>,
}

impl Inbound {
    pub fn new(payload: RawPayload, route: ReplyRoute) -> Self {
        Self {
            payload,
            route,
            capability_hint: None,
            run_index_hint: None,
        }
    }

    pub fn with_hints(mut self, capability: Option<String>, run_index: Option<i64>) -> Self {
        self.capability_hint = capability.filter(|c| !c.is_empty());
        self.run_index_hint = run_index;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Reply(Response),
    /// Undeliverable: no request id and no channel to carry an anonymous reply.
    Dropped(GatewayError),
}

/// Bounds of one closed phase, shipped back to clients that rebuild the
/// service-side waterfall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub step: String,
    pub start_ns: i64,
    pub end_ns: i64,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub request_id: String,
    pub capability: String,
    pub run_index: i64,
    pub route: ReplyRoute,
    pub disposition: Disposition,
    /// Encoded response, present whenever `disposition` is a reply.
    pub encoded: Option<String>,
    pub stages: Vec<StageTiming>,
}

impl DispatchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match &self.disposition {
            Disposition::Reply(response) => Some(response),
            Disposition::Dropped(_) => None,
        }
    }

    pub fn span_key(&self) -> SpanKey {
        SpanKey::new(self.request_id.as_str(), self.capability.as_str(), self.run_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Received,
    Parsed,
    Routed,
    Executed,
    Replied,
    Failed,
}

/// Per-request span bookkeeping.
struct Flight<'a> {
    trace: &'a TraceLogger,
    key: SpanKey,
    state: DispatchState,
    stages: Vec<StageTiming>,
}

impl Flight<'_> {
    fn close(&mut self, step: &str, start_ns: i64, end_ns: i64, error: Option<&str>) {
        self.close_with_extra(step, start_ns, end_ns, error, Map::new());
    }

    fn close_with_extra(
        &mut self,
        step: &str,
        start_ns: i64,
        end_ns: i64,
        error: Option<&str>,
        extra: Map<String, Value>,
    ) {
        let end_ns = end_ns.max(start_ns);
        self.trace
            .span_with_extra(&self.key, step, start_ns, end_ns, error.is_none(), error, extra);
        self.stages.push(StageTiming {
            step: step.to_string(),
            start_ns,
            end_ns,
        });
    }

    fn advance(&mut self, next: DispatchState) {
        tracing::trace!(request_id = %self.key.request_id, from = ?self.state, to = ?next, "dispatch state");
        self.state = next;
    }
}

pub struct Dispatcher {
    registry: CapabilityRegistry,
    store: Arc<ClockStore>,
    notifier: Arc<dyn UiNotifier>,
    trace: TraceLogger,
    dispatched: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        registry: CapabilityRegistry,
        store: Arc<ClockStore>,
        notifier: Arc<dyn UiNotifier>,
        trace: TraceLogger,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
            trace,
            dispatched: AtomicU64::new(0),
        }
    }

    /// Production wiring: file-backed store, JSONL trace file and a
    /// broadcast notifier the UI subscribes to.
    pub fn from_config(config: &GatewayConfig) -> Result<(Self, Arc<BroadcastNotifier>), TraceError> {
        let sink = JsonlTraceFile::open(config.trace_path(), config.trace.fsync)?;
        let trace = TraceLogger::new(Arc::new(sink), config.trace.source.as_str());
        let store = Arc::new(ClockStore::open(config.store_path()));
        let notifier = Arc::new(BroadcastNotifier::new());
        let registry = CapabilityRegistry::with_defaults(CapabilityOptions {
            clock_in_today_writes_store: config.clock_in_today_writes_store,
        });
        let dispatcher = Self::new(registry, store, notifier.clone(), trace);
        Ok((dispatcher, notifier))
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ClockStore> {
        &self.store
    }

    pub fn trace(&self) -> &TraceLogger {
        &self.trace
    }

    /// Invocations dispatched since construction.
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Run one invocation to completion. Never panics on handler faults and
    /// never fails: every error becomes a failure response or a traced drop.
    pub fn dispatch(&self, inbound: Inbound) -> DispatchOutcome {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let received_ns = monotonic_ns();
        let Inbound {
            payload,
            route,
            capability_hint,
            run_index_hint,
        } = inbound;

        let mut receive_extra = Map::new();
        receive_extra.insert("shape".to_string(), Value::from(payload.shape()));
        receive_extra.insert("reply_route".to_string(), Value::from(route.as_str()));

        // ── PARSED ──────────────────────────────────────────────────────
        let parse_start = monotonic_ns();
        let decoded = payload.decode();
        let parse_end = monotonic_ns();

        let key = match &decoded {
            Ok(request) => SpanKey::new(
                request.id.as_str(),
                request.capability_id(),
                request.run_index.or(run_index_hint).unwrap_or(UNTRACKED_RUN),
            ),
            Err(failure) => SpanKey::new(
                failure.recovered_id.clone().unwrap_or_default(),
                capability_hint
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_CAPABILITY.to_string()),
                run_index_hint.unwrap_or(UNTRACKED_RUN),
            ),
        };
        let mut flight = Flight {
            trace: &self.trace,
            key,
            state: DispatchState::Received,
            stages: Vec::new(),
        };
        flight.close_with_extra(STEP_RECEIVE, received_ns, received_ns, None, receive_extra);

        let response = match decoded {
            Ok(request) => {
                flight.close(STEP_PARSE, parse_start, parse_end, None);
                flight.advance(DispatchState::Parsed);
                self.execute(&mut flight, &request)
            }
            Err(failure) => {
                let text = failure.error.to_string();
                flight.close(STEP_PARSE, parse_start, parse_end, Some(&text));
                flight.advance(DispatchState::Failed);

                if failure.recovered_id.is_none() && route != ReplyRoute::ChannelBound {
                    tracing::warn!(
                        shape = payload.shape(),
                        route = route.as_str(),
                        "Dropping uncorrelatable request: {text}"
                    );
                    let at = monotonic_ns();
                    flight.close(STEP_PARSE_FAILED, at, at, Some(&text));
                    return self.outcome(flight, route, Disposition::Dropped(failure.error), None);
                }

                tracing::debug!(request_id = %flight.key.request_id, "Decode failed: {text}");
                Response::failure(
                    flight.key.request_id.as_str(),
                    capability_hint.unwrap_or_default(),
                    text,
                )
            }
        };

        // ── REPLIED ─────────────────────────────────────────────────────
        let encode_start = monotonic_ns();
        let (response, encoded) = match response.to_json() {
            Ok(json) => {
                flight.close(STEP_ENCODE, encode_start, monotonic_ns(), None);
                (response, json)
            }
            Err(e) => {
                let text = format!("encode failed: {e}");
                flight.close(STEP_ENCODE, encode_start, monotonic_ns(), Some(&text));
                let fallback = Response::failure(response.id.as_str(), response.capability.id.as_str(), text);
                match fallback.to_json() {
                    Ok(json) => (fallback, json),
                    Err(e) => {
                        let error = GatewayError::MalformedPayload(e.to_string());
                        let at = monotonic_ns();
                        flight.close(STEP_PARSE_FAILED, at, at, Some(&error.to_string()));
                        return self.outcome(flight, route, Disposition::Dropped(error), None);
                    }
                }
            }
        };

        let at = monotonic_ns();
        let error = (!response.is_success()).then(|| response.message.clone());
        flight.close(STEP_REPLIED, at, at, error.as_deref());
        flight.advance(DispatchState::Replied);

        tracing::debug!(
            request_id = %response.id,
            capability = %flight.key.capability,
            success = response.is_success(),
            "Dispatched"
        );
        self.outcome(flight, route, Disposition::Reply(response), Some(encoded))
    }

    /// Record the transport's delivery result as a `deliver` span.
    pub fn record_delivery(&self, outcome: &DispatchOutcome, start_ns: i64, result: &Result<(), String>) {
        let mut extra = Map::new();
        extra.insert("reply_route".to_string(), Value::from(outcome.route.as_str()));
        let error = result.as_ref().err().map(String::as_str);
        if let Some(error) = error {
            tracing::warn!(request_id = %outcome.request_id, "Reply delivery failed: {error}");
        }
        self.trace.span_with_extra(
            &outcome.span_key(),
            STEP_DELIVER,
            start_ns,
            monotonic_ns(),
            result.is_ok(),
            error,
            extra,
        );
    }

    /// ROUTED and EXECUTED. Always yields a response.
    fn execute(&self, flight: &mut Flight<'_>, request: &Request) -> Response {
        let id = request.id.as_str();
        let capability = request.capability_id();

        let route_start = monotonic_ns();
        let handler = match self.registry.resolve(capability) {
            Ok(handler) => {
                flight.close(STEP_ROUTE, route_start, monotonic_ns(), None);
                flight.advance(DispatchState::Routed);
                handler
            }
            Err(err) => {
                let text = err.to_string();
                flight.close(STEP_ROUTE, route_start, monotonic_ns(), Some(&text));
                flight.advance(DispatchState::Failed);
                tracing::info!(request_id = %id, "{text}");
                return Response::failure(id, capability, text);
            }
        };

        let handler_start = monotonic_ns();
        let result = catch_unwind(AssertUnwindSafe(|| {
            handler.handle(&request.capability.args, &self.store)
        }))
        .unwrap_or_else(|panic| Err(GatewayError::HandlerFault(panic_text(panic.as_ref()))));
        let handler_end = monotonic_ns();

        let HandlerOutput {
            message,
            output,
            notification,
        } = match result {
            Ok(output) => {
                flight.close(STEP_HANDLER, handler_start, handler_end, None);
                flight.advance(DispatchState::Executed);
                output
            }
            Err(err) => {
                let text = err.to_string();
                flight.close(STEP_HANDLER, handler_start, handler_end, Some(&text));
                flight.advance(DispatchState::Failed);
                tracing::info!(request_id = %id, capability, kind = err.kind(), "{text}");
                return Response::failure(id, capability, text);
            }
        };

        if let Some(notification) = notification {
            let notify_start = monotonic_ns();
            let result = self.notifier.notify(&notification);
            let notify_end = monotonic_ns();
            match result {
                Ok(()) => flight.close(STEP_NOTIFY, notify_start, notify_end, None),
                Err(e) => {
                    // The capability already ran; the reply still reports success.
                    let text = e.to_string();
                    tracing::warn!(request_id = %id, "UI notification failed: {text}");
                    flight.close(STEP_NOTIFY, notify_start, notify_end, Some(&text));
                }
            }
        }

        Response::success(id, capability, message, output)
    }

    fn outcome(
        &self,
        flight: Flight<'_>,
        route: ReplyRoute,
        disposition: Disposition,
        encoded: Option<String>,
    ) -> DispatchOutcome {
        let SpanKey {
            request_id,
            capability,
            run_index,
        } = flight.key;
        DispatchOutcome {
            request_id,
            capability,
            run_index,
            route,
            disposition,
            encoded,
            stages: flight.stages,
        }
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityDescriptor, CapabilityHandler};
    use crate::notify::{NoopNotifier, NotifyError, UiNotification};
    use crate::trace::MemoryTraceSink;
    use cmdgate_protocol::{Args, OutputValue, Status};
    use pretty_assertions::assert_eq;

    struct Harness {
        dispatcher: Dispatcher,
        sink: Arc<MemoryTraceSink>,
    }

    fn harness_with(registry: CapabilityRegistry, notifier: Arc<dyn UiNotifier>) -> Harness {
        let (trace, sink) = TraceLogger::in_memory("tool-app");
        Harness {
            dispatcher: Dispatcher::new(registry, Arc::new(ClockStore::in_memory()), notifier, trace),
            sink,
        }
    }

    fn harness() -> Harness {
        harness_with(
            CapabilityRegistry::with_defaults(CapabilityOptions::default()),
            Arc::new(NoopNotifier),
        )
    }

    fn envelope(raw: &str, route: ReplyRoute) -> Inbound {
        Inbound::new(RawPayload::Envelope(raw.to_string()), route)
    }

    fn steps(sink: &MemoryTraceSink, request_id: &str) -> Vec<String> {
        sink.steps_for(request_id).into_iter().map(|s| s.step).collect()
    }

    fn terminal_count(sink: &MemoryTraceSink, request_id: &str) -> usize {
        sink.steps_for(request_id)
            .iter()
            .filter(|s| s.step == STEP_REPLIED || s.step == STEP_PARSE_FAILED)
            .count()
    }

    #[test]
    fn query_on_empty_store_replies_success() {
        let h = harness();
        let outcome = h.dispatcher.dispatch(envelope(
            r#"{"id":"r1","capability":{"id":"query_clock_in","args":{"date":"2024-03-05"}}}"#,
            ReplyRoute::IdCorrelated,
        ));

        let response = outcome.response().unwrap();
        assert_eq!(
            response,
            &Response::success(
                "r1",
                "query_clock_in",
                "Hasn't clocked in.",
                vec![
                    OutputValue::string("date", "2024-03-05"),
                    OutputValue::boolean("has_clocked_in", false),
                ],
            )
        );
        assert_eq!(
            Response::from_json(outcome.encoded.as_deref().unwrap()).unwrap(),
            *response
        );
        assert_eq!(
            steps(&h.sink, "r1"),
            vec!["receive", "parse", "route", "handler", "encode", "replied"]
        );
        assert_eq!(
            outcome.stages.iter().map(|s| s.step.as_str()).collect::<Vec<_>>(),
            steps(&h.sink, "r1")
        );
    }

    #[test]
    fn every_span_is_ordered_and_shares_the_key() {
        let h = harness();
        let outcome = h.dispatcher.dispatch(Inbound::new(
            RawPayload::Flat {
                request_id: Some("cb-1".to_string()),
                command_json: Some(r#"{"capability":"make_up_clock_in","date":"2024-02-29"}"#.to_string()),
                run_index: Some(3),
            },
            ReplyRoute::IdCorrelated,
        ));
        assert!(outcome.response().unwrap().is_success());

        let spans = h.sink.steps_for("cb-1");
        assert!(spans.iter().all(|s| s.end_ns >= s.start_ns));
        assert!(spans.iter().all(|s| s.capability == "make_up_clock_in" && s.run_index == 3));
        assert!(spans.windows(2).all(|w| w[0].start_ns <= w[1].start_ns));
        assert_eq!(terminal_count(&h.sink, "cb-1"), 1);
        assert!(h.dispatcher.store().is_done("2024-02-29"));
    }

    #[test]
    fn unknown_capability_fails_without_panicking() {
        let h = harness();
        let outcome = h.dispatcher.dispatch(envelope(
            r#"{"id":"r2","capability":{"id":"bogus"}}"#,
            ReplyRoute::IdCorrelated,
        ));
        let response = outcome.response().unwrap();
        assert_eq!(response.status, Status::Failure);
        assert_eq!(response.id, "r2");
        assert!(response.message.contains("bogus"));

        let route = h
            .sink
            .steps_for("r2")
            .into_iter()
            .find(|s| s.step == STEP_ROUTE)
            .unwrap();
        assert!(!route.success);
        assert_eq!(steps(&h.sink, "r2"), vec!["receive", "parse", "route", "encode", "replied"]);
    }

    #[test]
    fn handler_errors_become_failure_messages() {
        let h = harness();
        let outcome = h.dispatcher.dispatch(envelope(
            r#"{"id":"r3","capability":{"id":"make_up_clock_in","args":{"date":"2024/01/01"}}}"#,
            ReplyRoute::IdCorrelated,
        ));
        let response = outcome.response().unwrap();
        assert!(!response.is_success());
        assert_eq!(response.message, "invalid date: 2024/01/01");
        assert_eq!(terminal_count(&h.sink, "r3"), 1);
    }

    struct Panics;

    impl CapabilityHandler for Panics {
        fn descriptor(&self) -> CapabilityDescriptor {
            CapabilityDescriptor {
                id: "explode".to_string(),
                description: String::new(),
                args: Vec::new(),
            }
        }

        fn handle(&self, _args: &Args, _store: &ClockStore) -> Result<HandlerOutput, GatewayError> {
            panic!("kaboom");
        }
    }

    #[test]
    fn handler_panic_is_contained() {
        let mut registry = CapabilityRegistry::empty();
        registry.register(Panics);
        let h = harness_with(registry, Arc::new(NoopNotifier));

        let outcome = h.dispatcher.dispatch(envelope(
            r#"{"id":"p1","capability":{"id":"explode"}}"#,
            ReplyRoute::ChannelBound,
        ));
        let response = outcome.response().unwrap();
        assert_eq!(response.message, "handler fault: kaboom");

        let handler = h
            .sink
            .steps_for("p1")
            .into_iter()
            .find(|s| s.step == STEP_HANDLER)
            .unwrap();
        assert!(!handler.success);
        assert_eq!(handler.error.as_deref(), Some("handler fault: kaboom"));
    }

    #[test]
    fn uncorrelatable_request_is_dropped_off_channel() {
        let h = harness();
        let outcome = h.dispatcher.dispatch(envelope("{garbage", ReplyRoute::IdCorrelated));

        assert!(outcome.encoded.is_none());
        assert!(matches!(
            outcome.disposition,
            Disposition::Dropped(GatewayError::MalformedPayload(_))
        ));
        assert_eq!(steps(&h.sink, ""), vec!["receive", "parse", "parse_failed"]);
    }

    #[test]
    fn channel_bound_gets_anonymous_failure() {
        let h = harness();
        let outcome = h.dispatcher.dispatch(
            envelope(r#"{"id":"","capability":{"id":"clock_in_today"}}"#, ReplyRoute::ChannelBound)
                .with_hints(Some("clock_in_today".to_string()), Some(7)),
        );

        let response = outcome.response().unwrap();
        assert_eq!(response.id, "");
        assert_eq!(response.message, "missing request id");
        assert_eq!(response.capability.id, "clock_in_today");
        assert_eq!(outcome.run_index, 7);
        assert_eq!(terminal_count(&h.sink, ""), 1);
    }

    #[test]
    fn malformed_with_recoverable_id_still_replies() {
        let h = harness();
        let outcome = h
            .dispatcher
            .dispatch(envelope(r#"{"id":"m1","capability":42}"#, ReplyRoute::IdCorrelated));
        let response = outcome.response().unwrap();
        assert_eq!(response.id, "m1");
        assert!(response.message.starts_with("malformed payload"));
        assert_eq!(steps(&h.sink, "m1"), vec!["receive", "parse", "encode", "replied"]);
    }

    struct FailingNotifier;

    impl UiNotifier for FailingNotifier {
        fn notify_primary_action(&self) -> Result<(), NotifyError> {
            Err(NotifyError::Closed)
        }

        fn notify_backfill_done(&self, _date: &str) -> Result<(), NotifyError> {
            Err(NotifyError::Closed)
        }
    }

    #[test]
    fn notifier_failure_does_not_fail_the_reply() {
        let h = harness_with(
            CapabilityRegistry::with_defaults(CapabilityOptions::default()),
            Arc::new(FailingNotifier),
        );
        let outcome = h.dispatcher.dispatch(Inbound::new(
            RawPayload::Signal {
                request_id: "s1".to_string(),
                capability: "clock_in_today".to_string(),
            },
            ReplyRoute::Discarded,
        ));
        assert!(outcome.response().unwrap().is_success());

        let notify = h
            .sink
            .steps_for("s1")
            .into_iter()
            .find(|s| s.step == STEP_NOTIFY)
            .unwrap();
        assert!(!notify.success);
    }

    #[test]
    fn broadcast_notifier_sees_backfill() {
        let notifier = Arc::new(BroadcastNotifier::new());
        let mut rx = notifier.subscribe();
        let h = harness_with(
            CapabilityRegistry::with_defaults(CapabilityOptions::default()),
            notifier,
        );
        h.dispatcher.dispatch(envelope(
            r#"{"id":"b1","capability":{"id":"make_up_clock_in","args":{"date":"2024-01-02"}}}"#,
            ReplyRoute::IdCorrelated,
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            UiNotification::BackfillDone {
                date: "2024-01-02".to_string()
            }
        );
    }

    #[test]
    fn delivery_is_traced_after_the_terminal_mark() {
        let h = harness();
        let outcome = h.dispatcher.dispatch(envelope(
            r#"{"id":"d1","capability":{"id":"clock_in_today"}}"#,
            ReplyRoute::IdCorrelated,
        ));
        let start = monotonic_ns();
        h.dispatcher
            .record_delivery(&outcome, start, &Err("handle invalidated".to_string()));

        let spans = h.sink.steps_for("d1");
        let deliver = spans.last().unwrap();
        assert_eq!(deliver.step, STEP_DELIVER);
        assert!(!deliver.success);
        assert_eq!(deliver.extra.get("reply_route"), Some(&Value::from("id_correlated")));
        assert_eq!(h.dispatcher.dispatched_count(), 1);
    }
}
