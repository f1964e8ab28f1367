#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Each transport binding against an in-memory gateway.

use std::sync::Arc;
use std::time::Duration;

use cmdgate_core::capability::CapabilityDescriptor;
use cmdgate_core::{
    BroadcastNotifier, CapabilityHandler, CapabilityOptions, CapabilityRegistry, ClockStore,
    Dispatcher, HandlerOutput, MemoryTraceSink, TraceLogger, UiNotification, UiNotifier,
};
use cmdgate_protocol::{Args, GatewayError, RawPayload, Response, TraceSpan};
use cmdgate_service::bindings::{
    CallbackBinding, CallbackReply, CommandExtras, Message, MessengerBinding, PendingCallback,
    ReplyChannel, SignalBinding, SyncCallBinding,
};
use cmdgate_service::bus::ResultBus;
use pretty_assertions::assert_eq;
use tokio::runtime::Handle;

/// Sleeps before answering, to outlast short sync-call timeouts.
struct Slow(Duration);

impl CapabilityHandler for Slow {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            id: "slow".to_string(),
            description: "sleeps".to_string(),
            args: Vec::new(),
        }
    }

    fn handle(&self, _args: &Args, _store: &ClockStore) -> Result<HandlerOutput, GatewayError> {
        std::thread::sleep(self.0);
        Ok(HandlerOutput::new("finally"))
    }
}

struct Fixture {
    dispatcher: Arc<Dispatcher>,
    sink: Arc<MemoryTraceSink>,
    notifier: Arc<BroadcastNotifier>,
}

fn fixture() -> Fixture {
    let mut registry = CapabilityRegistry::with_defaults(CapabilityOptions::default());
    registry.register(Slow(Duration::from_millis(300)));
    let (trace, sink) = TraceLogger::in_memory("tool-app");
    let notifier = Arc::new(BroadcastNotifier::new());
    let dispatcher = Dispatcher::new(
        registry,
        Arc::new(ClockStore::in_memory()),
        Arc::clone(&notifier) as Arc<dyn UiNotifier>,
        trace,
    );
    Fixture {
        dispatcher: Arc::new(dispatcher),
        sink,
        notifier,
    }
}

/// Wait until the request's `deliver` span has been written.
async fn deliver_span(sink: &MemoryTraceSink, request_id: &str) -> TraceSpan {
    for _ in 0..200 {
        if let Some(span) = sink
            .steps_for(request_id)
            .into_iter()
            .find(|s| s.step == "deliver")
        {
            return span;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no deliver span for {request_id}");
}

// ─────────────────────────────────────────────────────────────────────────────
// One-way signal
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn signal_triggers_notification_and_is_traced() {
    let fx = fixture();
    let mut ui = fx.notifier.subscribe();
    let binding = SignalBinding::new(Arc::clone(&fx.dispatcher), Handle::current());

    let fired = binding.fire("clock_in_today");
    fired.task.await.unwrap();

    assert_eq!(ui.try_recv().unwrap(), UiNotification::PrimaryAction);
    let steps: Vec<_> = fx
        .sink
        .steps_for(&fired.request_id)
        .into_iter()
        .map(|s| s.step)
        .collect();
    assert_eq!(
        steps,
        vec!["receive", "parse", "route", "handler", "notify", "encode", "replied", "deliver"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn signal_ids_are_unique() {
    let fx = fixture();
    let binding = SignalBinding::new(Arc::clone(&fx.dispatcher), Handle::current());
    let a = binding.fire("clock_in_today");
    let b = binding.fire("clock_in_today");
    assert_ne!(a.request_id, b.request_id);
    a.task.await.unwrap();
    b.task.await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Extras + callback
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn callback_replies_are_demultiplexed_by_request_id() {
    let fx = fixture();
    let binding = CallbackBinding::new(Arc::clone(&fx.dispatcher), Handle::current());
    let (handle, mut replies) = PendingCallback::channel(8);

    let bus: Arc<ResultBus<CallbackReply>> = Arc::new(ResultBus::new());
    let forward = Arc::clone(&bus);
    tokio::spawn(async move {
        while let Some(reply) = replies.recv().await {
            let id = reply.request_id.clone();
            forward.deliver(&id, reply);
        }
    });

    let dates = ["2024-01-01", "2024-01-02", "2024-01-03"];
    let mut waiters = Vec::new();
    for (i, date) in dates.iter().enumerate() {
        let request_id = format!("cb-{i}");
        waiters.push((date, bus.register(request_id.as_str())));
        let command = serde_json::json!({"capability": "make_up_clock_in", "date": date}).to_string();
        binding.start(
            CommandExtras::new(request_id, command)
                .with_callback(handle.clone())
                .with_trace("make_up_clock_in", i as i64),
        );
    }

    for (i, (date, waiter)) in waiters.into_iter().enumerate() {
        let reply = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.request_id, format!("cb-{i}"));
        assert_eq!(reply.run_index, i as i64);

        let response = Response::from_json(&reply.result_json).unwrap();
        assert!(response.is_success());
        assert_eq!(response.message, format!("Make up clock-in successful for {date}"));

        let stages: Vec<_> = reply.stage_ns.iter().map(|s| s.step.as_str()).collect();
        assert_eq!(stages.first(), Some(&"receive"));
        assert_eq!(stages.last(), Some(&"replied"));
        assert!(reply.stage_ns.iter().all(|s| s.end_ns >= s.start_ns));
    }
    assert!(dates.iter().all(|d| fx.dispatcher.store().is_done(d)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_callback_is_a_traced_delivery_fault() {
    let fx = fixture();
    let binding = CallbackBinding::new(Arc::clone(&fx.dispatcher), Handle::current());
    let (handle, mut replies) = PendingCallback::channel(1);
    handle.cancel();

    binding
        .start(
            CommandExtras::new("gone-1", r#"{"capability":"clock_in_today"}"#)
                .with_callback(handle),
        )
        .await
        .unwrap();

    let deliver = deliver_span(&fx.sink, "gone-1").await;
    assert!(!deliver.success);
    assert_eq!(
        deliver.error.as_deref(),
        Some("reply delivery failed: callback handle invalidated")
    );
    assert!(replies.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_callback_receiver_invalidates_the_handle() {
    let fx = fixture();
    let binding = CallbackBinding::new(Arc::clone(&fx.dispatcher), Handle::current());
    let (handle, replies) = PendingCallback::channel(1);
    drop(replies);
    assert!(!handle.is_cancelled());

    binding
        .start(
            CommandExtras::new("orphan-1", r#"{"capability":"query_clock_in","date":"2024-03-05"}"#)
                .with_callback(handle),
        )
        .await
        .unwrap();

    let deliver = deliver_span(&fx.sink, "orphan-1").await;
    assert!(!deliver.success);
    assert_eq!(
        deliver.error.as_deref(),
        Some("reply delivery failed: callback handle invalidated")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn callback_without_request_id_is_dropped() {
    let fx = fixture();
    let binding = CallbackBinding::new(Arc::clone(&fx.dispatcher), Handle::current());
    let (handle, mut replies) = PendingCallback::channel(1);

    binding
        .start(CommandExtras {
            command_json: Some(r#"{"capability":"clock_in_today"}"#.to_string()),
            callback: Some(handle),
            trace_capability: Some("clock_in_today".to_string()),
            ..CommandExtras::default()
        })
        .await
        .unwrap();

    assert!(replies.try_recv().is_err());
    let steps: Vec<_> = fx.sink.steps_for("").into_iter().map(|s| s.step).collect();
    assert_eq!(steps, vec!["receive", "parse", "parse_failed"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Synchronous call
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sync_call_returns_the_response() {
    let fx = fixture();
    let binding = SyncCallBinding::new(Arc::clone(&fx.dispatcher), Handle::current(), Duration::from_secs(5));

    let response = tokio::task::spawn_blocking(move || {
        binding.call_json(r#"{"id":"s1","capability":{"id":"query_clock_in","args":{"date":"2024-03-05"}}}"#)
    })
    .await
    .unwrap();

    assert_eq!(response.id, "s1");
    assert_eq!(response.message, "Hasn't clocked in.");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sync_call_times_out_with_the_request_id() {
    let fx = fixture();
    let binding = SyncCallBinding::new(
        Arc::clone(&fx.dispatcher),
        Handle::current(),
        Duration::from_millis(30),
    );

    let response = tokio::task::spawn_blocking(move || {
        binding.call(RawPayload::Envelope(
            r#"{"id":"late-1","capability":{"id":"slow"}}"#.to_string(),
        ))
    })
    .await
    .unwrap();

    assert_eq!(response.id, "late-1");
    assert!(!response.is_success());
    assert!(response.message.starts_with("gateway unavailable"), "{}", response.message);

    // The handler finishes later; its reply has nowhere to go.
    let deliver = deliver_span(&fx.sink, "late-1").await;
    assert!(!deliver.success);
    assert_eq!(
        deliver.error.as_deref(),
        Some("reply delivery failed: reply channel closed")
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Messenger
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn messenger_replies_on_the_supplied_channel() {
    let fx = fixture();
    let (messenger, _task) = MessengerBinding::spawn(Arc::clone(&fx.dispatcher), 8);
    let (reply_to, mut replies) = ReplyChannel::new(4);

    messenger
        .send(
            Message::new(r#"{"id":"m1","capability":{"id":"make_up_clock_in","args":{"date":"2024-02-29"}}}"#)
                .with_reply_to(reply_to),
        )
        .await
        .unwrap();

    let raw = tokio::time::timeout(Duration::from_secs(5), replies.recv())
        .await
        .unwrap()
        .unwrap();
    let response = Response::from_json(&raw).unwrap();
    assert_eq!(response.id, "m1");
    assert!(response.is_success());
    assert!(fx.dispatcher.store().is_done("2024-02-29"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn messenger_swallows_closed_reply_channels() {
    let fx = fixture();
    let (messenger, _task) = MessengerBinding::spawn(Arc::clone(&fx.dispatcher), 8);
    let (reply_to, replies) = ReplyChannel::new(1);
    drop(replies);

    messenger
        .send(Message::new(r#"{"id":"m2","capability":{"id":"clock_in_today"}}"#).with_reply_to(reply_to))
        .await
        .unwrap();

    let deliver = deliver_span(&fx.sink, "m2").await;
    assert!(!deliver.success);
    assert_eq!(deliver.error.as_deref(), Some("reply delivery failed: reply channel closed"));

    // The inbox keeps serving after the failure.
    let (reply_to, mut replies) = ReplyChannel::new(1);
    messenger
        .send(Message::new(r#"{"id":"m3","capability":{"id":"clock_in_today"}}"#).with_reply_to(reply_to))
        .await
        .unwrap();
    let raw = tokio::time::timeout(Duration::from_secs(5), replies.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(raw.contains(r#""id":"m3""#));
}
