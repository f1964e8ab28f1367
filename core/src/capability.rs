//! Capability handlers and the registry that routes to them.

use std::collections::BTreeMap;
use std::sync::Arc;

use cmdgate_protocol::capabilities::{ARG_DATE, CLOCK_IN_TODAY, MAKE_UP_CLOCK_IN, QUERY_CLOCK_IN};
use cmdgate_protocol::{Args, GatewayError, OutputValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::notify::UiNotification;
use crate::store::{ClockStore, StoreError};

/// Result of a successful handler run. The dispatcher turns it into a
/// success response and fires `notification`, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput {
    pub message: String,
    pub output: Vec<OutputValue>,
    pub notification: Option<UiNotification>,
}

impl HandlerOutput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            output: Vec::new(),
            notification: None,
        }
    }

    pub fn with_output(mut self, value: OutputValue) -> Self {
        self.output.push(value);
        self
    }

    pub fn with_notification(mut self, notification: UiNotification) -> Self {
        self.notification = Some(notification);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
    pub description: String,
}

/// Self-description returned by capability discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
}

pub trait CapabilityHandler: Send + Sync {
    fn descriptor(&self) -> CapabilityDescriptor;

    fn handle(&self, args: &Args, store: &ClockStore) -> Result<HandlerOutput, GatewayError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityOptions {
    /// Whether `clock_in_today` also marks today in the store. Off by
    /// default: the UI records the click itself.
    pub clock_in_today_writes_store: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    handlers: BTreeMap<String, Arc<dyn CapabilityHandler>>,
}

impl CapabilityRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the three built-in capabilities.
    pub fn with_defaults(options: CapabilityOptions) -> Self {
        let mut registry = Self::empty();
        registry.register(ClockInToday {
            writes_store: options.clock_in_today_writes_store,
        });
        registry.register(QueryClockIn);
        registry.register(MakeUpClockIn);
        registry
    }

    /// Register (or replace) a handler under its descriptor id.
    pub fn register(&mut self, handler: impl CapabilityHandler + 'static) {
        let id = handler.descriptor().id;
        if self.handlers.insert(id.clone(), Arc::new(handler)).is_some() {
            tracing::debug!(capability = %id, "Replaced capability handler");
        }
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<dyn CapabilityHandler>, GatewayError> {
        self.handlers
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownCapability(id.to_string()))
    }

    /// Descriptors sorted by id.
    pub fn describe(&self) -> Vec<CapabilityDescriptor> {
        self.handlers.values().map(|h| h.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in handlers
// ─────────────────────────────────────────────────────────────────────────────

fn date_arg_spec(description: &str) -> ArgSpec {
    ArgSpec {
        name: ARG_DATE.to_string(),
        kind: "string".to_string(),
        required: true,
        description: description.to_string(),
    }
}

/// Required `date` argument. Absent, null and empty are "missing"; any
/// other non-string value is an invalid date.
fn required_date(args: &Args) -> Result<&str, GatewayError> {
    match args.get(ARG_DATE) {
        None | Some(Value::Null) => Err(GatewayError::MissingArgument(ARG_DATE.to_string())),
        Some(Value::String(s)) if s.is_empty() => {
            Err(GatewayError::MissingArgument(ARG_DATE.to_string()))
        }
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(GatewayError::InvalidDate(other.to_string())),
    }
}

fn store_fault(err: StoreError) -> GatewayError {
    match err {
        StoreError::InvalidDate(date) => GatewayError::InvalidDate(date),
        other => GatewayError::HandlerFault(other.to_string()),
    }
}

struct ClockInToday {
    writes_store: bool,
}

impl CapabilityHandler for ClockInToday {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            id: CLOCK_IN_TODAY.to_string(),
            description: "Trigger today's clock-in in the UI".to_string(),
            args: Vec::new(),
        }
    }

    fn handle(&self, _args: &Args, store: &ClockStore) -> Result<HandlerOutput, GatewayError> {
        if self.writes_store {
            store
                .mark_done_on(ClockStore::today())
                .map_err(store_fault)?;
        }
        Ok(HandlerOutput::new("Clock in successfully!")
            .with_notification(UiNotification::PrimaryAction))
    }
}

struct QueryClockIn;

impl CapabilityHandler for QueryClockIn {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            id: QUERY_CLOCK_IN.to_string(),
            description: "Report whether a date has been clocked in".to_string(),
            args: vec![date_arg_spec("Date to query, YYYY-MM-DD")],
        }
    }

    fn handle(&self, args: &Args, store: &ClockStore) -> Result<HandlerOutput, GatewayError> {
        let date = required_date(args)?;
        let done = store.is_done(date);
        let message = if done {
            "Has clocked in."
        } else {
            "Hasn't clocked in."
        };
        Ok(HandlerOutput::new(message)
            .with_output(OutputValue::string(ARG_DATE, date))
            .with_output(OutputValue::boolean("has_clocked_in", done)))
    }
}

struct MakeUpClockIn;

impl CapabilityHandler for MakeUpClockIn {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            id: MAKE_UP_CLOCK_IN.to_string(),
            description: "Backfill a missed clock-in".to_string(),
            args: vec![date_arg_spec("Date to backfill, YYYY-MM-DD")],
        }
    }

    fn handle(&self, args: &Args, store: &ClockStore) -> Result<HandlerOutput, GatewayError> {
        let date = required_date(args)?;
        store.mark_done(date).map_err(store_fault)?;
        Ok(HandlerOutput::new(format!("Make up clock-in successful for {date}"))
            .with_output(OutputValue::string(ARG_DATE, date))
            .with_output(OutputValue::boolean("success", true))
            .with_notification(UiNotification::BackfillDone {
                date: date.to_string(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn args(value: Value) -> Args {
        match value {
            Value::Object(map) => map,
            _ => panic!("args must be an object"),
        }
    }

    fn run(id: &str, raw: Value, store: &ClockStore) -> Result<HandlerOutput, GatewayError> {
        let registry = CapabilityRegistry::with_defaults(CapabilityOptions::default());
        registry.resolve(id)?.handle(&args(raw), store)
    }

    #[test]
    fn query_on_empty_store() {
        let store = ClockStore::in_memory();
        let out = run(QUERY_CLOCK_IN, json!({"date": "2024-03-05"}), &store).unwrap();
        assert_eq!(out.message, "Hasn't clocked in.");
        assert_eq!(
            out.output,
            vec![
                OutputValue::string("date", "2024-03-05"),
                OutputValue::boolean("has_clocked_in", false),
            ]
        );
        assert_eq!(out.notification, None);
    }

    #[test]
    fn query_argument_errors() {
        let store = ClockStore::in_memory();
        for raw in [json!({}), json!({"date": null}), json!({"date": ""})] {
            assert_eq!(
                run(QUERY_CLOCK_IN, raw, &store).unwrap_err(),
                GatewayError::MissingArgument("date".to_string())
            );
        }
        assert!(matches!(
            run(QUERY_CLOCK_IN, json!({"date": 20240305}), &store).unwrap_err(),
            GatewayError::InvalidDate(_)
        ));
    }

    #[test]
    fn make_up_marks_and_notifies() {
        let store = ClockStore::in_memory();
        let out = run(MAKE_UP_CLOCK_IN, json!({"date": "2024-02-29"}), &store).unwrap();
        assert_eq!(out.message, "Make up clock-in successful for 2024-02-29");
        assert_eq!(out.output[1], OutputValue::boolean("success", true));
        assert_eq!(
            out.notification,
            Some(UiNotification::BackfillDone {
                date: "2024-02-29".to_string()
            })
        );
        assert!(store.is_done("2024-02-29"));

        let query = run(QUERY_CLOCK_IN, json!({"date": "2024-02-29"}), &store).unwrap();
        assert_eq!(query.message, "Has clocked in.");
    }

    #[test]
    fn make_up_rejects_bad_date_without_writing() {
        let store = ClockStore::in_memory();
        assert_eq!(
            run(MAKE_UP_CLOCK_IN, json!({"date": "2024-13-01"}), &store).unwrap_err(),
            GatewayError::InvalidDate("2024-13-01".to_string())
        );
        assert!(store.marked_dates().is_empty());
    }

    #[test]
    fn clock_in_today_leaves_store_alone_by_default() {
        let store = ClockStore::in_memory();
        let out = run(CLOCK_IN_TODAY, json!({}), &store).unwrap();
        assert_eq!(out.message, "Clock in successfully!");
        assert_eq!(out.notification, Some(UiNotification::PrimaryAction));
        assert!(store.marked_dates().is_empty());
    }

    #[test]
    fn clock_in_today_can_write_store() {
        let store = ClockStore::in_memory();
        let registry = CapabilityRegistry::with_defaults(CapabilityOptions {
            clock_in_today_writes_store: true,
        });
        registry
            .resolve(CLOCK_IN_TODAY)
            .unwrap()
            .handle(&Args::new(), &store)
            .unwrap();
        assert!(store.is_done_on(ClockStore::today()));
    }

    #[test]
    fn unknown_capability_is_reported() {
        let registry = CapabilityRegistry::with_defaults(CapabilityOptions::default());
        let err = registry.resolve("bogus").err().unwrap();
        assert_eq!(err, GatewayError::UnknownCapability("bogus".to_string()));
    }

    #[test]
    fn describe_is_sorted_by_id() {
        let registry = CapabilityRegistry::with_defaults(CapabilityOptions::default());
        let ids: Vec<_> = registry.describe().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["clock_in_today", "make_up_clock_in", "query_clock_in"]);
    }
}
