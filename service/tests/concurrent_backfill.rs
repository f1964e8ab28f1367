#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Many callers backfilling at once against the file-backed store and trace.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use cmdgate_core::analysis::TraceDump;
use cmdgate_core::{ClockStore, ConfigLoader, Dispatcher};
use cmdgate_protocol::TraceRecord;
use cmdgate_service::bindings::SyncCallBinding;
use pretty_assertions::assert_eq;
use tokio::runtime::Handle;

const DATES: u64 = 50;
const CALLERS: u64 = 8;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifty_dates_from_eight_callers() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let mut config = ConfigLoader::new().skip_file_layer().skip_env_layer().load().unwrap();
    config.data_dir = temp_dir.path().to_path_buf();

    let (dispatcher, _notifier) = Dispatcher::from_config(&config).unwrap();
    let binding = Arc::new(SyncCallBinding::new(
        Arc::new(dispatcher),
        Handle::current(),
        Duration::from_secs(10),
    ));

    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let dates: Vec<String> = (0..DATES)
        .map(|i| ClockStore::format_date(start.checked_add_days(Days::new(i)).unwrap()))
        .collect();

    let mut callers = Vec::new();
    for caller in 0..CALLERS {
        let binding = Arc::clone(&binding);
        let mine: Vec<String> = dates
            .iter()
            .skip(caller as usize)
            .step_by(CALLERS as usize)
            .cloned()
            .collect();
        callers.push(tokio::task::spawn_blocking(move || {
            for date in mine {
                let envelope = serde_json::json!({
                    "id": format!("bf-{date}"),
                    "capability": {"id": "make_up_clock_in", "args": {"date": date}},
                    "run_index": caller
                });
                let response = binding.call_json(&envelope.to_string());
                assert!(response.is_success(), "{}: {}", response.id, response.message);
                assert_eq!(response.id, format!("bf-{date}"));
            }
        }));
    }
    for caller in callers {
        caller.await.unwrap();
    }

    // Every date is marked, in memory and on disk.
    let reopened = ClockStore::open(config.store_path());
    assert_eq!(reopened.marked_dates().len(), DATES as usize);
    assert!(dates.iter().all(|d| reopened.is_done(d)));

    // Give the last deliver spans a moment to land, then check every line.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let contents = std::fs::read_to_string(config.trace_path()).unwrap();
    for line in contents.lines() {
        serde_json::from_str::<TraceRecord>(line)
            .unwrap_or_else(|e| panic!("unparsable trace line: {e}\n{line}"));
    }

    let dump = TraceDump::parse(&contents);
    assert_eq!(dump.unparsable, 0);
    for date in &dates {
        let spans = dump.waterfall(&format!("bf-{date}"));
        let terminal = spans.iter().filter(|s| s.step == "replied").count();
        assert_eq!(terminal, 1, "{date}");
        assert!(spans.iter().all(|s| s.end_ns >= s.start_ns));
    }
}
