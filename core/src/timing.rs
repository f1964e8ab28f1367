//! Clock sources for trace spans.
//!
//! Span bounds come from the system-wide monotonic clock so spans written
//! by the client process and by the gateway process share one timeline.
//! Wall time is recorded alongside for humans.

use std::sync::OnceLock;
use std::time::Instant;

/// Nanoseconds on the monotonic clock.
#[cfg(unix)]
pub fn monotonic_ns() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return process_relative_ns();
    }
    (ts.tv_sec as i64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as i64)
}

#[cfg(not(unix))]
pub fn monotonic_ns() -> i64 {
    process_relative_ns()
}

/// Nanoseconds since the first call in this process.
fn process_relative_ns() -> i64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(Instant::now);
    i64::try_from(anchor.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

/// Milliseconds since the Unix epoch.
pub fn wall_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Start point of a span that is closed later.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start_ns: i64,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            start_ns: monotonic_ns(),
        }
    }

    pub fn start_ns(&self) -> i64 {
        self.start_ns
    }

    /// Returns `(start_ns, end_ns)` with `end_ns >= start_ns`.
    pub fn stop(&self) -> (i64, i64) {
        (self.start_ns, monotonic_ns().max(self.start_ns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_never_goes_backwards() {
        let mut last = monotonic_ns();
        for _ in 0..1_000 {
            let now = monotonic_ns();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn stopwatch_bounds_are_ordered() {
        let watch = Stopwatch::start();
        let (start, end) = watch.stop();
        assert_eq!(start, watch.start_ns());
        assert!(end >= start);
    }
}
