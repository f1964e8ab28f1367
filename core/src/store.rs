//! Persistent per-day clock-in ledger.
//!
//! ## Layout
//!
//! ```text
//! <data_dir>/clock_log.json   { "2024-03-05": true, ... }
//! ```
//!
//! The file is loaded lazily on first access and rewritten atomically
//! (temporary sibling + rename) on every state change. A missing date is
//! the same as `false`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{Datelike, Days, Local, NaiveDate};

/// Default file name of the ledger inside the data directory.
pub const CLOCK_LOG_FILENAME: &str = "clock_log.json";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors from the clock store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

type Ledger = BTreeMap<NaiveDate, bool>;

/// Date → done ledger, shared across dispatch threads.
pub struct ClockStore {
    path: Option<PathBuf>,
    ledger: OnceLock<RwLock<Ledger>>,
}

impl ClockStore {
    /// File-backed store. Nothing is read until the first access.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ledger: OnceLock::new(),
        }
    }

    /// Store with the default file name inside `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::open(data_dir.join(CLOCK_LOG_FILENAME))
    }

    /// Volatile store for tests and fakes.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            ledger: OnceLock::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Parse a strict `YYYY-MM-DD` date.
    pub fn parse_date(raw: &str) -> Result<NaiveDate, StoreError> {
        // chrono accepts signs, spaces and unpadded fields; the ledger
        // format does not.
        let bytes = raw.as_bytes();
        let canonical = bytes.len() == 10
            && bytes.iter().enumerate().all(|(i, b)| match i {
                4 | 7 => *b == b'-',
                _ => b.is_ascii_digit(),
            });
        if !canonical {
            return Err(StoreError::InvalidDate(raw.to_string()));
        }
        NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map_err(|_| StoreError::InvalidDate(raw.to_string()))
    }

    pub fn format_date(date: NaiveDate) -> String {
        date.format(DATE_FORMAT).to_string()
    }

    /// Today's date in local time.
    pub fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    // ── Mutations ───────────────────────────────────────────────────────

    /// Clear every entry. Persistence faults are logged, never returned.
    pub fn reset(&self) {
        let mut ledger = self.write();
        ledger.clear();
        if let Err(e) = self.persist(&ledger) {
            tracing::warn!("Clock store reset could not be persisted: {e}");
        }
    }

    /// Mark `date` (`YYYY-MM-DD`) as done. Marking twice is a no-op.
    pub fn mark_done(&self, date: &str) -> Result<(), StoreError> {
        let date = Self::parse_date(date)?;
        self.mark_done_on(date)
    }

    pub fn mark_done_on(&self, date: NaiveDate) -> Result<(), StoreError> {
        let mut ledger = self.write();
        if ledger.get(&date).copied().unwrap_or(false) {
            return Ok(());
        }
        // The in-memory entry only lands once the file agrees.
        let mut updated = ledger.clone();
        updated.insert(date, true);
        self.persist(&updated)?;
        *ledger = updated;
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// `false` for unset and unparsable dates.
    pub fn is_done(&self, date: &str) -> bool {
        Self::parse_date(date)
            .map(|d| self.is_done_on(d))
            .unwrap_or(false)
    }

    pub fn is_done_on(&self, date: NaiveDate) -> bool {
        self.read().get(&date).copied().unwrap_or(false)
    }

    /// One entry per day of the month, keyed `1..=last_day`.
    pub fn month_view(&self, year: i32, month: u32) -> Result<BTreeMap<u32, bool>, StoreError> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| StoreError::InvalidDate(format!("{year:04}-{month:02}")))?;
        let ledger = self.read();
        let view = first
            .iter_days()
            .take_while(|d| d.month() == month)
            .map(|d| (d.day(), ledger.get(&d).copied().unwrap_or(false)))
            .collect();
        Ok(view)
    }

    /// Consecutive done days ending at `as_of`, counting backwards.
    pub fn consecutive_streak(&self, as_of: NaiveDate) -> u32 {
        let ledger = self.read();
        let mut count = 0;
        let mut day = Some(as_of);
        while let Some(d) = day {
            if !ledger.get(&d).copied().unwrap_or(false) {
                break;
            }
            count += 1;
            day = d.checked_sub_days(Days::new(1));
        }
        count
    }

    /// Streak ending today.
    pub fn current_streak(&self) -> u32 {
        self.consecutive_streak(Self::today())
    }

    /// Marked dates in ascending order.
    pub fn marked_dates(&self) -> Vec<NaiveDate> {
        self.read()
            .iter()
            .filter(|(_, done)| **done)
            .map(|(date, _)| *date)
            .collect()
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn ledger(&self) -> &RwLock<Ledger> {
        self.ledger
            .get_or_init(|| RwLock::new(self.load().unwrap_or_default()))
    }

    fn read(&self) -> RwLockReadGuard<'_, Ledger> {
        self.ledger()
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Ledger> {
        self.ledger()
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn load(&self) -> Option<Ledger> {
        let path = self.path.as_ref()?;
        let contents = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Clock store at {} unreadable, starting empty: {e}", path.display());
                return None;
            }
        };

        let raw: BTreeMap<String, bool> = match serde_json::from_str(&contents) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Clock store at {} is corrupt, starting empty: {e}", path.display());
                return None;
            }
        };

        let mut ledger = Ledger::new();
        for (key, done) in raw {
            match Self::parse_date(&key) {
                Ok(date) => {
                    ledger.insert(date, done);
                }
                Err(_) => tracing::debug!("Skipping unparsable ledger key {key:?}"),
            }
        }
        tracing::debug!("Loaded {} clock entries from {}", ledger.len(), path.display());
        Some(ledger)
    }

    /// Atomically write the ledger via a `.tmp` sibling. Called with the
    /// write lock held so concurrent writers never race on the rename.
    fn persist(&self, ledger: &Ledger) -> Result<(), StoreError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let raw: BTreeMap<String, bool> = ledger
            .iter()
            .map(|(date, done)| (Self::format_date(*date), *done))
            .collect();
        let json = serde_json::to_string_pretty(&raw)?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json.as_bytes())?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
