//! Local clock store inspection.
//!
//! Reads the ledger file directly, so it works while the gateway is down.
//! `reset` and `mark` write the file; a running gateway only notices after
//! a restart, so prefer `cmdgate reset store` against a live one.

use std::path::PathBuf;

use anyhow::{Result, bail};
use chrono::{Datelike, NaiveDate, Weekday};
use clap::{Parser, Subcommand};
use cmdgate_core::{ClockStore, GatewayConfig};

#[derive(Debug, Parser)]
pub struct StoreCli {
    /// Ledger file (defaults to clock_log.json in the data dir).
    #[arg(long = "file", global = true)]
    pub file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: StoreSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum StoreSubcommand {
    /// Calendar of one month (defaults to the current one).
    Month(MonthArgs),
    /// Consecutive clocked-in days ending at a date.
    Streak(StreakArgs),
    /// Every clocked-in date.
    List(ListArgs),
    /// Mark a date as clocked in.
    Mark(MarkArgs),
    /// Forget every clock-in.
    Reset(ResetArgs),
}

#[derive(Debug, Parser)]
pub struct MonthArgs {
    #[arg(long = "year")]
    pub year: Option<i32>,

    #[arg(long = "month")]
    pub month: Option<u32>,

    /// Output as JSON.
    #[arg(long = "json", short = 'j')]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct StreakArgs {
    /// Last day of the streak, YYYY-MM-DD (defaults to today).
    #[arg(long = "as-of")]
    pub as_of: Option<String>,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Output as JSON.
    #[arg(long = "json", short = 'j')]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct MarkArgs {
    /// Date to mark, YYYY-MM-DD.
    pub date: String,
}

#[derive(Debug, Parser)]
pub struct ResetArgs {
    /// Required; the ledger cannot be recovered afterwards.
    #[arg(long = "yes")]
    pub yes: bool,
}

impl StoreCli {
    pub fn run(&self, config: &GatewayConfig) -> Result<()> {
        let store = ClockStore::open(self.file.clone().unwrap_or_else(|| config.store_path()));
        match &self.command {
            StoreSubcommand::Month(args) => cmd_month(&store, args),
            StoreSubcommand::Streak(args) => cmd_streak(&store, args),
            StoreSubcommand::List(args) => cmd_list(&store, args),
            StoreSubcommand::Mark(args) => {
                store.mark_done(&args.date)?;
                println!("Marked {}", args.date);
                Ok(())
            }
            StoreSubcommand::Reset(args) => {
                if !args.yes {
                    bail!("Refusing to reset the clock store without --yes");
                }
                store.reset();
                println!("Clock store reset");
                Ok(())
            }
        }
    }
}

/// Monday-first calendar grid. Clocked-in days carry a `*`.
pub fn render_month(store: &ClockStore, year: i32, month: u32) -> Result<Vec<String>> {
    let view = store.month_view(year, month)?;
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        bail!("invalid month {year:04}-{month:02}");
    };
    let done = view.values().filter(|d| **d).count();

    let mut lines = vec![
        format!("{year:04}-{month:02}  {done}/{} days", view.len()),
        " Mo  Tu  We  Th  Fr  Sa  Su".to_string(),
    ];
    let lead = first.weekday().num_days_from_monday() as usize;
    let mut row = "    ".repeat(lead);
    for (day, clocked_in) in &view {
        let mark = if *clocked_in { '*' } else { ' ' };
        row.push_str(&format!(" {day:>2}{mark}"));
        if first.with_day(*day).map(|d| d.weekday()) == Some(Weekday::Sun) {
            lines.push(row.trim_end().to_string());
            row.clear();
        }
    }
    if !row.is_empty() {
        lines.push(row.trim_end().to_string());
    }
    Ok(lines)
}

fn cmd_month(store: &ClockStore, args: &MonthArgs) -> Result<()> {
    let today = ClockStore::today();
    let year = args.year.unwrap_or(today.year());
    let month = args.month.unwrap_or(today.month());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&store.month_view(year, month)?)?);
        return Ok(());
    }
    for line in render_month(store, year, month)? {
        println!("{line}");
    }
    Ok(())
}

/// Streak ending at `as_of`, or at today when absent.
pub fn streak(store: &ClockStore, as_of: Option<&str>) -> Result<(NaiveDate, u32)> {
    match as_of {
        Some(raw) => {
            let date = ClockStore::parse_date(raw)?;
            Ok((date, store.consecutive_streak(date)))
        }
        None => Ok((ClockStore::today(), store.current_streak())),
    }
}

fn cmd_streak(store: &ClockStore, args: &StreakArgs) -> Result<()> {
    let (as_of, days) = streak(store, args.as_of.as_deref())?;
    println!("{days} day(s) in a row as of {}", ClockStore::format_date(as_of));
    Ok(())
}

fn cmd_list(store: &ClockStore, args: &ListArgs) -> Result<()> {
    let dates: Vec<String> = store
        .marked_dates()
        .into_iter()
        .map(ClockStore::format_date)
        .collect();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&dates)?);
    } else if dates.is_empty() {
        println!("No clock-ins recorded");
    } else {
        for date in &dates {
            println!("{date}");
        }
    }
    Ok(())
}
