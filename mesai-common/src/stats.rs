//! Work-hour statistics.
//!
//! Stats are a pure projection over one user's complete entry collection.
//! They are recomputed from scratch on every call; nothing is cached.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::work_hours::WorkHourEntry;

/// Aggregated hours for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    #[serde(with = "rust_decimal::serde::float")]
    pub total_hours: Decimal,
    /// Total hours divided by the number of distinct worked days.
    #[serde(with = "rust_decimal::serde::float")]
    pub daily_average: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub this_week_hours: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub this_month_hours: Decimal,
}

/// Aggregate `entries` relative to the local calendar day of `now`.
pub fn aggregate<'a, I, Tz>(entries: I, now: &DateTime<Tz>) -> Stats
where
    I: IntoIterator<Item = &'a WorkHourEntry>,
    Tz: TimeZone,
{
    aggregate_on(entries, now.date_naive())
}

/// Aggregate `entries` relative to the calendar day `today`.
///
/// Weeks start on Sunday. An entry counts toward the week (month) bucket
/// when its date is on or after the first day of the week (month); no
/// upper bound is applied.
pub fn aggregate_on<'a, I>(entries: I, today: NaiveDate) -> Stats
where
    I: IntoIterator<Item = &'a WorkHourEntry>,
{
    let start_of_week = start_of_week(today);
    let start_of_month = start_of_month(today);

    let mut stats = Stats::default();
    let mut work_days = BTreeSet::new();

    for entry in entries {
        // Stored rows are not re-validated; saturate rather than overflow.
        stats.total_hours = stats.total_hours.saturating_add(entry.hours);
        work_days.insert(entry.date);

        if entry.date >= start_of_week {
            stats.this_week_hours = stats.this_week_hours.saturating_add(entry.hours);
        }
        if entry.date >= start_of_month {
            stats.this_month_hours = stats.this_month_hours.saturating_add(entry.hours);
        }
    }

    if !work_days.is_empty() {
        stats.daily_average = stats
            .total_hours
            .checked_div(Decimal::from(work_days.len()))
            .unwrap_or_default();
    }

    stats
}

/// Most recent Sunday on or before `today`.
pub fn start_of_week(today: NaiveDate) -> NaiveDate {
    today - Duration::days(i64::from(today.weekday().num_days_from_sunday()))
}

/// First day of the month containing `today`.
pub fn start_of_month(today: NaiveDate) -> NaiveDate {
    today - Duration::days(i64::from(today.day0()))
}
