//! Reporting periods and their resolution to concrete UTC instants.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

/// A named or custom reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Period {
  Today,
  Yesterday,
  ThisWeek,
  LastWeek,
  ThisMonth,
  /// A specific calendar month, e.g. "month-03-2026".
  Month { month: u32, year: i32 },
}

impl Default for Period {
  fn default() -> Self {
    Period::Today
  }
}

/// Resolved period window. Both endpoints are inclusive at day granularity:
/// start is 00:00:00.000 and end is 23:59:59.999 of the relevant days, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodRange {
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
}

impl PeriodRange {
  /// Whether an instant falls inside the window (inclusive on both ends).
  pub fn contains(&self, at: DateTime<Utc>) -> bool {
    at >= self.start && at <= self.end
  }
}

impl Period {
  /// Parse a period filter string. Empty or absent input defaults to today.
  pub fn parse(input: Option<&str>) -> Result<Period> {
    let input = match input {
      Some(s) if !s.trim().is_empty() => s.trim(),
      _ => return Ok(Period::Today),
    };

    match input {
      "today" => Ok(Period::Today),
      "yesterday" => Ok(Period::Yesterday),
      "this-week" => Ok(Period::ThisWeek),
      "last-week" => Ok(Period::LastWeek),
      "this-month" => Ok(Period::ThisMonth),
      other => {
        // Free-form "month-MM-YYYY"
        let rest = other
          .strip_prefix("month-")
          .ok_or_else(|| eyre!("Unknown period: {}", other))?;
        let (mm, yyyy) = rest
          .split_once('-')
          .ok_or_else(|| eyre!("Invalid month period: {}", other))?;
        let month: u32 = mm
          .parse()
          .map_err(|_| eyre!("Invalid month in period: {}", other))?;
        let year: i32 = yyyy
          .parse()
          .map_err(|_| eyre!("Invalid year in period: {}", other))?;
        if !(1..=12).contains(&month) {
          return Err(eyre!("Month out of range in period: {}", other));
        }
        Ok(Period::Month { month, year })
      }
    }
  }

  /// Stable string form used as the period segment of cache keys.
  pub fn cache_token(&self) -> String {
    match self {
      Period::Today => "today".to_string(),
      Period::Yesterday => "yesterday".to_string(),
      Period::ThisWeek => "this-week".to_string(),
      Period::LastWeek => "last-week".to_string(),
      Period::ThisMonth => "this-month".to_string(),
      Period::Month { month, year } => format!("month-{:02}-{}", month, year),
    }
  }

  /// Whether this period covers the current day and therefore gets the short
  /// TTL of the policy table.
  pub fn is_hot(&self) -> bool {
    matches!(self, Period::Today | Period::ThisWeek)
  }

  /// Resolve the period to a concrete window relative to `now`.
  pub fn resolve(&self, now: DateTime<Utc>) -> PeriodRange {
    let today = now.date_naive();

    match self {
      Period::Today => day_range(today, today),
      Period::Yesterday => {
        let d = today - Duration::days(1);
        day_range(d, d)
      }
      Period::ThisWeek => {
        let monday = start_of_week(today);
        day_range(monday, monday + Duration::days(6))
      }
      Period::LastWeek => {
        let monday = start_of_week(today) - Duration::days(7);
        day_range(monday, monday + Duration::days(6))
      }
      Period::ThisMonth => month_range(today.year(), today.month()),
      Period::Month { month, year } => month_range(*year, *month),
    }
  }
}

impl std::fmt::Display for Period {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.cache_token())
  }
}

/// Monday of the week containing `date`.
fn start_of_week(date: NaiveDate) -> NaiveDate {
  let days_from_monday = date.weekday().num_days_from_monday() as i64;
  date - Duration::days(days_from_monday)
}

fn month_range(year: i32, month: u32) -> PeriodRange {
  // Saturating fallbacks keep this total; inputs are validated in parse().
  let first = NaiveDate::from_ymd_opt(year, month, 1)
    .unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date"));
  let next_month = if month == 12 {
    NaiveDate::from_ymd_opt(year + 1, 1, 1)
  } else {
    NaiveDate::from_ymd_opt(year, month + 1, 1)
  }
  .unwrap_or(first);
  day_range(first, next_month - Duration::days(1))
}

fn day_range(first: NaiveDate, last: NaiveDate) -> PeriodRange {
  let start = Utc
    .from_utc_datetime(&first.and_hms_opt(0, 0, 0).expect("valid midnight"));
  let end = Utc.from_utc_datetime(
    &last
      .and_hms_milli_opt(23, 59, 59, 999)
      .expect("valid end of day"),
  );
  PeriodRange { start, end }
}
