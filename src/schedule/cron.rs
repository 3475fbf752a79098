// src/schedule/cron.rs

//! Five-field cron expressions, evaluated in UTC.
//!
//! `minute hour day-of-month month day-of-week`, each field one of `*`, a
//! value, a range `a-b`, a step `*/n` / `a-b/n` / `a/n`, or a comma list of
//! those. Months and weekdays accept three-letter names; weekday `7` is
//! Sunday like `0`. When both day fields are restricted a day matches if
//! either does (classic cron). Macros: `@hourly`, `@daily` (`@midnight`),
//! `@weekly`, `@monthly`, `@yearly` (`@annually`).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use crate::errors::{EtlDagError, Result};

/// How far `next_after` / `latest_at_or_before` search before giving up on
/// expressions that never fire (e.g. `0 0 30 2 *`).
const SEARCH_YEARS: i32 = 5;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    /// 0 = Sunday.
    days_of_week: BTreeSet<u32>,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        let expanded = match trimmed.to_lowercase().as_str() {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            "@yearly" | "@annually" => "0 0 1 1 *",
            other if other.starts_with('@') => {
                return Err(EtlDagError::ScheduleError(format!(
                    "unknown schedule macro '{trimmed}'"
                )));
            }
            _ => trimmed,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(EtlDagError::ScheduleError(format!(
                "cron expression '{trimmed}' must have 5 fields, found {}",
                fields.len()
            )));
        }

        let field_err = |name: &str, e: String| {
            EtlDagError::ScheduleError(format!("cron expression '{trimmed}': {name}: {e}"))
        };

        let minutes = parse_field(fields[0], 0, 59, &[]).map_err(|e| field_err("minute", e))?;
        let hours = parse_field(fields[1], 0, 23, &[]).map_err(|e| field_err("hour", e))?;
        let days_of_month =
            parse_field(fields[2], 1, 31, &[]).map_err(|e| field_err("day-of-month", e))?;
        let months =
            parse_field(fields[3], 1, 12, &MONTH_NAMES).map_err(|e| field_err("month", e))?;
        let days_of_week: BTreeSet<u32> = parse_field(fields[4], 0, 7, &DAY_NAMES)
            .map_err(|e| field_err("day-of-week", e))?
            .into_iter()
            .map(|d| d % 7)
            .collect();

        Ok(Self {
            expr: trimmed.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// Whether `t` (seconds ignored) is a tick.
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        self.minutes.contains(&t.minute())
            && self.hours.contains(&t.hour())
            && self.months.contains(&t.month())
            && self.day_matches(t)
    }

    /// First tick strictly after `t`.
    pub fn next_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = truncate_to_minute(t)? + Duration::minutes(1);
        let limit = t.year() + SEARCH_YEARS;

        while candidate.year() <= limit {
            if !self.months.contains(&candidate.month()) {
                candidate = start_of_next_month(candidate)?;
            } else if !self.day_matches(candidate) {
                candidate = start_of_day(candidate)? + Duration::days(1);
            } else if !self.hours.contains(&candidate.hour()) {
                candidate = start_of_hour(candidate)? + Duration::hours(1);
            } else if !self.minutes.contains(&candidate.minute()) {
                candidate += Duration::minutes(1);
            } else {
                return Some(candidate);
            }
        }
        None
    }

    /// First tick at or after `t`.
    pub fn first_at_or_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_after(t - Duration::nanoseconds(1))
    }

    /// Most recent tick at or before `t`.
    pub fn latest_at_or_before(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = truncate_to_minute(t)?;
        let limit = t.year() - SEARCH_YEARS;

        while candidate.year() >= limit {
            if !self.months.contains(&candidate.month()) {
                candidate = start_of_month(candidate)? - Duration::minutes(1);
            } else if !self.day_matches(candidate) {
                candidate = start_of_day(candidate)? - Duration::minutes(1);
            } else if !self.hours.contains(&candidate.hour()) {
                candidate = start_of_hour(candidate)? - Duration::minutes(1);
            } else if !self.minutes.contains(&candidate.minute()) {
                candidate -= Duration::minutes(1);
            } else {
                return Some(candidate);
            }
        }
        None
    }

    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        let dom = self.days_of_month.contains(&t.day());
        let dow = self
            .days_of_week
            .contains(&t.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl FromStr for CronSchedule {
    type Err = EtlDagError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

fn parse_field(
    field: &str,
    min: u32,
    max: u32,
    names: &[&str],
) -> std::result::Result<BTreeSet<u32>, String> {
    let mut out = BTreeSet::new();

    for item in field.split(',') {
        if item.is_empty() {
            return Err("empty list item".to_string());
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{step}'"))?;
                if step == 0 {
                    return Err("step must be at least 1".to_string());
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (
                parse_value(a, min, max, names)?,
                parse_value(b, min, max, names)?,
            )
        } else {
            let v = parse_value(range, min, max, names)?;
            // `a/n` runs from `a` to the end of the field.
            if item.contains('/') { (v, max) } else { (v, v) }
        };

        if lo > hi {
            return Err(format!("range {lo}-{hi} is reversed"));
        }

        out.extend((lo..=hi).step_by(step as usize));
    }

    Ok(out)
}

fn parse_value(raw: &str, min: u32, max: u32, names: &[&str]) -> std::result::Result<u32, String> {
    let lower = raw.to_lowercase();
    if let Some(pos) = names.iter().position(|n| *n == lower) {
        // Month names are 1-based, weekday names 0-based.
        return Ok(pos as u32 + min);
    }

    let v: u32 = raw.parse().map_err(|_| format!("invalid value '{raw}'"))?;
    if v < min || v > max {
        return Err(format!("value {v} out of range {min}-{max}"));
    }
    Ok(v)
}

fn truncate_to_minute(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    t.with_second(0)?.with_nanosecond(0)
}

fn start_of_hour(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    truncate_to_minute(t)?.with_minute(0)
}

fn start_of_day(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
        .single()
}

fn start_of_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(t.year(), t.month(), 1, 0, 0, 0).single()
}

fn start_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}
