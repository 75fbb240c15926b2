//! Period-cycle expiration math.
//!
//! Every calendar policy maps an instant to an integer *cycle index*. Two
//! instants share a cycle iff their indices are equal, and a task assigned at
//! `a` is expired at `now` iff `index(a) < index(now)`. Relative, fixed and
//! permanent policies have no index and compare instants directly.
//!
//! Nothing here reads the system clock: `now` and the zone are always passed
//! in by the caller.

use chrono::{
    DateTime, Datelike, Days, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta,
    TimeZone, Utc, Weekday,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskError};

/// `NaiveDate::num_days_from_ce()` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

/// Policy kind as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Relative,
    Fixed,
    Permanent,
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Relative => "relative",
            Self::Fixed => "fixed",
            Self::Permanent => "permanent",
        };
        f.write_str(s)
    }
}

/// When an assignment (or a reroll quota) stops being current.
///
/// Each variant carries only the fields it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeriodPolicy {
    /// New cycle every day at `reset_time` (zone-local).
    Daily { reset_time: NaiveTime },
    /// New cycle every `reset_day` at `reset_time`.
    Weekly {
        reset_day: Weekday,
        reset_time: NaiveTime,
    },
    /// New cycle on `reset_day` of each month, clamped to the month length.
    Monthly { reset_day: u32, reset_time: NaiveTime },
    /// Expires `duration` after assignment.
    Relative { duration: TimeDelta },
    /// Absolute window. Expires once `now > end`.
    Fixed {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    /// Never expires.
    Permanent,
}

impl PeriodPolicy {
    /// The configuration kind of this policy.
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::Daily { .. } => PolicyKind::Daily,
            Self::Weekly { .. } => PolicyKind::Weekly,
            Self::Monthly { .. } => PolicyKind::Monthly,
            Self::Relative { .. } => PolicyKind::Relative,
            Self::Fixed { .. } => PolicyKind::Fixed,
            Self::Permanent => PolicyKind::Permanent,
        }
    }

    /// `true` for policies that roll over on a recurring boundary.
    pub fn is_periodic(&self) -> bool {
        matches!(
            self,
            Self::Daily { .. } | Self::Weekly { .. } | Self::Monthly { .. } | Self::Relative { .. }
        )
    }

    /// Cycle index of `at`, or `None` for policies without one.
    pub fn cycle_index(&self, at: DateTime<Utc>, zone: &FixedOffset) -> Option<i64> {
        let local = at.with_timezone(zone).naive_local();
        match self {
            Self::Daily { reset_time } => Some(daily_index(local, *reset_time)),
            Self::Weekly {
                reset_day,
                reset_time,
            } => Some(weekly_index(local, *reset_day, *reset_time)),
            Self::Monthly {
                reset_day,
                reset_time,
            } => Some(monthly_index(local, *reset_day, *reset_time)),
            Self::Relative { .. } | Self::Fixed { .. } | Self::Permanent => None,
        }
    }

    /// Whether something assigned at `assigned_at` is stale at `now`.
    pub fn is_expired(
        &self,
        assigned_at: DateTime<Utc>,
        now: DateTime<Utc>,
        zone: &FixedOffset,
    ) -> bool {
        match self {
            Self::Relative { duration } => {
                if *duration <= TimeDelta::zero() {
                    return true;
                }
                match assigned_at.checked_add_signed(*duration) {
                    Some(expires) => now > expires,
                    None => false,
                }
            }
            Self::Fixed { end, .. } => end.is_some_and(|end| now > end),
            Self::Permanent => false,
            Self::Daily { .. } | Self::Weekly { .. } | Self::Monthly { .. } => {
                match (
                    self.cycle_index(assigned_at, zone),
                    self.cycle_index(now, zone),
                ) {
                    (Some(assigned), Some(current)) => assigned < current,
                    _ => false,
                }
            }
        }
    }

    /// Instant at which the cycle containing `now` ends.
    ///
    /// Used for "resets in ..." display. `None` for permanent policies and
    /// fixed windows without an end.
    pub fn next_reset(
        &self,
        assigned_at: DateTime<Utc>,
        now: DateTime<Utc>,
        zone: &FixedOffset,
    ) -> Option<DateTime<Utc>> {
        let local = now.with_timezone(zone).naive_local();
        let today = local.date();
        match self {
            Self::Daily { reset_time } => {
                let mut reset = today.and_time(*reset_time);
                if local >= reset {
                    reset = reset.checked_add_days(Days::new(1))?;
                }
                to_utc(reset, zone)
            }
            Self::Weekly {
                reset_day,
                reset_time,
            } => {
                let date = if today.weekday() == *reset_day {
                    if local.time() < *reset_time {
                        today
                    } else {
                        today.checked_add_days(Days::new(7))?
                    }
                } else {
                    let ahead = days_between(today.weekday(), *reset_day);
                    today.checked_add_days(Days::new(u64::from(ahead)))?
                };
                to_utc(date.and_time(*reset_time), zone)
            }
            Self::Monthly {
                reset_day,
                reset_time,
            } => {
                let this_reset = clamped_day(today, *reset_day)?;
                let date = if today < this_reset
                    || (today == this_reset && local.time() < *reset_time)
                {
                    this_reset
                } else {
                    let next_month = first_of_month(today).checked_add_months(Months::new(1))?;
                    clamped_day(next_month, *reset_day)?
                };
                to_utc(date.and_time(*reset_time), zone)
            }
            Self::Relative { duration } => assigned_at.checked_add_signed(*duration),
            Self::Fixed { end, .. } => *end,
            Self::Permanent => None,
        }
    }

    /// Whether the remaining time in the cycle is below `threshold`.
    pub fn is_near_expiry(
        &self,
        assigned_at: DateTime<Utc>,
        now: DateTime<Utc>,
        zone: &FixedOffset,
        threshold: TimeDelta,
    ) -> bool {
        match self.next_reset(assigned_at, now, zone) {
            Some(reset) => now
                .checked_add_signed(threshold)
                .is_some_and(|horizon| horizon > reset),
            None => false,
        }
    }

    /// Whether `now` is inside the fixed window.
    ///
    /// Non-fixed policies, and fixed policies missing either bound, are
    /// always inside.
    pub fn in_fixed_window(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Fixed {
                start: Some(start),
                end: Some(end),
            } => *start <= now && now <= *end,
            _ => true,
        }
    }
}

impl std::fmt::Display for PeriodPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily { reset_time } => write!(f, "daily at {}", reset_time.format("%H:%M")),
            Self::Weekly {
                reset_day,
                reset_time,
            } => write!(f, "weekly on {reset_day} at {}", reset_time.format("%H:%M")),
            Self::Monthly {
                reset_day,
                reset_time,
            } => write!(
                f,
                "monthly on day {reset_day} at {}",
                reset_time.format("%H:%M")
            ),
            Self::Relative { duration } => {
                write!(f, "{}s after assignment", duration.num_seconds())
            }
            Self::Fixed { start, end } => write!(
                f,
                "fixed window {} .. {}",
                start.map_or_else(|| "-".to_owned(), |s| s.to_rfc3339()),
                end.map_or_else(|| "-".to_owned(), |e| e.to_rfc3339())
            ),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

/// Parse a duration such as `"7d"`, `"24h"`, `"30m"` or `"45s"`.
///
/// A bare number is read as days.
pub fn parse_duration(input: &str) -> Result<TimeDelta> {
    let trimmed = input.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        return Err(TaskError::Config("empty duration".into()));
    }
    let (digits, unit) = match trimmed.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&trimmed[..idx], c),
        _ => (trimmed.as_str(), 'd'),
    };
    let amount: i64 = digits
        .trim()
        .parse()
        .map_err(|_| TaskError::Config(format!("invalid duration '{input}'")))?;
    let delta = match unit {
        'd' => TimeDelta::try_days(amount),
        'h' => TimeDelta::try_hours(amount),
        'm' => TimeDelta::try_minutes(amount),
        's' => TimeDelta::try_seconds(amount),
        other => {
            return Err(TaskError::Config(format!(
                "unknown duration unit '{other}' in '{input}'"
            )));
        }
    };
    delta.ok_or_else(|| TaskError::Config(format!("duration out of range '{input}'")))
}

/// Parse `"HH:MM"` or `"HH:MM:SS"`.
pub fn parse_time_of_day(input: &str) -> Result<NaiveTime> {
    let trimmed = input.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| TaskError::Config(format!("invalid time of day '{input}'")))
}

fn epoch_day(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE
}

fn daily_index(local: NaiveDateTime, reset_time: NaiveTime) -> i64 {
    let mut day = epoch_day(local.date());
    if local.time() < reset_time {
        day -= 1;
    }
    day
}

fn weekly_index(local: NaiveDateTime, reset_day: Weekday, reset_time: NaiveTime) -> i64 {
    let date = local.date();
    let back = i64::from(days_between(reset_day, date.weekday()));
    let mut week_start = epoch_day(date) - back;
    if date.weekday() == reset_day && local.time() < reset_time {
        week_start -= 7;
    }
    week_start
}

fn monthly_index(local: NaiveDateTime, reset_day: u32, reset_time: NaiveTime) -> i64 {
    let date = local.date();
    let effective = reset_day.clamp(1, days_in_month(date));
    let before_reset =
        date.day() < effective || (date.day() == effective && local.time() < reset_time);
    let (year, month) = if before_reset {
        if date.month() == 1 {
            (date.year() - 1, 12)
        } else {
            (date.year(), date.month() - 1)
        }
    } else {
        (date.year(), date.month())
    };
    i64::from(year) * 100 + i64::from(month)
}

/// Days to walk forward from `from` to reach `to` (0..=6).
fn days_between(from: Weekday, to: Weekday) -> u32 {
    (to.num_days_from_monday() + 7 - from.num_days_from_monday()) % 7
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn days_in_month(date: NaiveDate) -> u32 {
    let first = first_of_month(date);
    match first.checked_add_months(Months::new(1)) {
        Some(next) => u32::try_from(next.signed_duration_since(first).num_days()).unwrap_or(31),
        None => 31,
    }
}

fn clamped_day(month: NaiveDate, day: u32) -> Option<NaiveDate> {
    month.with_day(day.clamp(1, days_in_month(month)))
}

fn to_utc(local: NaiveDateTime, zone: &FixedOffset) -> Option<DateTime<Utc>> {
    zone.from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
