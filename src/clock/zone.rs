//! Injectable "now" and zone resolution.

use std::sync::Mutex;

use chrono::{DateTime, FixedOffset, Local, Offset, TimeDelta, Utc};

use crate::error::{Result, TaskError};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used by tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = at;
        }
    }

    /// Move forward by `delta`.
    pub fn advance(&self, delta: TimeDelta) {
        if let Ok(mut now) = self.now.lock() {
            *now += delta;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Resolve a zone setting to a fixed offset.
///
/// Accepts `"system"`, `"utc"`, `"+08:00"`, `"-05:30"`, `"+8"` and the same
/// forms prefixed by `utc` (for example `"UTC+8"`).
pub fn resolve_zone(setting: &str) -> Result<FixedOffset> {
    let normalized = setting.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "" | "system" | "local" => return Ok(Local::now().offset().fix()),
        "utc" | "z" | "gmt" => return utc_offset(),
        _ => {}
    }

    let offset = normalized
        .strip_prefix("utc")
        .or_else(|| normalized.strip_prefix("gmt"))
        .unwrap_or(&normalized);
    let invalid = || TaskError::Config(format!("invalid timezone '{setting}'"));

    let (sign, rest) = match offset.as_bytes().first() {
        Some(b'+') => (1, &offset[1..]),
        Some(b'-') => (-1, &offset[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if !(0..=18).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

fn utc_offset() -> Result<FixedOffset> {
    FixedOffset::east_opt(0).ok_or_else(|| TaskError::Config("utc offset".into()))
}

/// Drop sub-second precision so assignment stamps round-trip through storage.
pub fn truncate_to_secs(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}
