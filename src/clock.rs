//! Wall-clock access and calendar-day keys
//!
//! Every ledger buckets by [`DayKey`], the local calendar date of the moment a
//! signal is handled. Day keys are re-derived from the clock on every access and
//! never cached across a persistence call.

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Format used for day keys (`2025-01-31`)
pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// Milliseconds in one minute bucket
pub const MINUTE_MS: i64 = 60_000;

/// Local calendar-day identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayKey(String);

impl DayKey {
    /// Derive the day key for a moment in its own offset
    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self(at.format(DAY_KEY_FORMAT).to_string())
    }

    /// Parse a stored key, rejecting anything that is not a calendar date
    pub fn parse(raw: &str) -> Option<Self> {
        NaiveDate::parse_from_str(raw, DAY_KEY_FORMAT)
            .ok()
            .map(|date| Self(date.format(DAY_KEY_FORMAT).to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.0, DAY_KEY_FORMAT).ok()
    }

    /// Whole days from `self` to `later` (negative when `later` is earlier)
    pub fn days_until(&self, later: &DayKey) -> Option<i64> {
        Some((later.to_date()? - self.to_date()?).num_days())
    }

    /// The key `days` calendar days before this one
    pub fn minus_days(&self, days: i64) -> Option<DayKey> {
        let date = self.to_date()? - Duration::days(days);
        Some(Self(date.format(DAY_KEY_FORMAT).to_string()))
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;

    fn today(&self) -> DayKey {
        DayKey::from_datetime(&self.now())
    }
}

/// Clock backed by the host's local time zone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// Clock that only moves when told to; used for replay and tests
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<FixedOffset>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<FixedOffset>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: DateTime<FixedOffset>) {
        let mut guard = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        match self.current.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Floor an epoch-millisecond timestamp to the start of its minute
pub fn floor_minute_ms(ms: i64) -> i64 {
    ms - ms.rem_euclid(MINUTE_MS)
}

/// Fractional local hour of day (`13.5` at half past one)
pub fn hour_of_day<Tz: TimeZone>(at: &DateTime<Tz>) -> f64 {
    at.hour() as f64 + at.minute() as f64 / 60.0 + at.second() as f64 / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(raw).unwrap()
    }

    #[test]
    fn test_day_key_uses_local_offset() {
        // 23:30 in UTC-05:00 is already the next day in UTC
        let late = at("2025-01-01T23:30:00-05:00");
        assert_eq!(DayKey::from_datetime(&late).as_str(), "2025-01-01");
    }

    #[test]
    fn test_day_key_parse_rejects_garbage() {
        assert!(DayKey::parse("2025-02-30").is_none());
        assert!(DayKey::parse("yesterday").is_none());
        assert_eq!(DayKey::parse("2025-02-03").unwrap().as_str(), "2025-02-03");
    }

    #[test]
    fn test_day_arithmetic() {
        let day = DayKey::parse("2025-03-01").unwrap();
        assert_eq!(day.minus_days(1).unwrap().as_str(), "2025-02-28");
        let earlier = DayKey::parse("2025-01-30").unwrap();
        assert_eq!(earlier.days_until(&day), Some(30));
        assert!(earlier < day);
    }

    #[test]
    fn test_floor_minute() {
        assert_eq!(floor_minute_ms(120_500), 120_000);
        assert_eq!(floor_minute_ms(60_000), 60_000);
        assert_eq!(floor_minute_ms(59_999), 0);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(at("2025-01-01T23:59:00+00:00"));
        assert_eq!(clock.today().as_str(), "2025-01-01");
        clock.advance(Duration::minutes(2));
        assert_eq!(clock.today().as_str(), "2025-01-02");
    }

    #[test]
    fn test_hour_of_day() {
        let noon = at("2025-01-01T12:30:00+02:00");
        assert!((hour_of_day(&noon) - 12.5).abs() < 1e-9);
    }
}
