//! Keystroke-rate ledger
//!
//! Page observers send pre-aggregated keystroke counts. Counts accumulate in an
//! in-memory live bucket for the current minute and are flushed into the
//! day-keyed, minute-bucketed ledger on the periodic tick, on a minute change
//! and before a day rollover.

use crate::clock::{floor_minute_ms, DayKey, MINUTE_MS};
use crate::host_ledger::within_retention;
use crate::signals::MAX_KEYS_PER_BATCH;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default window for the rolling keystroke average, in minute buckets
pub const DEFAULT_KPM_WINDOW: usize = 5;

/// Running totals for a day
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KpmRollup {
    pub total_keys: u64,
}

/// Keystrokes for one day
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KpmDayLog {
    /// Minute start (epoch ms) → keystrokes in that minute
    pub minutes: BTreeMap<i64, u64>,
    pub rollup: KpmRollup,
    /// Minutes in which time was credited to a Productive host
    pub productive_minutes: BTreeSet<i64>,
}

/// `kpmLog[day]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KpmLedger {
    days: BTreeMap<DayKey, KpmDayLog>,
}

/// Unflushed keystrokes for the minute in progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveBucket {
    pub day: DayKey,
    pub minute_ms: i64,
    pub count: u64,
}

impl KpmLedger {
    /// Add one batch to the bucket for `timestamp_ms`'s minute.
    ///
    /// The batch is bounded to [`MAX_KEYS_PER_BATCH`]; returns the count applied.
    pub fn batch_increment(&mut self, day: &DayKey, timestamp_ms: i64, count: i64) -> u64 {
        let applied = clamp_batch(count);
        if applied == 0 {
            return 0;
        }
        self.add_to_bucket(day, floor_minute_ms(timestamp_ms), applied);
        applied
    }

    /// Write a flushed live bucket; the bucket was bounded batch by batch
    pub fn apply_live(&mut self, bucket: &LiveBucket) {
        if bucket.count > 0 {
            self.add_to_bucket(&bucket.day, bucket.minute_ms, bucket.count);
        }
    }

    fn add_to_bucket(&mut self, day: &DayKey, minute_ms: i64, count: u64) {
        let log = self.days.entry(day.clone()).or_default();
        *log.minutes.entry(minute_ms).or_insert(0) += count;
        log.rollup.total_keys += count;
    }

    pub fn mark_productive_minute(&mut self, day: &DayKey, timestamp_ms: i64) {
        self.days
            .entry(day.clone())
            .or_default()
            .productive_minutes
            .insert(floor_minute_ms(timestamp_ms));
    }

    pub fn day(&self, day: &DayKey) -> Option<&KpmDayLog> {
        self.days.get(day)
    }

    pub fn prune(&mut self, today: &DayKey) -> usize {
        let before = self.days.len();
        self.days.retain(|day, _| within_retention(day, today));
        before - self.days.len()
    }
}

/// Average keystrokes per minute over the `window` buckets ending at `now_ms`'s
/// minute, divided by the number of non-empty buckets.
///
/// Silence counts as missing data, not as a zero rate.
pub fn minute_rolling_average(log: &KpmDayLog, now_ms: i64, window: usize) -> f64 {
    let end = floor_minute_ms(now_ms);
    let mut sum = 0u64;
    let mut filled = 0u32;
    for i in 0..window as i64 {
        if let Some(&count) = log.minutes.get(&(end - i * MINUTE_MS)) {
            if count > 0 {
                sum += count;
                filled += 1;
            }
        }
    }
    if filled == 0 {
        0.0
    } else {
        sum as f64 / filled as f64
    }
}

/// Holder for the in-memory live bucket
#[derive(Debug, Clone, Default)]
pub struct LiveKeystrokes {
    bucket: Option<LiveBucket>,
}

impl LiveKeystrokes {
    /// Add a batch to the live bucket.
    ///
    /// When the batch belongs to another minute or day, the previous bucket is
    /// returned so the caller can flush it first.
    pub fn add(&mut self, day: &DayKey, timestamp_ms: i64, count: i64) -> Option<LiveBucket> {
        let applied = clamp_batch(count);
        let minute_ms = floor_minute_ms(timestamp_ms);

        let same_bucket = self
            .bucket
            .as_ref()
            .is_some_and(|b| b.minute_ms == minute_ms && &b.day == day);

        if same_bucket {
            if let Some(bucket) = self.bucket.as_mut() {
                bucket.count += applied;
            }
            return None;
        }

        let previous = self.bucket.take();
        self.bucket = Some(LiveBucket {
            day: day.clone(),
            minute_ms,
            count: applied,
        });
        previous
    }

    /// Remove and return the live bucket for flushing
    pub fn take(&mut self) -> Option<LiveBucket> {
        self.bucket.take()
    }

    /// The unflushed bucket, for real-time display
    pub fn peek(&self) -> Option<&LiveBucket> {
        self.bucket.as_ref()
    }
}

fn clamp_batch(count: i64) -> u64 {
    count.clamp(0, MAX_KEYS_PER_BATCH as i64) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_735_725_600_000; // minute-aligned

    fn day() -> DayKey {
        DayKey::parse("2025-01-01").unwrap()
    }

    #[test]
    fn test_batch_increment_buckets_by_minute() {
        let mut ledger = KpmLedger::default();
        ledger.batch_increment(&day(), T0 + 5_000, 30);
        ledger.batch_increment(&day(), T0 + 59_999, 12);
        ledger.batch_increment(&day(), T0 + 60_000, 8);

        let log = ledger.day(&day()).unwrap();
        assert_eq!(log.minutes[&T0], 42);
        assert_eq!(log.minutes[&(T0 + 60_000)], 8);
        assert_eq!(log.rollup.total_keys, 50);
    }

    #[test]
    fn test_batch_is_bounded() {
        let mut ledger = KpmLedger::default();
        assert_eq!(ledger.batch_increment(&day(), T0, 50_000), 1200);
        assert_eq!(ledger.batch_increment(&day(), T0, -3), 0);
        assert_eq!(ledger.day(&day()).unwrap().rollup.total_keys, 1200);
    }

    #[test]
    fn test_rolling_average_ignores_empty_buckets() {
        let mut log = KpmDayLog::default();
        log.minutes.insert(T0, 100);
        log.minutes.insert(T0 - 120_000, 80);
        let avg = minute_rolling_average(&log, T0 + 10_000, DEFAULT_KPM_WINDOW);
        assert!((avg - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_average_window_bounds() {
        let mut log = KpmDayLog::default();
        log.minutes.insert(T0 - 5 * 60_000, 500); // just outside a 5-bucket window
        log.minutes.insert(T0 - 4 * 60_000, 40);
        assert!((minute_rolling_average(&log, T0, 5) - 40.0).abs() < 1e-9);
        assert_eq!(minute_rolling_average(&KpmDayLog::default(), T0, 5), 0.0);
    }

    #[test]
    fn test_live_bucket_flushes_on_minute_change() {
        let mut live = LiveKeystrokes::default();
        assert!(live.add(&day(), T0 + 1_000, 10).is_none());
        assert!(live.add(&day(), T0 + 2_000, 5).is_none());
        assert_eq!(live.peek().unwrap().count, 15);

        let flushed = live.add(&day(), T0 + 61_000, 7).unwrap();
        assert_eq!(flushed.minute_ms, T0);
        assert_eq!(flushed.count, 15);

        let mut ledger = KpmLedger::default();
        ledger.apply_live(&flushed);
        ledger.apply_live(&live.take().unwrap());
        assert!(live.peek().is_none());
        assert_eq!(ledger.day(&day()).unwrap().rollup.total_keys, 22);
    }

    #[test]
    fn test_prune_matches_retention() {
        let mut ledger = KpmLedger::default();
        let old = DayKey::parse("2024-11-01").unwrap();
        ledger.batch_increment(&old, T0, 5);
        ledger.batch_increment(&day(), T0, 5);
        assert_eq!(ledger.prune(&day()), 1);
        assert!(ledger.day(&old).is_none());
    }

    #[test]
    fn test_minute_keys_roundtrip_through_json() {
        let mut ledger = KpmLedger::default();
        ledger.batch_increment(&day(), T0, 5);
        ledger.mark_productive_minute(&day(), T0 + 30_000);
        let json = serde_json::to_string(&ledger).unwrap();
        let back: KpmLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ledger);
    }
}
