//! Daily rollup
//!
//! Derives category totals, the top hosts, the rolling keystroke average and the
//! number of flow windows for one day from the host and keystroke ledgers.

use crate::clock::{DayKey, MINUTE_MS};
use crate::host_ledger::{within_retention, HostLedger};
use crate::keystrokes::{minute_rolling_average, KpmDayLog, KpmLedger, DEFAULT_KPM_WINDOW};
use crate::rules::RuleIndex;
use crate::types::Category;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hosts kept in the top-host list
pub const TOP_HOSTS: usize = 5;

/// Keystrokes per minute for a productive minute to count toward flow
pub const FLOW_KPM_THRESHOLD: u64 = 20;

/// Consecutive qualifying minutes that make one flow window
pub const FLOW_MIN_MINUTES: usize = 10;

/// Seconds per canonical category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CategoryTotals {
    pub productive_sec: u64,
    pub distracting_sec: u64,
    pub neutral_sec: u64,
}

impl CategoryTotals {
    pub fn get(&self, category: Category) -> u64 {
        match category {
            Category::Productive => self.productive_sec,
            Category::Distracting => self.distracting_sec,
            Category::Neutral => self.neutral_sec,
        }
    }

    fn add(&mut self, category: Category, seconds: u64) {
        let slot = match category {
            Category::Productive => &mut self.productive_sec,
            Category::Distracting => &mut self.distracting_sec,
            Category::Neutral => &mut self.neutral_sec,
        };
        *slot = slot.saturating_add(seconds);
    }

    pub fn total(&self) -> u64 {
        self.productive_sec + self.distracting_sec + self.neutral_sec
    }
}

/// One row of the top-host list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostUsage {
    pub host: String,
    pub seconds: u64,
    pub category: Category,
}

/// `dailySummary[day]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRollup {
    pub day: DayKey,
    pub totals: CategoryTotals,
    pub top_hosts: Vec<HostUsage>,
    /// Trailing keystroke average at `computed_at_ms`
    pub kpm_avg: f64,
    pub total_keys: u64,
    pub flow_windows: u32,
    pub computed_at_ms: i64,
}

/// Compute the rollup for `day`.
///
/// The keystroke ledger must already contain the live bucket.
pub fn compute_rollup(
    day: &DayKey,
    hosts: &HostLedger,
    kpm: &KpmLedger,
    index: &RuleIndex,
    now_ms: i64,
) -> DailyRollup {
    let mut totals = CategoryTotals::default();
    let mut usage: Vec<HostUsage> = Vec::new();

    if let Some(entries) = hosts.day(day) {
        for (host, entry) in entries {
            let category = index.classify_base(host);
            totals.add(category, entry.seconds);
            usage.push(HostUsage {
                host: host.clone(),
                seconds: entry.seconds,
                category,
            });
        }
    }

    // ties broken by host name so the list is stable
    usage.sort_by(|a, b| b.seconds.cmp(&a.seconds).then_with(|| a.host.cmp(&b.host)));
    usage.truncate(TOP_HOSTS);

    let (kpm_avg, total_keys, flow_windows) = match kpm.day(day) {
        Some(log) => (
            minute_rolling_average(log, now_ms, DEFAULT_KPM_WINDOW),
            log.rollup.total_keys,
            count_flow_windows(log),
        ),
        None => (0.0, 0, 0),
    };

    DailyRollup {
        day: day.clone(),
        totals,
        top_hosts: usage,
        kpm_avg,
        total_keys,
        flow_windows,
        computed_at_ms: now_ms,
    }
}

/// Count runs of at least [`FLOW_MIN_MINUTES`] consecutive minutes that were
/// both credited to a Productive host and typed at [`FLOW_KPM_THRESHOLD`] or more
pub fn count_flow_windows(log: &KpmDayLog) -> u32 {
    let mut windows = 0;
    let mut run = 0usize;
    let mut prev: Option<i64> = None;

    for &minute in &log.productive_minutes {
        let qualifies = log.minutes.get(&minute).copied().unwrap_or(0) >= FLOW_KPM_THRESHOLD;
        if !qualifies {
            run = 0;
            prev = None;
            continue;
        }

        run = match prev {
            Some(p) if minute - p == MINUTE_MS => run + 1,
            _ => 1,
        };
        prev = Some(minute);

        // count a window once, when the run first reaches the minimum
        if run == FLOW_MIN_MINUTES {
            windows += 1;
        }
    }
    windows
}

/// `dailySummary`, keyed by day
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DailySummaryLog {
    days: BTreeMap<DayKey, DailyRollup>,
}

impl DailySummaryLog {
    pub fn record(&mut self, rollup: DailyRollup) {
        self.days.insert(rollup.day.clone(), rollup);
    }

    pub fn get(&self, day: &DayKey) -> Option<&DailyRollup> {
        self.days.get(day)
    }

    pub fn prune(&mut self, today: &DayKey) -> usize {
        let before = self.days.len();
        self.days.retain(|day, _| within_retention(day, today));
        before - self.days.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const T0: i64 = 1_735_725_600_000;

    fn day() -> DayKey {
        DayKey::parse("2025-01-01").unwrap()
    }

    fn index() -> RuleIndex {
        let rules = [
            ("github.com", "Productive:code"),
            ("youtube.com", "Distracting"),
            ("reddit.com", "Distracting:social"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        RuleIndex::compile(&rules)
    }

    fn flow_log(minutes: &[(i64, u64)]) -> KpmDayLog {
        let mut log = KpmDayLog::default();
        for &(i, count) in minutes {
            let minute = T0 + i * MINUTE_MS;
            log.minutes.insert(minute, count);
            log.productive_minutes.insert(minute);
        }
        log
    }

    #[test]
    fn test_category_totals_and_top_hosts() {
        let mut hosts = HostLedger::default();
        hosts.add_seconds(&day(), "github.com", 1800.0);
        hosts.add_seconds(&day(), "youtube.com", 600.0);
        hosts.add_seconds(&day(), "reddit.com", 600.0);
        hosts.add_seconds(&day(), "news.example", 300.0);

        let rollup = compute_rollup(&day(), &hosts, &KpmLedger::default(), &index(), T0);
        assert_eq!(
            rollup.totals,
            CategoryTotals {
                productive_sec: 1800,
                distracting_sec: 1200,
                neutral_sec: 300,
            }
        );
        let order: Vec<&str> = rollup.top_hosts.iter().map(|h| h.host.as_str()).collect();
        assert_eq!(order, vec!["github.com", "reddit.com", "youtube.com", "news.example"]);
        assert_eq!(rollup.top_hosts[0].category, Category::Productive);
    }

    #[test]
    fn test_top_hosts_truncated() {
        let mut hosts = HostLedger::default();
        for i in 0..8 {
            hosts.add_seconds(&day(), &format!("site{i}.com"), 10.0 + i as f64);
        }
        let rollup = compute_rollup(&day(), &hosts, &KpmLedger::default(), &index(), T0);
        assert_eq!(rollup.top_hosts.len(), TOP_HOSTS);
        assert_eq!(rollup.top_hosts[0].host, "site7.com");
        assert_eq!(rollup.totals.total(), (10..18).sum::<u64>());
    }

    #[test]
    fn test_rollup_reads_keystroke_average() {
        let mut kpm = KpmLedger::default();
        kpm.batch_increment(&day(), T0, 100);
        kpm.batch_increment(&day(), T0 - 120_000, 80);
        let rollup = compute_rollup(&day(), &HostLedger::default(), &kpm, &index(), T0 + 5_000);
        assert!((rollup.kpm_avg - 90.0).abs() < 1e-9);
        assert_eq!(rollup.total_keys, 180);
    }

    #[test]
    fn test_flow_window_needs_ten_consecutive_minutes() {
        let nine: Vec<(i64, u64)> = (0..9).map(|i| (i, 40)).collect();
        assert_eq!(count_flow_windows(&flow_log(&nine)), 0);

        let twelve: Vec<(i64, u64)> = (0..12).map(|i| (i, 40)).collect();
        assert_eq!(count_flow_windows(&flow_log(&twelve)), 1);
    }

    #[test]
    fn test_flow_window_broken_by_slow_or_missing_minute() {
        let mut minutes: Vec<(i64, u64)> = (0..10).map(|i| (i, 30)).collect();
        minutes[5].1 = 5; // below threshold
        assert_eq!(count_flow_windows(&flow_log(&minutes)), 0);

        // two separate runs with a gap
        let runs: Vec<(i64, u64)> = (0..10).chain(11..21).map(|i| (i, 25)).collect();
        assert_eq!(count_flow_windows(&flow_log(&runs)), 2);
    }

    #[test]
    fn test_typing_off_productive_hosts_is_not_flow() {
        let mut log = KpmDayLog::default();
        for i in 0..15 {
            log.minutes.insert(T0 + i * MINUTE_MS, 60);
        }
        assert_eq!(count_flow_windows(&log), 0);
    }

    #[test]
    fn test_summary_log_prunes_old_days() {
        let mut log = DailySummaryLog::default();
        let old = DayKey::parse("2024-11-01").unwrap();
        let empty = KpmLedger::default();
        let hosts = HostLedger::default();
        log.record(compute_rollup(&old, &hosts, &empty, &index(), T0));
        log.record(compute_rollup(&day(), &hosts, &empty, &index(), T0));
        assert_eq!(log.prune(&day()), 1);
        assert!(log.get(&day()).is_some());
    }
}
