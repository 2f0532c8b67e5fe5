//! Per-host time ledger
//!
//! Day-keyed map of host → accumulated seconds plus the alert/limit state the
//! limit engine attaches to each entry. Entries older than the retention window
//! are pruned when the day rolls over.

use crate::clock::DayKey;
use crate::keystrokes::KpmLedger;
use crate::types::LimitScope;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Days of history kept for the host and keystroke ledgers
pub const RETENTION_DAYS: i64 = 30;

/// Most seconds a single tick may attribute to a host
pub const MAX_TICK_SECONDS: f64 = 120.0;

/// Usage of one host on one day
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostDayEntry {
    pub seconds: u64,
    /// Tag of the last alert raised for this entry (`"block:global"`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    /// Limit currently tripped for this host, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_hit: Option<LimitScope>,
}

/// `dailyTimeLog[day][host]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostLedger {
    days: BTreeMap<DayKey, BTreeMap<String, HostDayEntry>>,
}

/// Bookkeeping persisted alongside the ledgers to detect day changes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LedgerMeta {
    pub last_day: Option<DayKey>,
    /// Last moment time was attributed to a host
    pub last_tick_ms: Option<i64>,
    /// Host whose tab currently has focus
    pub active_host: Option<String>,
}

/// What a day change did
#[derive(Debug, Clone, PartialEq)]
pub struct DayRollover {
    pub previous_day: Option<DayKey>,
    pub pruned_host_days: usize,
    pub pruned_kpm_days: usize,
}

impl HostLedger {
    /// Credit `delta_secs` to `host` on `day` and return the seconds credited.
    ///
    /// Positive deltas are rounded and credited as at least one second so short
    /// visits never leave a permanently empty entry. Non-positive or non-finite
    /// deltas credit nothing.
    pub fn add_seconds(&mut self, day: &DayKey, host: &str, delta_secs: f64) -> u64 {
        if !delta_secs.is_finite() || delta_secs <= 0.0 || host.is_empty() {
            return 0;
        }
        let credited = (delta_secs.round() as u64).max(1);
        let entry = self.entry_mut(day, host);
        entry.seconds = entry.seconds.saturating_add(credited);
        credited
    }

    pub fn entry(&self, day: &DayKey, host: &str) -> Option<&HostDayEntry> {
        self.days.get(day).and_then(|hosts| hosts.get(host))
    }

    /// Entry for `(day, host)`, created empty on first use
    pub fn entry_mut(&mut self, day: &DayKey, host: &str) -> &mut HostDayEntry {
        self.days
            .entry(day.clone())
            .or_default()
            .entry(host.to_string())
            .or_default()
    }

    pub fn seconds(&self, day: &DayKey, host: &str) -> u64 {
        self.entry(day, host).map(|e| e.seconds).unwrap_or(0)
    }

    /// All host entries for a day
    pub fn day(&self, day: &DayKey) -> Option<&BTreeMap<String, HostDayEntry>> {
        self.days.get(day)
    }

    pub fn days(&self) -> impl Iterator<Item = &DayKey> {
        self.days.keys()
    }

    /// Drop days outside the retention window ending at `today`
    pub fn prune(&mut self, today: &DayKey) -> usize {
        let before = self.days.len();
        self.days.retain(|day, _| within_retention(day, today));
        before - self.days.len()
    }

    /// Clear alert and limit state on every entry of `day`
    pub fn clear_limit_state(&mut self, day: &DayKey) {
        if let Some(hosts) = self.days.get_mut(day) {
            for entry in hosts.values_mut() {
                entry.alert = None;
                entry.limit_hit = None;
            }
        }
    }
}

/// True when `day` is at most `RETENTION_DAYS - 1` days before `today`
pub(crate) fn within_retention(day: &DayKey, today: &DayKey) -> bool {
    match day.days_until(today) {
        Some(age) => age < RETENTION_DAYS,
        None => false,
    }
}

/// Seconds to attribute for the span since the previous tick, clamped so a
/// suspended process cannot credit minutes of stale time on resume
pub fn clamp_tick_elapsed(last_tick_ms: Option<i64>, now_ms: i64) -> f64 {
    match last_tick_ms {
        Some(last) if now_ms > last => ((now_ms - last) as f64 / 1000.0).min(MAX_TICK_SECONDS),
        _ => 0.0,
    }
}

/// Detect a day change and prune both ledgers if one happened.
///
/// Returns `None` when `today` is the day already recorded in `meta`.
pub fn rollover_if_new_day(
    meta: &mut LedgerMeta,
    today: &DayKey,
    hosts: &mut HostLedger,
    kpm: &mut KpmLedger,
) -> Option<DayRollover> {
    if meta.last_day.as_ref() == Some(today) {
        return None;
    }

    let previous_day = meta.last_day.replace(today.clone());
    let pruned_host_days = hosts.prune(today);
    let pruned_kpm_days = kpm.prune(today);

    if let Some(previous) = &previous_day {
        info!(from = %previous, to = %today, pruned_host_days, pruned_kpm_days, "day rollover");
    } else {
        debug!(day = %today, "first day recorded");
    }

    Some(DayRollover {
        previous_day,
        pruned_host_days,
        pruned_kpm_days,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn day(raw: &str) -> DayKey {
        DayKey::parse(raw).unwrap()
    }

    #[test]
    fn test_add_seconds_accumulates() {
        let mut ledger = HostLedger::default();
        let d = day("2025-01-01");
        ledger.add_seconds(&d, "example.com", 90.0);
        ledger.add_seconds(&d, "example.com", 30.0);
        assert_eq!(ledger.seconds(&d, "example.com"), 120);
    }

    #[test]
    fn test_add_seconds_clamps_to_one() {
        let mut ledger = HostLedger::default();
        let d = day("2025-01-01");
        assert_eq!(ledger.add_seconds(&d, "example.com", 0.2), 1);
        assert_eq!(ledger.add_seconds(&d, "example.com", 0.0), 0);
        assert_eq!(ledger.add_seconds(&d, "example.com", -5.0), 0);
        assert_eq!(ledger.add_seconds(&d, "example.com", f64::NAN), 0);
        assert_eq!(ledger.seconds(&d, "example.com"), 1);
    }

    #[test]
    fn test_tick_elapsed_is_clamped() {
        assert_eq!(clamp_tick_elapsed(None, 10_000), 0.0);
        assert_eq!(clamp_tick_elapsed(Some(0), 30_000), 30.0);
        assert_eq!(clamp_tick_elapsed(Some(0), 3_600_000), MAX_TICK_SECONDS);
        assert_eq!(clamp_tick_elapsed(Some(50_000), 10_000), 0.0);
    }

    #[test]
    fn test_prune_keeps_retention_window() {
        let mut ledger = HostLedger::default();
        ledger.add_seconds(&day("2025-01-01"), "old.com", 10.0);
        ledger.add_seconds(&day("2025-01-02"), "edge.com", 10.0);
        ledger.add_seconds(&day("2025-01-31"), "today.com", 10.0);

        let removed = ledger.prune(&day("2025-01-31"));
        assert_eq!(removed, 1);
        assert!(ledger.day(&day("2025-01-01")).is_none());
        assert_eq!(ledger.seconds(&day("2025-01-02"), "edge.com"), 10);
        assert_eq!(ledger.seconds(&day("2025-01-31"), "today.com"), 10);
    }

    #[test]
    fn test_rollover_only_on_day_change() {
        let mut meta = LedgerMeta::default();
        let mut hosts = HostLedger::default();
        let mut kpm = KpmLedger::default();
        hosts.add_seconds(&day("2024-11-01"), "ancient.com", 5.0);

        let first = rollover_if_new_day(&mut meta, &day("2025-01-01"), &mut hosts, &mut kpm).unwrap();
        assert_eq!(first.previous_day, None);
        assert_eq!(first.pruned_host_days, 1);

        assert!(rollover_if_new_day(&mut meta, &day("2025-01-01"), &mut hosts, &mut kpm).is_none());

        let next = rollover_if_new_day(&mut meta, &day("2025-01-02"), &mut hosts, &mut kpm).unwrap();
        assert_eq!(next.previous_day, Some(day("2025-01-01")));
        assert_eq!(meta.last_day, Some(day("2025-01-02")));
    }

    #[test]
    fn test_ledger_wire_shape() {
        let mut ledger = HostLedger::default();
        let d = day("2025-01-01");
        ledger.add_seconds(&d, "example.com", 5.0);
        ledger.entry_mut(&d, "example.com").limit_hit = Some(LimitScope::Site);

        let json = serde_json::to_value(&ledger).unwrap();
        assert_eq!(json["2025-01-01"]["example.com"]["seconds"], 5);
        assert_eq!(json["2025-01-01"]["example.com"]["limitHit"], "site");

        ledger.clear_limit_state(&d);
        assert_eq!(ledger.entry(&d, "example.com").unwrap().limit_hit, None);
    }
}
