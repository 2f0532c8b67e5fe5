//! Activity summary store
//!
//! One live record describes "today": per-host seconds mirrored from the host
//! ledger, a rolling list of recent tab switches, cumulative active/idle time
//! and the current focus streak. The classifier reads it and writes its verdict
//! back into `focus_state` for other consumers.

use crate::clock::DayKey;
use crate::types::{ActivityState, FocusState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Trailing window for counting tab switches (10 minutes)
pub const SWITCH_WINDOW_MS: i64 = 10 * 60_000;

/// Most switch timestamps retained
pub const MAX_RECENT_SWITCHES: usize = 20;

/// Idle spans at least this long break the focus streak (2 minutes)
pub const IDLE_RESET_MS: i64 = 2 * 60_000;

/// A closed active or idle segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub state: ActivityState,
    pub start_ms: i64,
    pub end_ms: i64,
}

impl Segment {
    pub fn duration_ms(&self) -> i64 {
        (self.end_ms - self.start_ms).max(0)
    }
}

/// The live activity record for one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    pub date: DayKey,
    /// Host → seconds today, never decreasing within the day
    pub domain_stats: BTreeMap<String, u64>,
    /// Switch timestamps inside the trailing window, oldest first
    pub domain_switches: Vec<i64>,
    pub total_focus_ms: i64,
    pub total_idle_ms: i64,
    /// Active time since the last idle span long enough to reset it,
    /// excluding the segment still in progress
    pub focus_streak_ms: i64,
    pub last_state: ActivityState,
    /// Start of the segment in progress
    pub state_since_ms: i64,
    /// Most recently closed segment, if any
    pub last_segment: Option<Segment>,
    /// Length of the most recently completed idle span
    pub last_idle_duration_ms: i64,
    pub focus_state: FocusState,
    pub updated_at_ms: i64,
}

impl ActivitySummary {
    /// An empty record for `day`, active since `now_ms`
    pub fn fresh(day: DayKey, now_ms: i64) -> Self {
        Self {
            date: day,
            domain_stats: BTreeMap::new(),
            domain_switches: Vec::new(),
            total_focus_ms: 0,
            total_idle_ms: 0,
            focus_streak_ms: 0,
            last_state: ActivityState::Active,
            state_since_ms: now_ms,
            last_segment: None,
            last_idle_duration_ms: 0,
            focus_state: FocusState::Steady,
            updated_at_ms: now_ms,
        }
    }

    /// Rebuild a well-formed record for `today` from whatever was persisted.
    ///
    /// A record from another day is replaced by a fresh one. Missing or invalid
    /// fields fall back to safe defaults; this never fails.
    pub fn normalize(raw: Option<&Value>, today: &DayKey, now_ms: i64) -> Self {
        let fresh = Self::fresh(today.clone(), now_ms);
        let Some(obj) = raw.and_then(Value::as_object) else {
            return fresh;
        };

        let same_day = obj
            .get("date")
            .and_then(Value::as_str)
            .and_then(DayKey::parse)
            .is_some_and(|day| &day == today);
        if !same_day {
            return fresh;
        }

        let domain_stats = obj
            .get("domainStats")
            .and_then(Value::as_object)
            .map(|stats| {
                stats
                    .iter()
                    .filter(|(host, _)| !host.is_empty())
                    .filter_map(|(host, v)| non_negative(v).map(|secs| (host.clone(), secs as u64)))
                    .collect()
            })
            .unwrap_or_default();

        let mut domain_switches: Vec<i64> = obj
            .get("domainSwitches")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();
        domain_switches.sort_unstable();
        retain_recent(&mut domain_switches, now_ms);

        let last_state = obj
            .get("lastState")
            .and_then(Value::as_str)
            .and_then(ActivityState::parse)
            .unwrap_or_default();

        let state_since_ms = obj
            .get("stateSinceMs")
            .and_then(Value::as_i64)
            .filter(|ts| (0..=now_ms).contains(ts))
            .unwrap_or(now_ms);

        let last_segment = obj
            .get("lastSegment")
            .cloned()
            .and_then(|v| serde_json::from_value::<Segment>(v).ok())
            .filter(|seg| seg.start_ms <= seg.end_ms);

        let focus_state = obj
            .get("focusState")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let updated_at_ms = obj
            .get("updatedAtMs")
            .and_then(Value::as_i64)
            .filter(|ts| (0..=now_ms).contains(ts))
            .unwrap_or(now_ms);

        Self {
            date: today.clone(),
            domain_stats,
            domain_switches,
            total_focus_ms: ms_field(obj.get("totalFocusMs")),
            total_idle_ms: ms_field(obj.get("totalIdleMs")),
            focus_streak_ms: ms_field(obj.get("focusStreakMs")),
            last_state,
            state_since_ms,
            last_segment,
            last_idle_duration_ms: ms_field(obj.get("lastIdleDurationMs")),
            focus_state,
            updated_at_ms,
        }
    }

    /// Apply an active/idle transition. Returns false when the state is unchanged.
    pub fn record_idle_transition(&mut self, to: ActivityState, now_ms: i64) -> bool {
        if to == self.last_state {
            return false;
        }

        let span = (now_ms - self.state_since_ms).max(0);
        match (self.last_state, to) {
            (ActivityState::Active, ActivityState::Idle) => {
                self.total_focus_ms += span;
                self.focus_streak_ms += span;
            }
            (ActivityState::Idle, ActivityState::Active) => {
                self.total_idle_ms += span;
                self.last_idle_duration_ms = span;
                if span >= IDLE_RESET_MS {
                    self.focus_streak_ms = 0;
                }
            }
            _ => {}
        }

        self.last_segment = Some(Segment {
            state: self.last_state,
            start_ms: self.state_since_ms,
            end_ms: now_ms.max(self.state_since_ms),
        });
        self.last_state = to;
        self.state_since_ms = now_ms;
        self.updated_at_ms = now_ms;
        true
    }

    /// Record a tab switch and trim the list to the trailing window.
    ///
    /// The window ends at the latest switch seen, so a clock that steps
    /// backwards does not wipe the list.
    pub fn record_domain_switch(&mut self, now_ms: i64) {
        self.domain_switches.push(now_ms);
        self.domain_switches.sort_unstable();
        let anchor = self.switch_anchor_ms(now_ms);
        retain_recent(&mut self.domain_switches, anchor);
        self.updated_at_ms = self.updated_at_ms.max(now_ms);
    }

    /// Mirror seconds credited by the host ledger
    pub fn record_domain_seconds(&mut self, host: &str, seconds: u64) {
        *self.domain_stats.entry(host.to_string()).or_insert(0) += seconds;
    }

    /// Switches inside the trailing window ending at `now_ms`, or at the
    /// latest recorded switch when the clock reads earlier than that
    pub fn recent_switch_count(&self, now_ms: i64) -> usize {
        let anchor = self.switch_anchor_ms(now_ms);
        self.domain_switches
            .iter()
            .filter(|ts| **ts <= anchor && anchor - **ts <= SWITCH_WINDOW_MS)
            .count()
    }

    fn switch_anchor_ms(&self, now_ms: i64) -> i64 {
        self.domain_switches.last().map_or(now_ms, |last| (*last).max(now_ms))
    }

    /// Time spent idle so far, zero while active
    pub fn idle_elapsed_ms(&self, now_ms: i64) -> i64 {
        match self.last_state {
            ActivityState::Idle => (now_ms - self.state_since_ms).max(0),
            ActivityState::Active => 0,
        }
    }

    /// Stored streak plus the active segment still in progress
    pub fn effective_focus_streak_ms(&self, now_ms: i64) -> i64 {
        match self.last_state {
            ActivityState::Active => self.focus_streak_ms + (now_ms - self.state_since_ms).max(0),
            ActivityState::Idle => self.focus_streak_ms,
        }
    }
}

fn retain_recent(switches: &mut Vec<i64>, anchor_ms: i64) {
    switches.retain(|ts| *ts <= anchor_ms && anchor_ms - *ts <= SWITCH_WINDOW_MS);
    if switches.len() > MAX_RECENT_SWITCHES {
        let excess = switches.len() - MAX_RECENT_SWITCHES;
        switches.drain(..excess);
    }
}

fn non_negative(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite() && *v >= 0.0)
}

fn ms_field(value: Option<&Value>) -> i64 {
    value.and_then(non_negative).map(|v| v as i64).unwrap_or(0)
}
