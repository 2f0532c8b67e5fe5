//! Focus state classifier
//!
//! A pure, threshold-based mapping from the activity summary and the user's
//! sensitivity settings to `steady`, `drift` or `overload`. Nothing is carried
//! between calls; the state is recomputed from scratch every time.

use crate::config::CoreConfig;
use crate::summary::{ActivitySummary, IDLE_RESET_MS};
use crate::types::{FocusState, Sensitivity};
use serde::{Deserialize, Serialize};

/// Floor for the overload threshold (15 minutes)
pub const MIN_OVERLOAD_MS: i64 = 15 * 60_000;

/// Settings the classifier depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierConfig {
    pub sensitivity: Sensitivity,
    pub break_interval_minutes: u32,
}

impl From<&CoreConfig> for ClassifierConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            sensitivity: config.drift_sensitivity,
            break_interval_minutes: config.break_interval_minutes,
        }
    }
}

impl ClassifierConfig {
    /// Continuous activity that counts as overload
    pub fn overload_threshold_ms(&self) -> i64 {
        (self.break_interval_minutes as i64 * 60_000).max(MIN_OVERLOAD_MS)
    }
}

/// Intermediate values behind a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateReading {
    pub switch_count: usize,
    pub idle_elapsed_ms: i64,
    pub effective_focus_streak_ms: i64,
    pub overload_threshold_ms: i64,
    pub has_drifted: bool,
    pub has_overloaded: bool,
    pub state: FocusState,
}

/// Classify with the full reading attached
pub fn evaluate_state(summary: &ActivitySummary, config: &ClassifierConfig, now_ms: i64) -> StateReading {
    let switch_count = summary.recent_switch_count(now_ms);
    let idle_elapsed_ms = summary.idle_elapsed_ms(now_ms);
    let effective_focus_streak_ms = summary.effective_focus_streak_ms(now_ms);
    let overload_threshold_ms = config.overload_threshold_ms();

    let has_drifted = switch_count > config.sensitivity.max_switches()
        || idle_elapsed_ms >= config.sensitivity.idle_threshold_ms();

    // a real break (>= the idle reset window) rules overload out
    let has_overloaded = effective_focus_streak_ms >= overload_threshold_ms
        && summary.last_idle_duration_ms < IDLE_RESET_MS;

    let state = if has_overloaded {
        FocusState::Overload
    } else if has_drifted {
        FocusState::Drift
    } else {
        FocusState::Steady
    };

    StateReading {
        switch_count,
        idle_elapsed_ms,
        effective_focus_streak_ms,
        overload_threshold_ms,
        has_drifted,
        has_overloaded,
        state,
    }
}

/// Classify the current focus state
pub fn determine_state(summary: &ActivitySummary, config: &ClassifierConfig, now_ms: i64) -> FocusState {
    evaluate_state(summary, config, now_ms).state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::DayKey;
    use crate::types::ActivityState;

    const NOW: i64 = 1_735_725_600_000;
    const MINUTE: i64 = 60_000;

    fn summary() -> ActivitySummary {
        ActivitySummary::fresh(DayKey::parse("2025-01-01").unwrap(), NOW)
    }

    fn medium() -> ClassifierConfig {
        ClassifierConfig {
            sensitivity: Sensitivity::Medium,
            break_interval_minutes: 45,
        }
    }

    #[test]
    fn test_many_switches_is_drift() {
        let mut s = summary();
        s.focus_streak_ms = 10 * MINUTE;
        for i in (0..5).rev() {
            s.record_domain_switch(NOW - i * MINUTE);
        }
        assert_eq!(determine_state(&s, &medium(), NOW), FocusState::Drift);
    }

    #[test]
    fn test_switches_at_threshold_stay_steady() {
        let mut s = summary();
        for i in (0..4).rev() {
            s.record_domain_switch(NOW - i * MINUTE);
        }
        assert_eq!(determine_state(&s, &medium(), NOW), FocusState::Steady);
    }

    #[test]
    fn test_long_unbroken_streak_is_overload() {
        let mut s = summary();
        s.focus_streak_ms = 50 * MINUTE;
        s.last_idle_duration_ms = 0;
        let reading = evaluate_state(&s, &medium(), NOW);
        assert_eq!(reading.overload_threshold_ms, 45 * MINUTE);
        assert_eq!(reading.state, FocusState::Overload);
    }

    #[test]
    fn test_overload_beats_drift() {
        let mut s = summary();
        s.focus_streak_ms = 50 * MINUTE;
        for i in (0..8).rev() {
            s.record_domain_switch(NOW - i * MINUTE);
        }
        let reading = evaluate_state(&s, &medium(), NOW);
        assert!(reading.has_drifted);
        assert_eq!(reading.state, FocusState::Overload);
    }

    #[test]
    fn test_recent_real_break_prevents_overload() {
        let mut s = summary();
        s.focus_streak_ms = 50 * MINUTE;
        s.last_idle_duration_ms = 3 * MINUTE;
        assert_eq!(determine_state(&s, &medium(), NOW), FocusState::Steady);
    }

    #[test]
    fn test_open_active_segment_counts_toward_streak() {
        let mut s = summary();
        s.focus_streak_ms = 10 * MINUTE;
        // active since NOW, evaluated 36 minutes later
        assert_eq!(determine_state(&s, &medium(), NOW + 36 * MINUTE), FocusState::Overload);
    }

    #[test]
    fn test_sustained_idle_is_drift() {
        let mut s = summary();
        s.record_idle_transition(ActivityState::Idle, NOW);
        let high = ClassifierConfig {
            sensitivity: Sensitivity::High,
            break_interval_minutes: 45,
        };
        assert_eq!(determine_state(&s, &high, NOW + 3 * MINUTE), FocusState::Drift);
        assert_eq!(determine_state(&s, &medium(), NOW + 3 * MINUTE), FocusState::Steady);
    }

    #[test]
    fn test_overload_threshold_floor() {
        let short = ClassifierConfig {
            sensitivity: Sensitivity::Low,
            break_interval_minutes: 5,
        };
        assert_eq!(short.overload_threshold_ms(), MIN_OVERLOAD_MS);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let mut s = summary();
        s.focus_streak_ms = 20 * MINUTE;
        s.record_domain_switch(NOW - MINUTE);
        let first = evaluate_state(&s, &medium(), NOW);
        let second = evaluate_state(&s, &medium(), NOW);
        assert_eq!(first, second);
    }
}
