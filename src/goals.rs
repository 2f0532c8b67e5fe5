//! Goal engine and scoreboard
//!
//! Compares today's rollup against the user's daily goals with a
//! time-of-day-aware pacing curve, and keeps a consecutive-day streak plus a
//! short rolling history once each day is over.

use crate::clock::DayKey;
use crate::config::DailyGoals;
use crate::types::GoalState;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Days kept in the scoreboard history
pub const HISTORY_LEN: usize = 7;

/// Hour of day at which expected progress starts ramping up
pub const PACE_START_HOUR: f64 = 1.0;

/// Hour of day at which the full target is expected
pub const PACE_END_HOUR: f64 = 10.0;

/// Fraction of expected progress that still counts as "at risk"
pub const PACE_TOLERANCE: f64 = 0.8;

/// Remaining share of the target that counts as near the finish line
pub const NEAR_TARGET_FRACTION: f64 = 0.1;

/// Pacing needed for a met flow target to soften the verdict
pub const FLOW_PACING_MIN: f64 = 0.75;

/// Share of the distracting cap that raises at-risk
pub const DISTRACTING_WARN_FRACTION: f64 = 0.8;

/// Inputs to one goal evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalInputs {
    pub productive_sec: u64,
    pub distracting_sec: u64,
    pub flow_done: u32,
    /// Fractional local hour, 0.0..24.0
    pub hour: f64,
    /// A daily-scoped limit is tripped for some host today
    pub daily_limit_tripped: bool,
}

/// `goalStatus`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalStatus {
    pub day: DayKey,
    pub state: GoalState,
    pub pct_productive: f64,
    pub expected_pct: f64,
    pub productive_sec: u64,
    pub remaining_productive_sec: u64,
    pub distracting_sec: u64,
    /// Seconds left under the distracting cap, if one is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distracting_remaining_sec: Option<u64>,
    /// Seconds beyond the distracting cap
    pub overage_sec: u64,
    pub flow_done: u32,
    pub flow_target: u32,
    pub limit_tripped: bool,
}

/// Progress expected by `hour`: a linear ramp from hour 1 (0%) to hour 10 (100%)
pub fn expected_pct(hour: f64) -> f64 {
    ((hour - PACE_START_HOUR) / (PACE_END_HOUR - PACE_START_HOUR)).clamp(0.0, 1.0)
}

/// Evaluate today's goals
pub fn evaluate_goals(day: &DayKey, goals: &DailyGoals, inputs: &GoalInputs) -> GoalStatus {
    let target = goals.productive_sec_target;
    let pct_productive = if target > 0 {
        (inputs.productive_sec as f64 / target as f64).min(1.0)
    } else {
        1.0
    };
    let expected = expected_pct(inputs.hour);
    let remaining_productive_sec = target.saturating_sub(inputs.productive_sec);

    let mut state = if pct_productive >= 1.0 {
        GoalState::Passing
    } else if pct_productive >= PACE_TOLERANCE * expected {
        GoalState::AtRisk
    } else {
        GoalState::Failing
    };

    // close to the target: encourage rather than fail
    let near_target = (remaining_productive_sec as f64) <= NEAR_TARGET_FRACTION * target as f64;
    if state == GoalState::Failing && near_target {
        state = GoalState::AtRisk;
    }

    let flow_target = goals.flow_windows_target;
    if state != GoalState::Passing && flow_target > 0 && inputs.flow_done >= flow_target {
        let pacing = if expected > 0.0 { pct_productive / expected } else { 1.0 };
        if pacing >= FLOW_PACING_MIN {
            state = GoalState::AtRisk;
        }
    }

    let cap = goals.distracting_sec_cap;
    let (distracting_remaining_sec, overage_sec) = if cap > 0 {
        let usage = inputs.distracting_sec as f64 / cap as f64;
        if usage >= 1.0 {
            state = GoalState::Failing;
        } else if usage >= DISTRACTING_WARN_FRACTION {
            state = state.worst(GoalState::AtRisk);
        }
        (
            Some(cap.saturating_sub(inputs.distracting_sec)),
            inputs.distracting_sec.saturating_sub(cap),
        )
    } else {
        (None, 0)
    };

    if inputs.daily_limit_tripped {
        state = GoalState::Failing;
    }

    GoalStatus {
        day: day.clone(),
        state,
        pct_productive,
        expected_pct: expected,
        productive_sec: inputs.productive_sec,
        remaining_productive_sec,
        distracting_sec: inputs.distracting_sec,
        distracting_remaining_sec,
        overage_sec,
        flow_done: inputs.flow_done,
        flow_target,
        limit_tripped: inputs.daily_limit_tripped,
    }
}

/// One finished day in the scoreboard history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    pub day: DayKey,
    pub state: GoalState,
    pub pct_productive: f64,
}

/// `scoreboard`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scoreboard {
    /// Consecutive PASSING days ending with the last scored day
    pub streak: u32,
    pub best_streak: u32,
    /// Most recent last
    pub history: VecDeque<ScoreEntry>,
    pub last_scored_day: Option<DayKey>,
}

impl Scoreboard {
    /// Score a finished day from its final goal status.
    ///
    /// Returns false when the day, or a later one, was already scored. A gap
    /// of unscored days breaks the streak.
    pub fn record_day(&mut self, status: &GoalStatus) -> bool {
        let gap = match &self.last_scored_day {
            Some(last) if &status.day <= last => return false,
            Some(last) => last.days_until(&status.day) != Some(1),
            None => false,
        };
        if gap {
            self.streak = 0;
        }

        if status.state == GoalState::Passing {
            self.streak += 1;
            self.best_streak = self.best_streak.max(self.streak);
        } else {
            self.streak = 0;
        }

        self.history.push_back(ScoreEntry {
            day: status.day.clone(),
            state: status.state,
            pct_productive: status.pct_productive,
        });
        while self.history.len() > HISTORY_LEN {
            self.history.pop_front();
        }
        self.last_scored_day = Some(status.day.clone());

        debug!(day = %status.day, state = ?status.state, streak = self.streak, "scored day");
        true
    }

    /// PASSING days inside the history window
    pub fn passing_days(&self) -> usize {
        self.history
            .iter()
            .filter(|entry| entry.state == GoalState::Passing)
            .count()
    }
}
