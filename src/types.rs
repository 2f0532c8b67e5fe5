//! Shared value types
//!
//! Small enums that flow between the ledgers, the classifier, the goal engine
//! and the limit engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the user is currently interacting with the browser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    #[default]
    Active,
    #[serde(alias = "locked")]
    Idle,
}

impl ActivityState {
    /// Lenient parse used by normalization; unknown values yield `None`
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            // the platform reports a locked screen as its own state
            "idle" | "locked" => Some(Self::Idle),
            _ => None,
        }
    }
}

/// Coarse behavioral state derived by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusState {
    #[default]
    Steady,
    Drift,
    Overload,
}

impl FocusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Steady => "steady",
            Self::Drift => "drift",
            Self::Overload => "overload",
        }
    }
}

impl fmt::Display for FocusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical focus bucket for a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Category {
    Productive,
    Distracting,
    #[default]
    Neutral,
}

impl Category {
    pub const ALL: [Category; 3] = [Self::Productive, Self::Distracting, Self::Neutral];

    /// Map a free-form rule label (`"Productive:deep-work"`) onto a bucket.
    ///
    /// The segment before the first `:` decides; anything unknown is Neutral.
    pub fn from_label(label: &str) -> Self {
        let base = label.split(':').next().unwrap_or("").trim();
        if base.eq_ignore_ascii_case("productive") {
            Self::Productive
        } else if base.eq_ignore_ascii_case("distracting") {
            Self::Distracting
        } else {
            Self::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Productive => "Productive",
            Self::Distracting => "Distracting",
            Self::Neutral => "Neutral",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Daily goal verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoalState {
    #[default]
    Passing,
    AtRisk,
    Failing,
}

impl GoalState {
    /// Severity rank; larger is worse
    pub fn severity(&self) -> u8 {
        match self {
            Self::Passing => 0,
            Self::AtRisk => 1,
            Self::Failing => 2,
        }
    }

    /// The more severe of two states
    pub fn worst(self, other: GoalState) -> GoalState {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

/// Drift sensitivity preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl Sensitivity {
    /// Most tab switches tolerated in the trailing window before drift
    pub fn max_switches(&self) -> usize {
        match self {
            Self::Low => 6,
            Self::Medium => 4,
            Self::High => 3,
        }
    }

    /// Idle time tolerated before drift, in milliseconds
    pub fn idle_threshold_ms(&self) -> i64 {
        let minutes = match self {
            Self::Low => 7,
            Self::Medium => 5,
            Self::High => 3,
        };
        minutes * 60_000
    }
}

/// Which limit produced a verdict; serialized as the reason code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Banned,
    ParentBlocked,
    Global,
    Site,
    ParentDaily,
    ParentSession,
}

impl LimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Banned => "banned",
            Self::ParentBlocked => "parent_blocked",
            Self::Global => "global",
            Self::Site => "site",
            Self::ParentDaily => "parent_daily",
            Self::ParentSession => "parent_session",
        }
    }

    /// Tie-break order when two limits share a threshold
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Self::Banned => 0,
            Self::ParentBlocked => 1,
            Self::ParentDaily => 2,
            Self::ParentSession => 3,
            Self::Site => 4,
            Self::Global => 5,
        }
    }

    /// Daily-scoped limits force the goal status to FAILING when tripped
    pub fn is_daily(&self) -> bool {
        matches!(self, Self::Global | Self::Site | Self::ParentDaily)
    }
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of one-shot alert raised by the limit engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Warning,
    Blocked,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warn",
            Self::Blocked => "block",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_label() {
        assert_eq!(Category::from_label("Productive"), Category::Productive);
        assert_eq!(Category::from_label("Distracting:social"), Category::Distracting);
        assert_eq!(Category::from_label("productive:docs"), Category::Productive);
        assert_eq!(Category::from_label("Learning"), Category::Neutral);
        assert_eq!(Category::from_label(""), Category::Neutral);
    }

    #[test]
    fn test_goal_state_serialization() {
        let json = serde_json::to_string(&GoalState::AtRisk).unwrap();
        assert_eq!(json, "\"AT_RISK\"");
        assert_eq!(GoalState::Passing.worst(GoalState::Failing), GoalState::Failing);
        assert_eq!(GoalState::AtRisk.worst(GoalState::Passing), GoalState::AtRisk);
    }

    #[test]
    fn test_sensitivity_thresholds() {
        assert_eq!(Sensitivity::Low.max_switches(), 6);
        assert_eq!(Sensitivity::Medium.max_switches(), 4);
        assert_eq!(Sensitivity::High.max_switches(), 3);
        assert_eq!(Sensitivity::Medium.idle_threshold_ms(), 300_000);
        assert_eq!(Sensitivity::High.idle_threshold_ms(), 180_000);
    }

    #[test]
    fn test_activity_state_parse() {
        assert_eq!(ActivityState::parse("IDLE"), Some(ActivityState::Idle));
        assert_eq!(ActivityState::parse("locked"), Some(ActivityState::Idle));
        assert_eq!(ActivityState::parse("asleep"), None);
    }

    #[test]
    fn test_limit_scope_reason_codes() {
        let json = serde_json::to_string(&LimitScope::ParentSession).unwrap();
        assert_eq!(json, "\"parent_session\"");
        assert_eq!(LimitScope::Global.to_string(), "global");
    }
}
