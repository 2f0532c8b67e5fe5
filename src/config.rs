//! User configuration written by the options page
//!
//! The wire shape is camelCase JSON. Every field has a default so partially
//! written or older configuration documents still load.

use crate::error::CoreError;
use crate::signals::normalize_host;
use crate::storage::{
    load_or_default, save, Storage, KEY_BANNED_HOSTS, KEY_CATEGORIZATION_RULES,
    KEY_PARENT_MODE_CONFIG, KEY_SETTINGS, KEY_SITE_LIMITS,
};
use crate::types::Sensitivity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default break interval used for the overload threshold
pub const DEFAULT_BREAK_INTERVAL_MINUTES: u32 = 45;

/// Longest break interval accepted from the options page (8 hours)
pub const MAX_BREAK_INTERVAL_MINUTES: u32 = 480;

/// Daily goals compared against the rollup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyGoals {
    /// Productive seconds to reach today (0 = no target)
    pub productive_sec_target: u64,
    /// Distracting seconds allowed today (0 = no cap)
    pub distracting_sec_cap: u64,
    /// Flow windows to complete today (0 = no target)
    pub flow_windows_target: u32,
}

impl Default for DailyGoals {
    fn default() -> Self {
        Self {
            productive_sec_target: 3 * 3600,
            distracting_sec_cap: 3600,
            flow_windows_target: 2,
        }
    }
}

/// Kind of parental limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentLimitType {
    Daily,
    Session,
}

/// One parental limit for a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentLimit {
    pub host: String,
    #[serde(rename = "type")]
    pub limit_type: ParentLimitType,
    pub minutes: u32,
}

/// Parent mode settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParentModeConfig {
    pub enabled: bool,
    pub blocked_hosts: Vec<String>,
    pub limits: Vec<ParentLimit>,
}

/// Complete configuration consumed by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    pub break_interval_minutes: u32,
    pub drift_sensitivity: Sensitivity,
    /// Daily allowance for each Distracting host (0 = disabled)
    pub distracting_limit_minutes: u32,
    pub daily_goals: DailyGoals,
    /// Pattern → label, e.g. `"github.com": "Productive:code"`
    pub classification_rules: BTreeMap<String, String>,
    /// Host → allowed seconds per day
    pub site_limits: BTreeMap<String, u64>,
    pub banned_hosts: Vec<String>,
    pub parent_mode: ParentModeConfig,
    /// Drop keystroke batches entirely while set
    pub privacy_mode: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            break_interval_minutes: DEFAULT_BREAK_INTERVAL_MINUTES,
            drift_sensitivity: Sensitivity::default(),
            distracting_limit_minutes: 0,
            daily_goals: DailyGoals::default(),
            classification_rules: BTreeMap::new(),
            site_limits: BTreeMap::new(),
            banned_hosts: Vec::new(),
            parent_mode: ParentModeConfig::default(),
            privacy_mode: false,
        }
    }
}

/// The scalar settings persisted under `settings`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Settings {
    break_interval_minutes: u32,
    drift_sensitivity: Sensitivity,
    distracting_limit_minutes: u32,
    daily_goals: DailyGoals,
    privacy_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let config = CoreConfig::default();
        Self {
            break_interval_minutes: config.break_interval_minutes,
            drift_sensitivity: config.drift_sensitivity,
            distracting_limit_minutes: config.distracting_limit_minutes,
            daily_goals: config.daily_goals,
            privacy_mode: config.privacy_mode,
        }
    }
}

impl CoreConfig {
    /// Parse and validate a configuration document
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let config: CoreConfig = serde_json::from_str(json)
            .map_err(|e| CoreError::InvalidConfig(format!("failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config.normalized())
    }

    /// Reject values the engine cannot act on
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.break_interval_minutes == 0 || self.break_interval_minutes > MAX_BREAK_INTERVAL_MINUTES {
            return Err(CoreError::InvalidConfig(format!(
                "breakIntervalMinutes must be between 1 and {MAX_BREAK_INTERVAL_MINUTES}, got {}",
                self.break_interval_minutes
            )));
        }

        for (host, seconds) in &self.site_limits {
            if normalize_host(host).is_empty() {
                return Err(CoreError::InvalidConfig("siteLimits contains an empty host".to_string()));
            }
            if *seconds == 0 {
                return Err(CoreError::InvalidConfig(format!(
                    "siteLimits for {host} must be greater than zero"
                )));
            }
        }

        if self.banned_hosts.iter().any(|h| normalize_host(h).is_empty()) {
            return Err(CoreError::InvalidConfig("bannedHosts contains an empty host".to_string()));
        }

        for limit in &self.parent_mode.limits {
            if normalize_host(&limit.host).is_empty() {
                return Err(CoreError::InvalidConfig(
                    "parentMode.limits contains an empty host".to_string(),
                ));
            }
            if limit.minutes == 0 {
                return Err(CoreError::InvalidConfig(format!(
                    "parental limit for {} must be at least one minute",
                    limit.host
                )));
            }
        }

        Ok(())
    }

    /// Copy with every host key lower-cased and stripped of `www.`
    pub fn normalized(mut self) -> Self {
        self.site_limits = self
            .site_limits
            .into_iter()
            .map(|(host, seconds)| (normalize_host(&host), seconds))
            .filter(|(host, _)| !host.is_empty())
            .collect();
        self.banned_hosts = normalize_list(&self.banned_hosts);
        self.parent_mode.blocked_hosts = normalize_list(&self.parent_mode.blocked_hosts);
        for limit in &mut self.parent_mode.limits {
            limit.host = normalize_host(&limit.host);
        }
        self
    }

    /// Assemble the configuration from its persisted keys
    pub fn load<S: Storage + ?Sized>(store: &S) -> Result<Self, CoreError> {
        let settings: Settings = load_or_default(store, KEY_SETTINGS)?;
        let config = CoreConfig {
            break_interval_minutes: settings
                .break_interval_minutes
                .clamp(1, MAX_BREAK_INTERVAL_MINUTES),
            drift_sensitivity: settings.drift_sensitivity,
            distracting_limit_minutes: settings.distracting_limit_minutes,
            daily_goals: settings.daily_goals,
            privacy_mode: settings.privacy_mode,
            classification_rules: load_or_default(store, KEY_CATEGORIZATION_RULES)?,
            site_limits: load_or_default(store, KEY_SITE_LIMITS)?,
            banned_hosts: load_or_default(store, KEY_BANNED_HOSTS)?,
            parent_mode: load_or_default(store, KEY_PARENT_MODE_CONFIG)?,
        };
        Ok(config.normalized())
    }

    /// Split the configuration across its persisted keys
    pub fn store<S: Storage + ?Sized>(&self, store: &mut S) -> Result<(), CoreError> {
        let settings = Settings {
            break_interval_minutes: self.break_interval_minutes,
            drift_sensitivity: self.drift_sensitivity,
            distracting_limit_minutes: self.distracting_limit_minutes,
            daily_goals: self.daily_goals.clone(),
            privacy_mode: self.privacy_mode,
        };
        save(store, KEY_SETTINGS, &settings)?;
        save(store, KEY_CATEGORIZATION_RULES, &self.classification_rules)?;
        save(store, KEY_SITE_LIMITS, &self.site_limits)?;
        save(store, KEY_BANNED_HOSTS, &self.banned_hosts)?;
        save(store, KEY_PARENT_MODE_CONFIG, &self.parent_mode)?;
        Ok(())
    }
}

fn normalize_list(hosts: &[String]) -> Vec<String> {
    let mut out: Vec<String> = hosts
        .iter()
        .map(|h| normalize_host(h))
        .filter(|h| !h.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = CoreConfig::from_json("{}").unwrap();
        assert_eq!(config.break_interval_minutes, 45);
        assert_eq!(config.drift_sensitivity, Sensitivity::Medium);
        assert_eq!(config.daily_goals.productive_sec_target, 10_800);
        assert!(!config.parent_mode.enabled);
    }

    #[test]
    fn test_full_document() {
        let json = r#"{
            "breakIntervalMinutes": 30,
            "driftSensitivity": "high",
            "distractingLimitMinutes": 60,
            "dailyGoals": { "productiveSecTarget": 7200, "distractingSecCap": 1800, "flowWindowsTarget": 1 },
            "classificationRules": { "github.com": "Productive:code", "youtube": "Distracting" },
            "siteLimits": { "WWW.Reddit.com": 900 },
            "bannedHosts": ["casino.example", "Casino.example"],
            "parentMode": {
                "enabled": true,
                "blockedHosts": ["games.example"],
                "limits": [{ "host": "video.example", "type": "session", "minutes": 20 }]
            }
        }"#;

        let config = CoreConfig::from_json(json).unwrap();
        assert_eq!(config.drift_sensitivity, Sensitivity::High);
        assert_eq!(config.site_limits.get("reddit.com"), Some(&900));
        assert_eq!(config.banned_hosts, vec!["casino.example".to_string()]);
        assert_eq!(config.parent_mode.limits[0].limit_type, ParentLimitType::Session);
    }

    #[test]
    fn test_validation_rejects_zero_parent_limit() {
        let json = r#"{ "parentMode": { "enabled": true, "limits": [{ "host": "a.com", "type": "daily", "minutes": 0 }] } }"#;
        assert!(matches!(CoreConfig::from_json(json), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_validation_rejects_zero_break_interval() {
        assert!(CoreConfig::from_json(r#"{ "breakIntervalMinutes": 0 }"#).is_err());
    }

    #[test]
    fn test_negative_values_fail_to_parse() {
        assert!(CoreConfig::from_json(r#"{ "distractingLimitMinutes": -5 }"#).is_err());
    }

    #[test]
    fn test_store_and_load_across_keys() {
        let mut store = MemoryStore::new();
        let mut config = CoreConfig::default();
        config.distracting_limit_minutes = 45;
        config
            .classification_rules
            .insert("news.example".to_string(), "Distracting".to_string());
        config.store(&mut store).unwrap();

        let loaded = CoreConfig::load(&store).unwrap();
        assert_eq!(loaded, config);
        assert!(store.get(KEY_CATEGORIZATION_RULES).unwrap().is_some());
    }
}
