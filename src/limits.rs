//! Limit enforcement
//!
//! For the active host, gathers every applicable limit (banned and parent-blocked
//! hosts, the global Distracting allowance, per-site allowances and parental
//! daily/session limits) and turns them into an ok/warn/block verdict. Alert tags
//! on the host ledger entry keep each trip or warning from firing twice.

use crate::clock::DayKey;
use crate::config::{CoreConfig, ParentLimitType};
use crate::host_ledger::HostLedger;
use crate::signals::host_matches;
use crate::types::{AlertKind, Category, LimitScope};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Remaining seconds at or below which a warning is raised
pub const WARNING_BAND_SECS: i64 = 30;

/// Inactivity after which a parental session starts over (30 minutes)
pub const SESSION_GAP_MS: i64 = 30 * 60_000;

/// Limits compiled from the configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitTable {
    global_secs: Option<u64>,
    /// Most specific host first
    site: Vec<(String, u64)>,
    banned: Vec<String>,
    parent_blocked: Vec<String>,
    parent_daily: Vec<(String, u64)>,
    parent_session: Vec<(String, u64)>,
}

impl LimitTable {
    pub fn from_config(config: &CoreConfig) -> Self {
        let global_secs = (config.distracting_limit_minutes > 0)
            .then(|| u64::from(config.distracting_limit_minutes) * 60);

        let mut site: Vec<(String, u64)> = config
            .site_limits
            .iter()
            .map(|(host, secs)| (host.clone(), *secs))
            .collect();
        site.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        let mut table = LimitTable {
            global_secs,
            site,
            banned: config.banned_hosts.clone(),
            ..Default::default()
        };

        let parent = &config.parent_mode;
        if parent.enabled {
            table.parent_blocked = parent.blocked_hosts.clone();
            for limit in &parent.limits {
                let entry = (limit.host.clone(), u64::from(limit.minutes) * 60);
                match limit.limit_type {
                    ParentLimitType::Daily => table.parent_daily.push(entry),
                    ParentLimitType::Session => table.parent_session.push(entry),
                }
            }
        }
        table
    }

    /// Every limit that applies to `host`
    pub fn candidates(
        &self,
        host: &str,
        category: Category,
        used_today: u64,
        used_session: u64,
    ) -> Vec<LimitCandidate> {
        let mut out = Vec::new();

        if self.banned.iter().any(|d| host_matches(host, d)) {
            out.push(LimitCandidate::new(LimitScope::Banned, 0, used_today));
        }
        if self.parent_blocked.iter().any(|d| host_matches(host, d)) {
            out.push(LimitCandidate::new(LimitScope::ParentBlocked, 0, used_today));
        }
        if let (Some(limit), Category::Distracting) = (self.global_secs, category) {
            out.push(LimitCandidate::new(LimitScope::Global, limit, used_today));
        }
        if let Some((_, limit)) = self.site.iter().find(|(d, _)| host_matches(host, d)) {
            out.push(LimitCandidate::new(LimitScope::Site, *limit, used_today));
        }
        for (_, limit) in self.parent_daily.iter().filter(|(d, _)| host_matches(host, d)) {
            out.push(LimitCandidate::new(LimitScope::ParentDaily, *limit, used_today));
        }
        for (_, limit) in self.parent_session.iter().filter(|(d, _)| host_matches(host, d)) {
            out.push(LimitCandidate::new(LimitScope::ParentSession, *limit, used_session));
        }
        out
    }

    /// Whether any parental session limit covers `host`
    pub fn tracks_session(&self, host: &str) -> bool {
        self.parent_session.iter().any(|(d, _)| host_matches(host, d))
    }
}

/// One applicable limit with the usage it is measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitCandidate {
    pub scope: LimitScope,
    pub limit_seconds: u64,
    pub used_seconds: u64,
}

impl LimitCandidate {
    fn new(scope: LimitScope, limit_seconds: u64, used_seconds: u64) -> Self {
        Self {
            scope,
            limit_seconds,
            used_seconds,
        }
    }

    pub fn remaining(&self) -> i64 {
        self.limit_seconds as i64 - self.used_seconds as i64
    }
}

/// Pick the limit that governs a host: the tripped limit with the lowest
/// threshold, else `None`. Ties fall back to a fixed scope order.
pub fn strictest_tripped(candidates: &[LimitCandidate]) -> Option<LimitCandidate> {
    candidates
        .iter()
        .filter(|c| c.remaining() <= 0)
        .min_by_key(|c| (c.limit_seconds, c.scope.rank()))
        .copied()
}

/// What to do about a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitAction {
    #[default]
    Ok,
    Warn,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub host: String,
    pub action: LimitAction,
    /// Reason code of the governing limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<LimitScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_sec: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_seconds: Option<u64>,
}

impl Verdict {
    fn ok(host: &str) -> Self {
        Self {
            host: host.to_string(),
            action: LimitAction::Ok,
            reason: None,
            remaining_sec: None,
            limit_seconds: None,
        }
    }

    fn from_candidate(host: &str, action: LimitAction, c: &LimitCandidate) -> Self {
        Self {
            host: host.to_string(),
            action,
            reason: Some(c.scope),
            remaining_sec: Some(c.remaining()),
            limit_seconds: Some(c.limit_seconds),
        }
    }
}

/// A one-shot notification for the redirect/notification layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub host: String,
    pub kind: AlertKind,
    pub reason: LimitScope,
    /// De-duplication tag stored on the ledger entry
    pub tag: String,
    pub remaining_sec: i64,
}

pub fn alert_tag(kind: AlertKind, scope: LimitScope) -> String {
    format!("{}:{}", kind.as_str(), scope.as_str())
}

/// Parental session usage for one host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionUsage {
    pub last_seen_ms: i64,
    pub used_seconds: u64,
}

/// `parentModeSession`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParentSessions {
    hosts: BTreeMap<String, SessionUsage>,
}

impl ParentSessions {
    /// Credit session time, starting a new session after a long gap
    pub fn record(&mut self, host: &str, seconds: u64, now_ms: i64) {
        let usage = self.hosts.entry(host.to_string()).or_default();
        if now_ms - usage.last_seen_ms > SESSION_GAP_MS {
            usage.used_seconds = 0;
        }
        usage.used_seconds = usage.used_seconds.saturating_add(seconds);
        usage.last_seen_ms = now_ms;
    }

    /// Usage in the current session, zero once the session has lapsed
    pub fn used(&self, host: &str, now_ms: i64) -> u64 {
        match self.hosts.get(host) {
            Some(usage) if now_ms - usage.last_seen_ms <= SESSION_GAP_MS => usage.used_seconds,
            _ => 0,
        }
    }

    /// Drop sessions that have lapsed
    pub fn expire(&mut self, now_ms: i64) {
        self.hosts
            .retain(|_, usage| now_ms - usage.last_seen_ms <= SESSION_GAP_MS);
    }
}

/// Owner of the derived blocked-host set
#[derive(Debug, Clone, Default)]
pub struct LimitEngine {
    blocked: BTreeSet<String>,
}

impl LimitEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `host` on `day` and update its ledger entry.
    ///
    /// Returns the verdict and, when the trip or warning is new, the alert to raise.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &mut self,
        table: &LimitTable,
        ledger: &mut HostLedger,
        sessions: &ParentSessions,
        day: &DayKey,
        host: &str,
        category: Category,
        now_ms: i64,
    ) -> (Verdict, Option<Alert>) {
        let verdict = preview(table, ledger, sessions, day, host, category, now_ms);

        if verdict.action == LimitAction::Block {
            if self.blocked.insert(host.to_string()) {
                info!(host, reason = ?verdict.reason, remaining = ?verdict.remaining_sec, "limit tripped");
            }
        } else {
            self.blocked.remove(host);
        }

        // hosts with no limits and no leftover state keep no entry
        let has_state = ledger
            .entry(day, host)
            .is_some_and(|e| e.alert.is_some() || e.limit_hit.is_some());
        if verdict.action == LimitAction::Ok && !has_state {
            return (verdict, None);
        }

        let entry = ledger.entry_mut(day, host);
        let alert = match (verdict.action, verdict.reason) {
            (LimitAction::Block, Some(scope)) => {
                entry.limit_hit = Some(scope);
                raise(&mut entry.alert, &verdict, AlertKind::Blocked, scope)
            }
            (LimitAction::Warn, Some(scope)) => {
                entry.limit_hit = None;
                raise(&mut entry.alert, &verdict, AlertKind::Warning, scope)
            }
            _ => {
                entry.limit_hit = None;
                if entry.alert.take().is_some() {
                    debug!(host, "cleared alert tag");
                }
                None
            }
        };
        (verdict, alert)
    }

    pub fn is_blocked(&self, host: &str) -> bool {
        self.blocked.contains(host)
    }

    pub fn blocked_hosts(&self) -> impl Iterator<Item = &str> {
        self.blocked.iter().map(String::as_str)
    }

    /// Forget every block; used on day rollover and configuration change
    pub fn clear(&mut self) {
        if !self.blocked.is_empty() {
            debug!(count = self.blocked.len(), "clearing blocked hosts");
        }
        self.blocked.clear();
    }
}

/// Store the tag and return an alert unless the same tag is already set
fn raise(slot: &mut Option<String>, verdict: &Verdict, kind: AlertKind, scope: LimitScope) -> Option<Alert> {
    let tag = alert_tag(kind, scope);
    if slot.as_deref() == Some(tag.as_str()) {
        return None;
    }
    *slot = Some(tag.clone());
    Some(Alert {
        host: verdict.host.clone(),
        kind,
        reason: scope,
        tag,
        remaining_sec: verdict.remaining_sec.unwrap_or(0),
    })
}

/// Verdict for `host` without touching any state
pub fn preview(
    table: &LimitTable,
    ledger: &HostLedger,
    sessions: &ParentSessions,
    day: &DayKey,
    host: &str,
    category: Category,
    now_ms: i64,
) -> Verdict {
    let used_today = ledger.seconds(day, host);
    let candidates = table.candidates(host, category, used_today, sessions.used(host, now_ms));

    if let Some(tripped) = strictest_tripped(&candidates) {
        return Verdict::from_candidate(host, LimitAction::Block, &tripped);
    }

    let closest = candidates
        .iter()
        .min_by_key(|c| (c.remaining(), c.scope.rank()))
        .copied();
    match closest {
        Some(c) if c.remaining() <= WARNING_BAND_SECS => {
            Verdict::from_candidate(host, LimitAction::Warn, &c)
        }
        _ => Verdict::ok(host),
    }
}

/// Whether any host has a daily-scoped limit tripped on `day`
pub fn daily_limit_tripped(ledger: &HostLedger, day: &DayKey) -> bool {
    ledger.day(day).is_some_and(|hosts| {
        hosts
            .values()
            .any(|entry| entry.limit_hit.is_some_and(|scope| scope.is_daily()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParentLimit, ParentModeConfig};
    use pretty_assertions::assert_eq;

    const NOW: i64 = 1_735_725_600_000;

    fn day() -> DayKey {
        DayKey::parse("2025-01-01").unwrap()
    }

    fn global_config(minutes: u32) -> CoreConfig {
        CoreConfig {
            distracting_limit_minutes: minutes,
            ..Default::default()
        }
    }

    fn run(
        engine: &mut LimitEngine,
        config: &CoreConfig,
        ledger: &mut HostLedger,
        host: &str,
        category: Category,
    ) -> (Verdict, Option<Alert>) {
        let table = LimitTable::from_config(config);
        engine.evaluate(&table, ledger, &ParentSessions::default(), &day(), host, category, NOW)
    }

    #[test]
    fn test_global_limit_blocks_at_zero_remaining() {
        let mut engine = LimitEngine::new();
        let mut ledger = HostLedger::default();
        ledger.add_seconds(&day(), "video.example", 3600.0);

        let (verdict, alert) = run(&mut engine, &global_config(60), &mut ledger, "video.example", Category::Distracting);
        assert_eq!(verdict.action, LimitAction::Block);
        assert_eq!(verdict.reason, Some(LimitScope::Global));
        assert_eq!(verdict.remaining_sec, Some(0));
        assert!(engine.is_blocked("video.example"));

        let alert = alert.unwrap();
        assert_eq!(alert.tag, "block:global");
        let entry = ledger.entry(&day(), "video.example").unwrap();
        assert_eq!(entry.limit_hit, Some(LimitScope::Global));
        assert!(daily_limit_tripped(&ledger, &day()));
    }

    #[test]
    fn test_global_limit_ignores_other_categories() {
        let mut engine = LimitEngine::new();
        let mut ledger = HostLedger::default();
        ledger.add_seconds(&day(), "docs.example", 7200.0);
        let (verdict, alert) = run(&mut engine, &global_config(60), &mut ledger, "docs.example", Category::Productive);
        assert_eq!(verdict.action, LimitAction::Ok);
        assert!(alert.is_none());
    }

    #[test]
    fn test_trip_alert_fires_once() {
        let mut engine = LimitEngine::new();
        let mut ledger = HostLedger::default();
        ledger.add_seconds(&day(), "video.example", 4000.0);
        let config = global_config(60);

        let (_, first) = run(&mut engine, &config, &mut ledger, "video.example", Category::Distracting);
        let (verdict, second) = run(&mut engine, &config, &mut ledger, "video.example", Category::Distracting);
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(verdict.action, LimitAction::Block);
    }

    #[test]
    fn test_clearing_condition_clears_tag() {
        let mut engine = LimitEngine::new();
        let mut ledger = HostLedger::default();
        ledger.add_seconds(&day(), "video.example", 3600.0);
        run(&mut engine, &global_config(60), &mut ledger, "video.example", Category::Distracting);

        // limit raised well above usage
        engine.clear();
        let (verdict, alert) = run(&mut engine, &global_config(180), &mut ledger, "video.example", Category::Distracting);
        assert_eq!(verdict.action, LimitAction::Ok);
        assert!(alert.is_none());
        let entry = ledger.entry(&day(), "video.example").unwrap();
        assert_eq!(entry.alert, None);
        assert_eq!(entry.limit_hit, None);
        assert!(!engine.is_blocked("video.example"));
    }

    #[test]
    fn test_warning_band_then_trip() {
        let mut engine = LimitEngine::new();
        let mut ledger = HostLedger::default();
        let config = CoreConfig {
            site_limits: [("news.example".to_string(), 600)].into_iter().collect(),
            ..Default::default()
        };

        ledger.add_seconds(&day(), "news.example", 575.0);
        let (verdict, alert) = run(&mut engine, &config, &mut ledger, "news.example", Category::Neutral);
        assert_eq!(verdict.action, LimitAction::Warn);
        assert_eq!(alert.unwrap().tag, "warn:site");

        let (_, repeat) = run(&mut engine, &config, &mut ledger, "news.example", Category::Neutral);
        assert!(repeat.is_none());

        ledger.add_seconds(&day(), "news.example", 30.0);
        let (verdict, alert) = run(&mut engine, &config, &mut ledger, "news.example", Category::Neutral);
        assert_eq!(verdict.action, LimitAction::Block);
        assert_eq!(alert.unwrap().tag, "block:site");
    }

    #[test]
    fn test_leaving_warning_band_clears_tag() {
        let mut engine = LimitEngine::new();
        let mut ledger = HostLedger::default();
        let site_limit = |seconds: u64| CoreConfig {
            site_limits: [("news.example".to_string(), seconds)].into_iter().collect(),
            ..Default::default()
        };

        ledger.add_seconds(&day(), "news.example", 575.0);
        let (verdict, _) = run(&mut engine, &site_limit(600), &mut ledger, "news.example", Category::Neutral);
        assert_eq!(verdict.action, LimitAction::Warn);
        assert_eq!(ledger.entry(&day(), "news.example").unwrap().alert.as_deref(), Some("warn:site"));

        let (verdict, alert) = run(&mut engine, &site_limit(1200), &mut ledger, "news.example", Category::Neutral);
        assert_eq!(verdict.action, LimitAction::Ok);
        assert!(alert.is_none());
        let entry = ledger.entry(&day(), "news.example").unwrap();
        assert_eq!(entry.alert, None);
        assert_eq!(entry.limit_hit, None);

        // back in the band, the warning fires again
        let (_, alert) = run(&mut engine, &site_limit(600), &mut ledger, "news.example", Category::Neutral);
        assert_eq!(alert.unwrap().tag, "warn:site");
    }

    #[test]
    fn test_lowest_threshold_wins() {
        let mut engine = LimitEngine::new();
        let mut ledger = HostLedger::default();
        let config = CoreConfig {
            distracting_limit_minutes: 60,
            site_limits: [("video.example".to_string(), 1800)].into_iter().collect(),
            ..Default::default()
        };
        ledger.add_seconds(&day(), "m.video.example", 4000.0);
        let (verdict, _) = run(&mut engine, &config, &mut ledger, "m.video.example", Category::Distracting);
        assert_eq!(verdict.reason, Some(LimitScope::Site));
        assert_eq!(verdict.limit_seconds, Some(1800));
    }

    #[test]
    fn test_banned_host_blocks_immediately() {
        let mut engine = LimitEngine::new();
        let mut ledger = HostLedger::default();
        let config = CoreConfig {
            banned_hosts: vec!["casino.example".to_string()],
            ..Default::default()
        };
        let (verdict, alert) = run(&mut engine, &config, &mut ledger, "www2.casino.example", Category::Neutral);
        assert_eq!(verdict.action, LimitAction::Block);
        assert_eq!(verdict.reason, Some(LimitScope::Banned));
        assert_eq!(alert.unwrap().tag, "block:banned");
        assert!(!daily_limit_tripped(&ledger, &day()));
    }

    #[test]
    fn test_parent_limits_only_when_enabled() {
        let parent = ParentModeConfig {
            enabled: false,
            blocked_hosts: vec!["games.example".to_string()],
            limits: vec![ParentLimit {
                host: "video.example".to_string(),
                limit_type: ParentLimitType::Daily,
                minutes: 10,
            }],
        };
        let mut config = CoreConfig {
            parent_mode: parent,
            ..Default::default()
        };
        let table = LimitTable::from_config(&config);
        assert!(table.candidates("games.example", Category::Neutral, 0, 0).is_empty());

        config.parent_mode.enabled = true;
        let table = LimitTable::from_config(&config);
        let scopes: Vec<LimitScope> = table
            .candidates("video.example", Category::Neutral, 0, 0)
            .iter()
            .map(|c| c.scope)
            .collect();
        assert_eq!(scopes, vec![LimitScope::ParentDaily]);
        assert!(strictest_tripped(&table.candidates("games.example", Category::Neutral, 0, 0)).is_some());
    }

    #[test]
    fn test_parent_session_decays_after_gap() {
        let mut sessions = ParentSessions::default();
        sessions.record("video.example", 600, NOW);
        sessions.record("video.example", 300, NOW + 10 * 60_000);
        assert_eq!(sessions.used("video.example", NOW + 10 * 60_000), 900);

        // 31 minutes without activity starts a new session
        let later = NOW + 41 * 60_000;
        assert_eq!(sessions.used("video.example", later), 0);
        sessions.record("video.example", 60, later);
        assert_eq!(sessions.used("video.example", later), 60);

        sessions.expire(later + SESSION_GAP_MS + 1);
        assert_eq!(sessions.used("video.example", later), 0);
    }

    #[test]
    fn test_session_limit_uses_session_usage() {
        let config = CoreConfig {
            parent_mode: ParentModeConfig {
                enabled: true,
                blocked_hosts: vec![],
                limits: vec![ParentLimit {
                    host: "video.example".to_string(),
                    limit_type: ParentLimitType::Session,
                    minutes: 20,
                }],
            },
            ..Default::default()
        };
        let table = LimitTable::from_config(&config);
        assert!(table.tracks_session("video.example"));

        let mut sessions = ParentSessions::default();
        sessions.record("video.example", 1200, NOW);
        let mut ledger = HostLedger::default();
        ledger.add_seconds(&day(), "video.example", 1200.0);

        let mut engine = LimitEngine::new();
        let (verdict, _) = engine.evaluate(&table, &mut ledger, &sessions, &day(), "video.example", Category::Neutral, NOW);
        assert_eq!(verdict.reason, Some(LimitScope::ParentSession));

        // next session: usage today is unchanged, session usage is fresh
        let later = NOW + 45 * 60_000;
        let (verdict, _) = engine.evaluate(&table, &mut ledger, &sessions, &day(), "video.example", Category::Neutral, later);
        assert_eq!(verdict.action, LimitAction::Ok);
        assert!(!daily_limit_tripped(&ledger, &day()));
    }
}
