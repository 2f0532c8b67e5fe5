//! Focus engine
//!
//! The coordinator that owns all durable state. Every signal runs through the
//! same steps: detect a day change, attribute elapsed time to the active host,
//! apply the signal, then re-derive the rollup, goal status, focus state and
//! limit verdict. Handlers work on a copy of the state and only adopt it once
//! every touched record has been persisted, so a failed write leaves memory
//! matching what was last stored.

use crate::cache::{touches_config, ConfigCaches};
use crate::classifier::{evaluate_state, ClassifierConfig};
use crate::clock::{floor_minute_ms, hour_of_day, DayKey, MINUTE_MS};
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::goals::{evaluate_goals, GoalInputs, GoalStatus, Scoreboard};
use crate::host_ledger::{clamp_tick_elapsed, rollover_if_new_day, HostLedger, LedgerMeta};
use crate::keystrokes::{KpmLedger, LiveBucket, LiveKeystrokes};
use crate::limits::{daily_limit_tripped, preview, Alert, LimitEngine, ParentSessions, Verdict};
use crate::rollup::{compute_rollup, DailyRollup, DailySummaryLog};
use crate::signals::{host_from_url, Signal};
use crate::storage::{
    load_or_default, save, Storage, KEY_ACTIVITY_SUMMARY, KEY_DAILY_SUMMARY, KEY_DAILY_TIME_LOG,
    KEY_GOAL_STATUS, KEY_KPM_LOG, KEY_LEDGER_META, KEY_PARENT_MODE_SESSION, KEY_SCOREBOARD,
};
use crate::summary::ActivitySummary;
use crate::types::{ActivityState, Category, FocusState};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

/// Keystroke timestamps further ahead of the clock than this are replaced by now
const MAX_CLOCK_LEAD_MS: i64 = MINUTE_MS;

/// Everything the output layer needs after a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOutput {
    pub day: DayKey,
    pub computed_at_ms: i64,
    pub focus_state: FocusState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_host: Option<String>,
    pub goal_status: GoalStatus,
    /// Verdict for the active host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    /// Alerts raised by this call only
    pub alerts: Vec<Alert>,
    pub rollup: DailyRollup,
    pub scoreboard: Scoreboard,
    /// Keystrokes not yet flushed to the ledger
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_keys: Option<LiveBucket>,
    pub blocked_hosts: Vec<String>,
}

/// Why a signal was dropped without effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    PrivacyMode,
    NonHttpSource,
    EmptyBatch,
}

/// Result of handling one signal
#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    Applied(Box<EngineOutput>),
    Discarded(DiscardReason),
}

impl SignalOutcome {
    pub fn output(&self) -> Option<&EngineOutput> {
        match self {
            Self::Applied(output) => Some(output),
            Self::Discarded(_) => None,
        }
    }
}

/// In-memory copy of the durable records plus the derived per-process state
#[derive(Debug, Clone)]
struct EngineState {
    meta: LedgerMeta,
    summary: ActivitySummary,
    hosts: HostLedger,
    kpm: KpmLedger,
    daily: DailySummaryLog,
    goal_status: Option<GoalStatus>,
    scoreboard: Scoreboard,
    sessions: ParentSessions,
    live: LiveKeystrokes,
    limits: LimitEngine,
}

impl EngineState {
    fn load<S: Storage + ?Sized>(store: &S, today: &DayKey, now_ms: i64) -> Result<Self, CoreError> {
        let raw_summary = store.get(KEY_ACTIVITY_SUMMARY)?;
        Ok(Self {
            meta: load_or_default(store, KEY_LEDGER_META)?,
            summary: ActivitySummary::normalize(raw_summary.as_ref(), today, now_ms),
            hosts: load_or_default(store, KEY_DAILY_TIME_LOG)?,
            kpm: load_or_default(store, KEY_KPM_LOG)?,
            daily: load_or_default(store, KEY_DAILY_SUMMARY)?,
            goal_status: load_or_default(store, KEY_GOAL_STATUS)?,
            scoreboard: load_or_default(store, KEY_SCOREBOARD)?,
            sessions: load_or_default(store, KEY_PARENT_MODE_SESSION)?,
            live: LiveKeystrokes::default(),
            limits: LimitEngine::new(),
        })
    }

    fn write<S: Storage + ?Sized>(&self, store: &mut S, key: &str) -> Result<(), CoreError> {
        match key {
            KEY_ACTIVITY_SUMMARY => save(store, key, &self.summary),
            KEY_DAILY_TIME_LOG => save(store, key, &self.hosts),
            KEY_KPM_LOG => save(store, key, &self.kpm),
            KEY_DAILY_SUMMARY => save(store, key, &self.daily),
            KEY_GOAL_STATUS => save(store, key, &self.goal_status),
            KEY_SCOREBOARD => save(store, key, &self.scoreboard),
            KEY_PARENT_MODE_SESSION => save(store, key, &self.sessions),
            KEY_LEDGER_META => save(store, key, &self.meta),
            other => Err(CoreError::Storage(format!("no engine record for key {other}"))),
        }
    }
}

/// Records rewritten by every applied signal
const EVENT_KEYS: [&str; 4] = [
    KEY_LEDGER_META,
    KEY_ACTIVITY_SUMMARY,
    KEY_DAILY_TIME_LOG,
    KEY_PARENT_MODE_SESSION,
];

/// Records rewritten by the periodic tick and by day rollover
const ALL_KEYS: [&str; 8] = [
    KEY_LEDGER_META,
    KEY_ACTIVITY_SUMMARY,
    KEY_DAILY_TIME_LOG,
    KEY_PARENT_MODE_SESSION,
    KEY_KPM_LOG,
    KEY_DAILY_SUMMARY,
    KEY_GOAL_STATUS,
    KEY_SCOREBOARD,
];

/// Activity-accounting and state-classification engine
pub struct FocusEngine<S: Storage> {
    store: S,
    caches: ConfigCaches,
    state: EngineState,
}

impl<S: Storage> FocusEngine<S> {
    /// Open the engine over whatever `store` already holds
    pub fn open(store: S, now: DateTime<FixedOffset>) -> Result<Self, CoreError> {
        let config = CoreConfig::load(&store)?;
        let today = DayKey::from_datetime(&now);
        let state = EngineState::load(&store, &today, now.timestamp_millis())?;
        info!(day = %today, rules = config.classification_rules.len(), "focus engine opened");
        Ok(Self {
            store,
            caches: ConfigCaches::new(config),
            state,
        })
    }

    /// Write `config` into `store`, then open over it
    pub fn with_config(mut store: S, config: CoreConfig, now: DateTime<FixedOffset>) -> Result<Self, CoreError> {
        config.validate()?;
        config.normalized().store(&mut store)?;
        Self::open(store, now)
    }

    pub fn config(&self) -> &CoreConfig {
        self.caches.config()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Handle one raw signal observed at `now`
    pub fn handle(&mut self, signal: Signal, now: DateTime<FixedOffset>) -> Result<SignalOutcome, CoreError> {
        trace!(kind = signal.kind(), "signal");
        match signal {
            Signal::Tick => self.on_tick(now).map(|out| SignalOutcome::Applied(Box::new(out))),
            Signal::TabActivated { url } | Signal::TabUpdated { url } => self.on_tab(&url, now),
            Signal::IdleChanged { state } => self.on_idle_changed(state, now),
            Signal::KeystrokeBatch {
                count,
                timestamp_ms,
                url,
            } => self.on_keystrokes(count, timestamp_ms, url.as_deref(), now),
        }
    }

    /// Periodic tick: attribute time, flush keystrokes and persist a full snapshot
    pub fn on_tick(&mut self, now: DateTime<FixedOffset>) -> Result<EngineOutput, CoreError> {
        self.caches.refresh();
        let today = DayKey::from_datetime(&now);
        let now_ms = now.timestamp_millis();
        let mut next = self.state.clone();

        self.roll_day(&mut next, &today, now_ms);
        self.account_elapsed(&mut next, &today, now_ms);
        if let Some(bucket) = next.live.take() {
            next.kpm.apply_live(&bucket);
        }

        let mut alerts = Vec::new();
        let verdict = self.refresh_active_host(&mut next, &today, now_ms, &mut alerts);
        let output = self.derive(&mut next, &today, now, verdict, alerts);

        next.daily.record(output.rollup.clone());
        next.goal_status = Some(output.goal_status.clone());

        self.commit(next, &ALL_KEYS)?;
        Ok(output)
    }

    fn on_tab(&mut self, url: &str, now: DateTime<FixedOffset>) -> Result<SignalOutcome, CoreError> {
        self.caches.refresh();
        let today = DayKey::from_datetime(&now);
        let now_ms = now.timestamp_millis();
        let mut next = self.state.clone();

        let rolled = self.roll_day(&mut next, &today, now_ms);
        self.account_elapsed(&mut next, &today, now_ms);

        let host = host_from_url(url);
        if host.is_some() && host != next.meta.active_host {
            next.summary.record_domain_switch(now_ms);
            debug!(host = ?host, "active host changed");
        }
        next.meta.active_host = host;

        let mut alerts = Vec::new();
        let verdict = self.refresh_active_host(&mut next, &today, now_ms, &mut alerts);
        let output = self.derive(&mut next, &today, now, verdict, alerts);

        let keys: &[&str] = if rolled { &ALL_KEYS } else { &EVENT_KEYS };
        self.commit(next, keys)?;
        Ok(SignalOutcome::Applied(Box::new(output)))
    }

    fn on_idle_changed(
        &mut self,
        to: ActivityState,
        now: DateTime<FixedOffset>,
    ) -> Result<SignalOutcome, CoreError> {
        self.caches.refresh();
        let today = DayKey::from_datetime(&now);
        let now_ms = now.timestamp_millis();
        let mut next = self.state.clone();

        let rolled = self.roll_day(&mut next, &today, now_ms);
        // time up to the transition belongs to the state being left
        self.account_elapsed(&mut next, &today, now_ms);
        if next.summary.record_idle_transition(to, now_ms) {
            debug!(state = ?to, "activity state changed");
        }

        let output = self.derive(&mut next, &today, now, None, Vec::new());
        let keys: &[&str] = if rolled { &ALL_KEYS } else { &EVENT_KEYS };
        self.commit(next, keys)?;
        Ok(SignalOutcome::Applied(Box::new(output)))
    }

    fn on_keystrokes(
        &mut self,
        count: i64,
        timestamp_ms: i64,
        url: Option<&str>,
        now: DateTime<FixedOffset>,
    ) -> Result<SignalOutcome, CoreError> {
        if self.caches.config().privacy_mode {
            trace!("keystroke batch dropped in privacy mode");
            return Ok(SignalOutcome::Discarded(DiscardReason::PrivacyMode));
        }
        if url.is_some_and(|u| host_from_url(u).is_none()) {
            trace!("keystroke batch from a non-http page dropped");
            return Ok(SignalOutcome::Discarded(DiscardReason::NonHttpSource));
        }
        if count <= 0 {
            return Ok(SignalOutcome::Discarded(DiscardReason::EmptyBatch));
        }

        self.caches.refresh();
        let today = DayKey::from_datetime(&now);
        let now_ms = now.timestamp_millis();
        let mut next = self.state.clone();
        let rolled = self.roll_day(&mut next, &today, now_ms);

        let at_ms = if timestamp_ms <= 0 || timestamp_ms > now_ms + MAX_CLOCK_LEAD_MS {
            now_ms
        } else {
            timestamp_ms
        };
        let stamped_day = DateTime::from_timestamp_millis(at_ms)
            .map(|utc| DayKey::from_datetime(&utc.with_timezone(now.offset())))
            .unwrap_or_else(|| today.clone());
        // a closed day has already been scored, late batches count toward today
        let (batch_day, at_ms) = if stamped_day < today {
            debug!(stamped = %stamped_day, day = %today, count, "late keystroke batch moved to today");
            (today.clone(), now_ms)
        } else {
            (stamped_day, at_ms)
        };

        let mut keys: Vec<&str> = Vec::new();
        if let Some(previous) = next.live.add(&batch_day, at_ms, count) {
            next.kpm.apply_live(&previous);
            keys.push(KEY_KPM_LOG);
        }
        if rolled {
            keys.extend(ALL_KEYS);
        }

        let output = self.derive(&mut next, &today, now, None, Vec::new());
        self.commit(next, &keys)?;
        Ok(SignalOutcome::Applied(Box::new(output)))
    }

    /// Flush the live keystroke bucket, e.g. before shutdown
    pub fn flush(&mut self) -> Result<(), CoreError> {
        let mut next = self.state.clone();
        match next.live.take() {
            Some(bucket) => {
                next.kpm.apply_live(&bucket);
                self.commit(next, &[KEY_KPM_LOG])
            }
            None => Ok(()),
        }
    }

    /// Current output without changing or persisting anything
    pub fn snapshot(&self, now: DateTime<FixedOffset>) -> EngineOutput {
        let today = DayKey::from_datetime(&now);
        let now_ms = now.timestamp_millis();
        let mut view = self.state.clone();
        if view.summary.date != today {
            let last_state = view.summary.last_state;
            view.summary = ActivitySummary::fresh(today.clone(), now_ms);
            view.summary.last_state = last_state;
        }
        let verdict = view.meta.active_host.as_deref().map(|host| {
            let category = self.caches.rules().classify_base(host);
            preview(self.caches.limits(), &view.hosts, &view.sessions, &today, host, category, now_ms)
        });
        self.derive(&mut view, &today, now, verdict, Vec::new())
    }

    /// React to a change notification from the store.
    ///
    /// Configuration keys reload the configuration, rebuild the caches and reset
    /// every block and alert for today. Returns true when that happened.
    pub fn on_storage_changed<K: AsRef<str>>(
        &mut self,
        keys: &[K],
        now: DateTime<FixedOffset>,
    ) -> Result<bool, CoreError> {
        if !touches_config(keys) {
            return Ok(false);
        }
        let config = CoreConfig::load(&self.store)?;
        self.apply_config(config, now)?;
        Ok(true)
    }

    /// Validate, persist and adopt a new configuration
    pub fn update_config(&mut self, config: CoreConfig, now: DateTime<FixedOffset>) -> Result<(), CoreError> {
        config.validate()?;
        let config = config.normalized();
        config.store(&mut self.store)?;
        self.apply_config(config, now)
    }

    fn apply_config(&mut self, config: CoreConfig, now: DateTime<FixedOffset>) -> Result<(), CoreError> {
        let today = DayKey::from_datetime(&now);
        let mut next = self.state.clone();
        next.limits.clear();
        next.hosts.clear_limit_state(&today);
        self.commit(next, &[KEY_DAILY_TIME_LOG])?;

        self.caches.replace_config(config);
        self.caches.rebuild();
        info!(generation = self.caches.generation(), "configuration reloaded");
        Ok(())
    }

    /// Detect and apply a day change. Returns true when the day rolled over.
    fn roll_day(&self, st: &mut EngineState, today: &DayKey, now_ms: i64) -> bool {
        // yesterday's keystrokes land in yesterday's log before anything is pruned
        if st.live.peek().is_some_and(|b| &b.day != today) {
            if let Some(bucket) = st.live.take() {
                st.kpm.apply_live(&bucket);
            }
        }

        let Some(rollover) = rollover_if_new_day(&mut st.meta, today, &mut st.hosts, &mut st.kpm) else {
            return false;
        };
        st.daily.prune(today);
        st.sessions.expire(now_ms);
        st.limits.clear();

        if let Some(previous) = &rollover.previous_day {
            let rollup = compute_rollup(previous, &st.hosts, &st.kpm, self.caches.rules(), now_ms);
            let inputs = GoalInputs {
                productive_sec: rollup.totals.productive_sec,
                distracting_sec: rollup.totals.distracting_sec,
                flow_done: rollup.flow_windows,
                hour: 24.0,
                daily_limit_tripped: daily_limit_tripped(&st.hosts, previous),
            };
            let final_status = evaluate_goals(previous, &self.caches.config().daily_goals, &inputs);
            info!(day = %previous, state = ?final_status.state, "closing day");
            st.daily.record(rollup);
            st.scoreboard.record_day(&final_status);
        }

        let last_state = st.summary.last_state;
        st.summary = ActivitySummary::fresh(today.clone(), now_ms);
        st.summary.last_state = last_state;
        true
    }

    /// Credit the time since the last accounted moment to the active host
    fn account_elapsed(&self, st: &mut EngineState, today: &DayKey, now_ms: i64) {
        let elapsed = clamp_tick_elapsed(st.meta.last_tick_ms, now_ms);
        st.meta.last_tick_ms = Some(now_ms);

        if st.summary.last_state != ActivityState::Active {
            return;
        }
        let Some(host) = st.meta.active_host.clone() else {
            return;
        };

        let credited = st.hosts.add_seconds(today, &host, elapsed);
        if credited == 0 {
            return;
        }
        st.summary.record_domain_seconds(&host, credited);

        if self.caches.limits().tracks_session(&host) {
            st.sessions.record(&host, credited, now_ms);
        }

        if self.caches.rules().classify_base(&host) == Category::Productive {
            let start = now_ms - (elapsed * 1000.0) as i64;
            let mut minute = floor_minute_ms(start);
            while minute <= now_ms {
                st.kpm.mark_productive_minute(today, minute);
                minute += MINUTE_MS;
            }
        }
    }

    /// Evaluate limits for the active host, collecting any new alert
    fn refresh_active_host(
        &self,
        st: &mut EngineState,
        today: &DayKey,
        now_ms: i64,
        alerts: &mut Vec<Alert>,
    ) -> Option<Verdict> {
        let host = st.meta.active_host.clone()?;
        let category = self.caches.rules().classify_base(&host);
        let (verdict, alert) = st.limits.evaluate(
            self.caches.limits(),
            &mut st.hosts,
            &st.sessions,
            today,
            &host,
            category,
            now_ms,
        );
        alerts.extend(alert);
        Some(verdict)
    }

    /// Re-derive rollup, goals and focus state; writes the focus state back
    /// into the summary
    fn derive(
        &self,
        st: &mut EngineState,
        today: &DayKey,
        now: DateTime<FixedOffset>,
        verdict: Option<Verdict>,
        alerts: Vec<Alert>,
    ) -> EngineOutput {
        let now_ms = now.timestamp_millis();
        let config = self.caches.config();

        let rollup = match st.live.peek() {
            Some(bucket) => {
                let mut kpm = st.kpm.clone();
                kpm.apply_live(bucket);
                compute_rollup(today, &st.hosts, &kpm, self.caches.rules(), now_ms)
            }
            None => compute_rollup(today, &st.hosts, &st.kpm, self.caches.rules(), now_ms),
        };

        let inputs = GoalInputs {
            productive_sec: rollup.totals.productive_sec,
            distracting_sec: rollup.totals.distracting_sec,
            flow_done: rollup.flow_windows,
            hour: hour_of_day(&now),
            daily_limit_tripped: daily_limit_tripped(&st.hosts, today),
        };
        let goal_status = evaluate_goals(today, &config.daily_goals, &inputs);

        let reading = evaluate_state(&st.summary, &ClassifierConfig::from(config), now_ms);
        if reading.state != st.summary.focus_state {
            info!(
                from = %st.summary.focus_state,
                to = %reading.state,
                switches = reading.switch_count,
                streak_ms = reading.effective_focus_streak_ms,
                "focus state changed"
            );
        }
        st.summary.focus_state = reading.state;
        st.summary.updated_at_ms = now_ms;

        EngineOutput {
            day: today.clone(),
            computed_at_ms: now_ms,
            focus_state: reading.state,
            active_host: st.meta.active_host.clone(),
            goal_status,
            verdict,
            alerts,
            rollup,
            scoreboard: st.scoreboard.clone(),
            live_keys: st.live.peek().cloned(),
            blocked_hosts: st.limits.blocked_hosts().map(str::to_string).collect(),
        }
    }

    /// Persist `keys` from `next`, then adopt it
    fn commit(&mut self, next: EngineState, keys: &[&str]) -> Result<(), CoreError> {
        for key in keys {
            if let Err(e) = next.write(&mut self.store, key) {
                warn!(key, error = %e, "persist failed, keeping last stored state");
                return Err(e);
            }
        }
        self.state = next;
        Ok(())
    }
}
