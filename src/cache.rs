//! Configuration caches
//!
//! The compiled rule index and limit table are derived from the configuration.
//! They are owned by the engine and rebuilt only through [`ConfigCaches::rebuild`],
//! after a storage change touching a configuration key marks them stale.

use crate::config::CoreConfig;
use crate::limits::LimitTable;
use crate::rules::RuleIndex;
use crate::storage::CONFIG_KEYS;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ConfigCaches {
    config: CoreConfig,
    rules: RuleIndex,
    limits: LimitTable,
    stale: bool,
    generation: u64,
}

impl ConfigCaches {
    pub fn new(config: CoreConfig) -> Self {
        let rules = RuleIndex::compile(&config.classification_rules);
        let limits = LimitTable::from_config(&config);
        Self {
            config,
            rules,
            limits,
            stale: false,
            generation: 1,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleIndex {
        &self.rules
    }

    pub fn limits(&self) -> &LimitTable {
        &self.limits
    }

    /// Bumped on every rebuild
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Mark the derived caches out of date
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    /// Swap in a new configuration; the caches stay stale until rebuilt
    pub fn replace_config(&mut self, config: CoreConfig) {
        self.config = config;
        self.invalidate();
    }

    /// Recompile from the current configuration
    pub fn rebuild(&mut self) {
        self.rules = RuleIndex::compile(&self.config.classification_rules);
        self.limits = LimitTable::from_config(&self.config);
        self.stale = false;
        self.generation += 1;
        debug!(generation = self.generation, rules = self.rules.len(), "rebuilt config caches");
    }

    /// Rebuild only when stale. Returns true when a rebuild happened.
    pub fn refresh(&mut self) -> bool {
        if self.stale {
            self.rebuild();
            true
        } else {
            false
        }
    }
}

/// Whether a storage change touches configuration
pub fn touches_config<S: AsRef<str>>(keys: &[S]) -> bool {
    keys.iter().any(|k| CONFIG_KEYS.contains(&k.as_ref()))
}
