//! Durable key-value persistence
//!
//! All durable state lives under a handful of top-level keys, each holding one
//! JSON document. Ledgers never share a key, so unrelated sections never contend.
//! Within a key the last writer wins.

use crate::error::CoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

pub const KEY_ACTIVITY_SUMMARY: &str = "activitySummary";
pub const KEY_DAILY_TIME_LOG: &str = "dailyTimeLog";
pub const KEY_KPM_LOG: &str = "kpmLog";
pub const KEY_DAILY_SUMMARY: &str = "dailySummary";
pub const KEY_GOAL_STATUS: &str = "goalStatus";
pub const KEY_SCOREBOARD: &str = "scoreboard";
pub const KEY_CATEGORIZATION_RULES: &str = "categorizationRules";
pub const KEY_SITE_LIMITS: &str = "distractingSiteLimits";
pub const KEY_BANNED_HOSTS: &str = "bannedHosts";
pub const KEY_PARENT_MODE_CONFIG: &str = "parentModeConfig";
pub const KEY_PARENT_MODE_SESSION: &str = "parentModeSession";
pub const KEY_SETTINGS: &str = "settings";
pub const KEY_LEDGER_META: &str = "ledgerMeta";

/// Keys whose change invalidates configuration caches
pub const CONFIG_KEYS: [&str; 5] = [
    KEY_CATEGORIZATION_RULES,
    KEY_SITE_LIMITS,
    KEY_BANNED_HOSTS,
    KEY_PARENT_MODE_CONFIG,
    KEY_SETTINGS,
];

/// A durable JSON key-value store
pub trait Storage: Send {
    fn get(&self, key: &str) -> Result<Option<Value>, CoreError>;

    fn set(&mut self, key: &str, value: Value) -> Result<(), CoreError>;

    fn remove(&mut self, key: &str) -> Result<(), CoreError>;

    fn keys(&self) -> Result<Vec<String>, CoreError>;
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn get(&self, key: &str) -> Result<Option<Value>, CoreError> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), CoreError> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), CoreError> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>, CoreError> {
        (**self).keys()
    }
}

/// Read a typed record, falling back to `Default` when it is absent or malformed.
///
/// Storage failures still propagate; only shape problems are recovered here.
pub fn load_or_default<T, S>(store: &S, key: &str) -> Result<T, CoreError>
where
    T: DeserializeOwned + Default,
    S: Storage + ?Sized,
{
    match store.get(key)? {
        None => Ok(T::default()),
        Some(value) => match serde_json::from_value(value) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                warn!(key, error = %e, "discarding malformed persisted record");
                Ok(T::default())
            }
        },
    }
}

/// Serialize and write a typed record
pub fn save<T, S>(store: &mut S, key: &str, value: &T) -> Result<(), CoreError>
where
    T: Serialize,
    S: Storage + ?Sized,
{
    let json = serde_json::to_value(value)?;
    store.set(key, json)
}

/// In-process store, used by tests, replay and the C ABI
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, Value>,
    read_only: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, simulating a quota or I/O failure
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }
}

impl Storage for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, CoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), CoreError> {
        if self.read_only {
            return Err(CoreError::Storage(format!("store is read-only, cannot write {key}")));
        }
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), CoreError> {
        if self.read_only {
            return Err(CoreError::Storage(format!("store is read-only, cannot remove {key}")));
        }
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.entries.keys().cloned().collect())
    }
}

/// Directory-backed store: one `<key>.json` file per key, written atomically
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            CoreError::Storage(format!("cannot create store directory {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(CoreError::Storage(format!("invalid storage key: {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl Storage for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, CoreError> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| CoreError::Storage(format!("reading {}: {e}", path.display())))?;
        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "unreadable store file, treating as absent");
                Ok(None)
            }
        }
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), CoreError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(&value)?;
        fs::write(&tmp, data)
            .map_err(|e| CoreError::Storage(format!("writing {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| CoreError::Storage(format!("replacing {}: {e}", path.display())))?;
        trace!(key, "persisted");
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), CoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::Storage(format!("removing {}: {e}", path.display()))),
        }
    }

    fn keys(&self) -> Result<Vec<String>, CoreError> {
        let mut keys = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| CoreError::Storage(format!("listing {}: {e}", self.dir.display())))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(key) = name.strip_suffix(".json") {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
    }

    #[test]
    fn test_load_or_default_recovers_malformed() {
        let mut store = MemoryStore::new();
        store.set("counter", json!("not an object")).unwrap();

        let counter: Counter = load_or_default(&store, "counter").unwrap();
        assert_eq!(counter, Counter::default());
    }

    #[test]
    fn test_save_and_load() {
        let mut store = MemoryStore::new();
        save(&mut store, "counter", &Counter { value: 7 }).unwrap();

        let counter: Counter = load_or_default(&store, "counter").unwrap();
        assert_eq!(counter.value, 7);
    }

    #[test]
    fn test_read_only_store_fails_writes() {
        let mut store = MemoryStore::new();
        store.set_read_only(true);
        let err = save(&mut store, "counter", &Counter { value: 1 }).unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::open(dir.path()).unwrap();

        assert!(store.get(KEY_SCOREBOARD).unwrap().is_none());
        store.set(KEY_SCOREBOARD, json!({"streak": 3})).unwrap();
        store.set(KEY_GOAL_STATUS, json!({"state": "PASSING"})).unwrap();

        let reopened = JsonFileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(KEY_SCOREBOARD).unwrap(), Some(json!({"streak": 3})));
        assert_eq!(
            reopened.keys().unwrap(),
            vec![KEY_GOAL_STATUS.to_string(), KEY_SCOREBOARD.to_string()]
        );

        store.remove(KEY_SCOREBOARD).unwrap();
        store.remove(KEY_SCOREBOARD).unwrap();
        assert!(reopened.get(KEY_SCOREBOARD).unwrap().is_none());
    }

    #[test]
    fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(store.get("../etc/passwd").is_err());
    }
}
