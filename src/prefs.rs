//! Persistent user preferences behind a key-value store.
//!
//! The session core never reads the store; callers load `Preferences` and
//! apply them onto a `SessionConfig`.

use crate::error::{Result, VoxdeskError};
use crate::session::config::{SessionConfig, StartupPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key under which preferences are stored.
pub const PREFERENCES_KEY: &str = "voxdesk.preferences";

/// String key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Volatile store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.values.lock().map_err(|e| VoxdeskError::Storage {
            message: format!("store lock poisoned: {}", e),
        })
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values()?.remove(key);
        Ok(())
    }
}

/// Store backed by one JSON object file, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// ~/.local/share/voxdesk/store.json on Linux
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voxdesk")
            .join("store.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| VoxdeskError::Storage {
                message: format!("{} is not a JSON object of strings: {}", self.path.display(), e),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.lock.lock().map_err(|e| VoxdeskError::Storage {
            message: format!("store lock poisoned: {}", e),
        })
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.guard()?;
        Ok(self.read()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.guard()?;
        let mut values = self.read()?;
        values.insert(key.to_string(), value.to_string());
        self.write(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.guard()?;
        let mut values = self.read()?;
        if values.remove(key).is_some() {
            self.write(&values)?;
        }
        Ok(())
    }
}

/// Choices a user makes once and expects to persist.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub voice: Option<String>,
    pub preset: Option<String>,
    pub transcript_capacity: Option<usize>,
    pub startup_policy: Option<StartupPolicy>,
}

impl Preferences {
    /// Load from `store`, defaults when nothing is stored.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        match store.get(PREFERENCES_KEY)? {
            Some(json) => serde_json::from_str(&json).map_err(|e| VoxdeskError::Storage {
                message: format!("stored preferences are invalid: {}", e),
            }),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        store.set(PREFERENCES_KEY, &serde_json::to_string(self)?)
    }

    /// Overlay the preferences that are set.
    pub fn apply(&self, mut config: SessionConfig) -> SessionConfig {
        if let Some(voice) = &self.voice {
            config.voice = Some(voice.clone());
        }
        if let Some(capacity) = self.transcript_capacity {
            config.transcript_capacity = capacity;
        }
        if let Some(policy) = self.startup_policy {
            config.startup_policy = policy;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_get_set_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v".to_string()));

        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_json_file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.json");

        JsonFileStore::new(&path).set("voice", "Kore").unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get("voice").unwrap(), Some("Kore".to_string()));
        reopened.remove("voice").unwrap();
        assert_eq!(JsonFileStore::new(&path).get("voice").unwrap(), None);
    }

    #[test]
    fn test_json_file_store_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        let result = JsonFileStore::new(&path).get("voice");

        assert!(matches!(result, Err(VoxdeskError::Storage { .. })));
    }

    #[test]
    fn test_preferences_round_trip_through_store() {
        let store = MemoryStore::new();
        assert_eq!(Preferences::load(&store).unwrap(), Preferences::default());

        let prefs = Preferences {
            voice: Some("Charon".to_string()),
            startup_policy: Some(StartupPolicy::Buffer),
            ..Preferences::default()
        };
        prefs.save(&store).unwrap();

        assert_eq!(Preferences::load(&store).unwrap(), prefs);
        assert!(store.get(PREFERENCES_KEY).unwrap().unwrap().contains("Charon"));
    }

    #[test]
    fn test_apply_overlays_only_set_fields() {
        let prefs = Preferences {
            transcript_capacity: Some(3),
            ..Preferences::default()
        };
        let config = SessionConfig::default().with_voice("Puck");

        let applied = prefs.apply(config);

        assert_eq!(applied.voice.as_deref(), Some("Puck"));
        assert_eq!(applied.transcript_capacity, 3);
    }
}
