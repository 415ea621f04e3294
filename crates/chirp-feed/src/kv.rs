//! Persistent string key/value store.
//!
//! The cache core's only durable state. Keys are namespaced strings
//! (`username-<userId>`, `avatar-<userId>`); the same mechanism also
//! carries the UI theme preference under `appTheme`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Local persistence key for the UI theme.
pub const THEME_KEY: &str = "appTheme";

/// String key/value store with durable writes.
///
/// Neither operation fails from the caller's view: absence is a valid
/// result, and a write the medium rejects simply does not take effect
/// (the previous value, if any, stays readable). No expiry, no
/// eviction; the key space is bounded by the distinct author count in
/// the observed feed window.
pub trait KeyValueCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// Volatile implementation for tests and embedded use.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueCache for MemoryKv {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.to_string(), value.to_string());
        }
    }
}

/// On-disk file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KvFile {
    version: u32,
    entries: HashMap<String, String>,
}

impl Default for KvFile {
    fn default() -> Self {
        Self {
            version: 1,
            entries: HashMap::new(),
        }
    }
}

/// File-backed store: one versioned JSON file, loaded at open and
/// rewritten on every set. Survives process restarts.
pub struct FileKv {
    path: PathBuf,
    data: RwLock<KvFile>,
}

impl FileKv {
    /// Open the store at `path`, creating an empty one if the file does
    /// not exist. A corrupt file is treated as empty (and logged); the
    /// next successful set rewrites it.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let data = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt cache file, starting empty");
                    KvFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => KvFile::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read cache file, starting empty");
                KvFile::default()
            }
        };

        debug!(path = %path.display(), entries = data.entries.len(), "cache opened");
        Self {
            path,
            data: RwLock::new(data),
        }
    }
}

impl KeyValueCache for FileKv {
    fn get(&self, key: &str) -> Option<String> {
        self.data
            .read()
            .ok()
            .and_then(|data| data.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) {
        let Ok(mut data) = self.data.write() else {
            return;
        };

        // Write the new state to disk before committing it in memory,
        // so a rejected write leaves the previous value readable.
        let mut next = data.clone();
        next.entries.insert(key.to_string(), value.to_string());

        let serialized = match serde_json::to_string_pretty(&next) {
            Ok(s) => s,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize cache, write dropped");
                return;
            }
        };

        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(key, error = %e, "failed to create cache directory, write dropped");
                return;
            }
        }

        match std::fs::write(&self.path, serialized) {
            Ok(()) => *data = next,
            Err(e) => {
                warn!(key, error = %e, "cache write failed, previous value retained");
            }
        }
    }
}

/// UI theme preference, persisted alongside the cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    /// Load the persisted theme, defaulting to dark.
    pub fn load(kv: &dyn KeyValueCache) -> Self {
        match kv.get(THEME_KEY).as_deref() {
            Some("light") => Theme::Light,
            _ => Theme::Dark,
        }
    }

    /// Persist this theme.
    pub fn store(&self, kv: &dyn KeyValueCache) {
        kv.set(THEME_KEY, self.as_str());
    }
}
