//! Persisted activity record, the only state that outlives a process.
//!
//! The store mirrors a browser key/value area: string keys, string values,
//! last write wins. Several clients pointed at the same file race on these
//! keys without coordination.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use parking_lot::Mutex;
use thiserror::Error;
use time::OffsetDateTime;

pub const KEY_CHANNEL: &str = "chat.channel";
pub const KEY_LAST_PRESENCE: &str = "chat.lastPresence";
pub const KEY_LAST_POOLED_ID: &str = "chat.lastPooledId";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unable to determine home directory")]
    NoHome,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for StoreError {
    fn from(value: toml::de::Error) -> Self {
        StoreError::Toml(value.to_string())
    }
}

impl From<toml::ser::Error> for StoreError {
    fn from(value: toml::ser::Error) -> Self {
        StoreError::Toml(value.to_string())
    }
}

pub trait ActivityStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-lifetime store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryActivityStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActivityStore for MemoryActivityStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// TOML-file store. Reads go to the file so writes from other clients are
/// seen; each mutation re-reads the file and changes only its own key.
#[derive(Debug)]
pub struct FileActivityStore {
    path: PathBuf,
    /// Serializes this process's read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl FileActivityStore {
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let base = BaseDirs::new().ok_or(StoreError::NoHome)?;
        Ok(base.home_dir().join(".livechat").join("activity.toml"))
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        };
        store.read_entries()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = toml::to_string(entries)?;
        let mut options = OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(serialized.as_bytes())?;
        Ok(())
    }
}

impl ActivityStore for FileActivityStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.read_entries() {
            Ok(mut entries) => entries.remove(key),
            Err(err) => {
                tracing::warn!(target: "livechat::store", path = %self.path.display(), error = %err, "failed to read activity store");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut entries = self.read_entries()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut entries = self.read_entries()?;
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}

/// Snapshot of the persisted conversation keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityRecord {
    pub channel_uuid: Option<String>,
    /// Epoch milliseconds of the last visitor activity.
    pub last_presence: Option<i64>,
    pub last_pooled_id: Option<i64>,
}

impl ActivityRecord {
    pub fn load(store: &dyn ActivityStore) -> Self {
        Self {
            channel_uuid: store
                .get(KEY_CHANNEL)
                .map(|uuid| uuid.trim().to_string())
                .filter(|uuid| !uuid.is_empty()),
            last_presence: store.get(KEY_LAST_PRESENCE).and_then(|v| v.trim().parse().ok()),
            last_pooled_id: store.get(KEY_LAST_POOLED_ID).and_then(|v| v.trim().parse().ok()),
        }
    }

    /// A record with no usable presence stamp is treated as expired, and
    /// so is one too far from `now_ms` to measure.
    pub fn is_expired(&self, now_ms: i64, window: Duration) -> bool {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        match self
            .last_presence
            .and_then(|presence| now_ms.checked_sub(presence))
        {
            Some(elapsed) => elapsed.unsigned_abs() > window_ms,
            None => true,
        }
    }

    pub fn purge(store: &dyn ActivityStore) -> Result<(), StoreError> {
        for key in [KEY_CHANNEL, KEY_LAST_PRESENCE, KEY_LAST_POOLED_ID] {
            store.remove(key)?;
        }
        Ok(())
    }
}

pub fn now_millis() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(nanos).unwrap_or(i64::MAX)
}
