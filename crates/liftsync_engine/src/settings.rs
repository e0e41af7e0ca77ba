//! Durable user settings: the sync toggle and the last successful sync.

use crate::coalesce::{KeyValueSink, WriteCoalescer};
use crate::error::SyncResult;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Key of the persisted sync toggle.
pub const SYNC_ENABLED_KEY: &str = "syncEnabled";
/// Key of the last successful sync timestamp.
pub const LAST_SYNCED_KEY: &str = "lastSyncedAt";

/// In-memory [`KeyValueSink`].
#[derive(Default)]
pub struct MemorySink {
    values: Mutex<BTreeMap<String, Value>>,
    batches: Mutex<usize>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches written.
    pub fn batch_count(&self) -> usize {
        *self.batches.lock()
    }

    /// Reads one stored value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }
}

impl KeyValueSink for MemorySink {
    fn read_all(&self) -> SyncResult<BTreeMap<String, Value>> {
        Ok(self.values.lock().clone())
    }

    fn write_batch(&self, batch: &BTreeMap<String, Value>) -> SyncResult<()> {
        let mut values = self.values.lock();
        for (key, value) in batch {
            values.insert(key.clone(), value.clone());
        }
        *self.batches.lock() += 1;
        Ok(())
    }
}

/// [`KeyValueSink`] persisting a JSON object to one file.
///
/// Each batch rewrites the file through a temporary sibling and a rename.
pub struct JsonFileSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileSink {
    /// Creates a sink at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the settings file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> SyncResult<BTreeMap<String, Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = fs::read(&self.path)?;
        if bytes.is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl KeyValueSink for JsonFileSink {
    fn read_all(&self) -> SyncResult<BTreeMap<String, Value>> {
        let _guard = self.lock.lock();
        self.load()
    }

    fn write_batch(&self, batch: &BTreeMap<String, Value>) -> SyncResult<()> {
        let _guard = self.lock.lock();
        let mut values = self.load()?;
        for (key, value) in batch {
            values.insert(key.clone(), value.clone());
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&values)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Typed settings over a coalesced key-value sink.
///
/// Reads are served from memory; writes update memory at once and reach the
/// sink when the coalescer flushes.
pub struct SettingsStore {
    values: RwLock<BTreeMap<String, Value>>,
    writer: WriteCoalescer,
}

impl SettingsStore {
    /// Loads settings from `sink`.
    pub fn open(sink: Arc<dyn KeyValueSink>, flush_delay: Duration) -> SyncResult<Self> {
        let values = sink.read_all()?;
        Ok(Self {
            values: RwLock::new(values),
            writer: WriteCoalescer::new(sink, flush_delay),
        })
    }

    /// Settings backed by a fresh in-memory sink.
    pub fn in_memory() -> Self {
        Self {
            values: RwLock::new(BTreeMap::new()),
            writer: WriteCoalescer::new(Arc::new(MemorySink::new()), Duration::ZERO),
        }
    }

    fn put(&self, key: &str, value: Value) {
        self.values.write().insert(key.to_string(), value.clone());
        self.writer.write(key, value);
    }

    /// Whether the user turned sync on. Off until set.
    pub fn sync_enabled(&self) -> bool {
        self.values
            .read()
            .get(SYNC_ENABLED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Persists the sync toggle.
    pub fn set_sync_enabled(&self, enabled: bool) {
        self.put(SYNC_ENABLED_KEY, Value::Bool(enabled));
    }

    /// When the last successful sync finished.
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.values
            .read()
            .get(LAST_SYNCED_KEY)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// Records a successful sync.
    pub fn set_last_synced_at(&self, at: DateTime<Utc>) {
        self.put(LAST_SYNCED_KEY, Value::String(at.to_rfc3339()));
    }

    /// Human-readable age of the last sync relative to `now`.
    pub fn last_synced_label(&self, now: DateTime<Utc>) -> String {
        let Some(at) = self.last_synced_at() else {
            return "Never".to_string();
        };
        let age = now.signed_duration_since(at);
        match age.num_minutes() {
            m if m < 1 => "Just now".to_string(),
            1 => "1 minute ago".to_string(),
            m if m < 60 => format!("{m} minutes ago"),
            _ => match age.num_hours() {
                1 => "1 hour ago".to_string(),
                h if h < 24 => format!("{h} hours ago"),
                _ => at.format("%-d %B %Y").to_string(),
            },
        }
    }

    /// Writes pending settings to the sink now.
    pub fn flush(&self) -> SyncResult<()> {
        self.writer.flush_now()
    }

    /// Number of settings writes not yet flushed.
    pub fn pending_writes(&self) -> usize {
        self.writer.pending_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_when_empty() {
        let settings = SettingsStore::in_memory();
        assert!(!settings.sync_enabled());
        assert!(settings.last_synced_at().is_none());
        assert_eq!(settings.last_synced_label(Utc::now()), "Never");
    }

    #[tokio::test(start_paused = true)]
    async fn writes_are_coalesced_then_persisted() {
        let sink = Arc::new(MemorySink::new());
        let settings = SettingsStore::open(sink.clone(), Duration::from_millis(500)).unwrap();

        settings.set_sync_enabled(true);
        settings.set_sync_enabled(false);
        settings.set_sync_enabled(true);
        assert!(settings.sync_enabled());
        assert_eq!(sink.batch_count(), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.batch_count(), 1);
        assert_eq!(sink.get(SYNC_ENABLED_KEY), Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn json_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let at = Utc.with_ymd_and_hms(2025, 3, 10, 8, 30, 0).unwrap();

        {
            let sink = Arc::new(JsonFileSink::new(&path));
            let settings = SettingsStore::open(sink, Duration::from_secs(60)).unwrap();
            settings.set_sync_enabled(true);
            settings.set_last_synced_at(at);
            settings.flush().unwrap();
        }

        let reopened =
            SettingsStore::open(Arc::new(JsonFileSink::new(&path)), Duration::ZERO).unwrap();
        assert!(reopened.sync_enabled());
        assert_eq!(reopened.last_synced_at(), Some(at));
    }

    #[test]
    fn last_synced_labels() {
        let settings = SettingsStore::in_memory();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();

        settings.set_last_synced_at(now - chrono::Duration::seconds(20));
        assert_eq!(settings.last_synced_label(now), "Just now");

        settings.set_last_synced_at(now - chrono::Duration::minutes(5));
        assert_eq!(settings.last_synced_label(now), "5 minutes ago");

        settings.set_last_synced_at(now - chrono::Duration::hours(3));
        assert_eq!(settings.last_synced_label(now), "3 hours ago");

        settings.set_last_synced_at(now - chrono::Duration::days(3));
        assert_eq!(settings.last_synced_label(now), "7 March 2025");
    }
}
