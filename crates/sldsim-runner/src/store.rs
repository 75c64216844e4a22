//! Storage backends and the single coalescing writer.

use sldsim_common::persist::{KeyValueStore, PersistBatch, StateSnapshot, StoreError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Key-value store kept as one JSON object on disk.
///
/// Every write rewrites the file, so the file always holds the last settled
/// state of the switchboard.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if the file does not exist yet.
    ///
    /// A file that is not a JSON object is treated as empty and replaced on
    /// the next write. Non-string values are kept as their JSON text, so a
    /// hand-edited `true` or `[true,false]` still reads back.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                parse_entries(&path, &text)
            }
        } else {
            BTreeMap::new()
        };
        Ok(JsonFileStore { path, entries })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored entries.
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    fn save(&self) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

fn parse_entries(path: &Path, text: &str) -> BTreeMap<String, String> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) => map
            .into_iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(s) => (key, s),
                other => (key, other.to_string()),
            })
            .collect(),
        Ok(_) => {
            warn!(path = %path.display(), "state file is not a JSON object, starting empty");
            BTreeMap::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable state file, starting empty");
            BTreeMap::new()
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        self.save()
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        if self.entries.remove(key).is_some() {
            self.save()?;
        }
        Ok(())
    }
}

/// Writes a [`PersistBatch`] to a store, skipping keys whose value has not
/// changed since the last flush.
#[derive(Debug, Clone, Default)]
pub struct StateWriter {
    /// Last known stored value per key; `None` means absent.
    written: BTreeMap<String, Option<String>>,
}

impl StateWriter {
    /// Create a writer that knows nothing about the store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer that treats `keys` as stored exactly as in `snapshot`.
    pub fn from_snapshot<'a, I>(snapshot: &StateSnapshot, keys: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let written = keys
            .into_iter()
            .map(|key| (key.to_string(), snapshot.get_str(key).map(str::to_string)))
            .collect();
        StateWriter { written }
    }

    /// Write every changed entry of `batch`. Returns the number of keys written.
    ///
    /// Store failures are logged and the key is retried on the next flush.
    pub fn flush(&mut self, store: &mut dyn KeyValueStore, batch: &PersistBatch) -> usize {
        let mut written = 0;
        for (key, value) in batch.iter() {
            if self.written.get(key).map(Option::as_deref) == Some(value) {
                continue;
            }
            let result = match value {
                Some(v) => store.set(key, v),
                None => store.remove(key),
            };
            match result {
                Ok(()) => {
                    self.written.insert(key.to_string(), value.map(str::to_string));
                    written += 1;
                }
                Err(e) => warn!(key, error = %e, "failed to persist value"),
            }
        }
        if written > 0 {
            debug!(keys = written, "persisted state");
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sldsim_common::persist::MemoryStore;
    use tempfile::TempDir;

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("sandboxed".to_string()))
        }

        fn set(&mut self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("sandboxed".to_string()))
        }

        fn remove(&mut self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("sandboxed".to_string()))
        }
    }

    #[test]
    fn test_writer_skips_unchanged_keys() {
        let mut store = MemoryStore::new();
        let mut writer = StateWriter::new();
        let mut batch = PersistBatch::new();
        batch.set_bool("a", true);
        batch.remove("b");
        assert_eq!(writer.flush(&mut store, &batch), 2);
        assert_eq!(writer.flush(&mut store, &batch), 0);

        batch.set_bool("a", false);
        assert_eq!(writer.flush(&mut store, &batch), 1);
        assert_eq!(store.get("a").unwrap().as_deref(), Some("false"));
    }

    #[test]
    fn test_writer_seeded_from_snapshot() {
        let snap: StateSnapshot = [("a", "true")].into_iter().collect();
        let mut writer = StateWriter::from_snapshot(&snap, ["a", "b"]);
        let mut batch = PersistBatch::new();
        batch.set_bool("a", true);
        batch.remove("b");
        assert_eq!(writer.flush(&mut MemoryStore::new(), &batch), 0);
    }

    #[test]
    fn test_failing_store_is_swallowed() {
        let mut writer = StateWriter::new();
        let mut batch = PersistBatch::new();
        batch.set_bool("a", true);
        assert_eq!(writer.flush(&mut FailingStore, &batch), 0);
        assert!(StateSnapshot::read(&FailingStore, ["a"]).is_empty());
    }

    #[test]
    fn test_json_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut store = JsonFileStore::open(&path).unwrap();
        store.set("inputCurrentOn", "true").unwrap();
        store.set("zoomedCircuit", "IA-RTDB-3").unwrap();
        store.remove("zoomedCircuit").unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("inputCurrentOn").unwrap().as_deref(), Some("true"));
        assert_eq!(reopened.get("zoomedCircuit").unwrap(), None);
        assert_eq!(reopened.entries().len(), 1);
    }

    #[test]
    fn test_corrupt_file_opens_empty_and_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        let mut store = JsonFileStore::open(&path).unwrap();
        assert!(store.entries().is_empty());

        store.set("inputCurrentOn", "true").unwrap();
        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("inputCurrentOn").unwrap().as_deref(), Some("true"));
    }

    #[test]
    fn test_non_string_values_read_as_json_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"inputCurrentOn": true, "FourIGBT1.outputSwitches": [true, false]}"#,
        )
        .unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get("inputCurrentOn").unwrap().as_deref(), Some("true"));
        assert_eq!(
            store.get("FourIGBT1.outputSwitches").unwrap().as_deref(),
            Some("[true,false]")
        );

        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(JsonFileStore::open(&path).unwrap().entries().is_empty());
    }
}
