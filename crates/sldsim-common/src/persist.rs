//! Persistence primitives.
//!
//! The key-value store is an external collaborator with plain
//! `get`/`set`/`remove` semantics. Nodes never talk to it directly: the
//! aggregator reads one [`StateSnapshot`] at mount and nodes write their state
//! into a [`PersistBatch`] that a single writer flushes.
//!
//! Values are JSON text, as the browser build stored them: `true`/`false` for
//! single switches and `[true,false,...]` for contactor rows. Anything that does
//! not parse is treated as "use the default".

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

/// Storage key of the master supply state.
pub const SUPPLY_KEY: &str = "inputCurrentOn";

/// Storage key of the zoom mode flag.
pub const ZOOM_MODE_KEY: &str = "zoomModeEnabled";

/// Storage key of the focused (expanded) node. Absent when nothing is focused.
pub const FOCUS_KEY: &str = "zoomedCircuit";

/// Keys owned by the aggregator rather than by a node.
pub const GLOBAL_KEYS: [&str; 3] = [SUPPLY_KEY, ZOOM_MODE_KEY, FOCUS_KEY];

/// Errors reported by storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend cannot be used in this environment.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// External key-value store.
pub trait KeyValueStore {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value.
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete a value.
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store, used for sessions without a backing file and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored entries.
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        MemoryStore {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Store for environments without a storage backend. Every operation is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl KeyValueStore for NullStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    fn set(&mut self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn remove(&mut self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// Value Encoding
// ============================================================================

/// Parse a stored boolean. Only the JSON literals `true` and `false` are accepted.
pub fn parse_bool(raw: &str) -> Option<bool> {
    serde_json::from_str::<bool>(raw.trim()).ok()
}

/// Parse a stored JSON array of exactly `len` entries.
///
/// Entries are coerced the way the browser build coerced them: `null`, `0`,
/// `""` and `false` are open, everything else is closed.
pub fn parse_bool_array(raw: &str, len: usize) -> Option<Vec<bool>> {
    let values: Vec<Value> = serde_json::from_str(raw.trim()).ok()?;
    if values.len() != len {
        return None;
    }
    Some(values.iter().map(truthy).collect())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Encode a boolean for storage.
pub fn encode_bool(value: bool) -> String {
    value.to_string()
}

/// Encode a boolean row for storage.
pub fn encode_bool_array(values: &[bool]) -> String {
    let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", items.join(","))
}

// ============================================================================
// Snapshot and Batch
// ============================================================================

/// Immutable view of persisted values, read once at mount.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    values: BTreeMap<String, String>,
}

impl StateSnapshot {
    /// Create an empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read `keys` from `store`. Keys the store cannot read are left out.
    pub fn read<'a, S, I>(store: &S, keys: I) -> Self
    where
        S: KeyValueStore + ?Sized,
        I: IntoIterator<Item = &'a str>,
    {
        let mut values = BTreeMap::new();
        for key in keys {
            match store.get(key) {
                Ok(Some(value)) => {
                    values.insert(key.to_string(), value);
                }
                Ok(None) => {}
                Err(e) => warn!(key, error = %e, "failed to read persisted value"),
            }
        }
        StateSnapshot { values }
    }

    /// Raw stored text.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Stored boolean, if present and well-formed.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_str(key).and_then(parse_bool)
    }

    /// Stored boolean row of length `len`, if present and well-formed.
    pub fn get_bool_array(&self, key: &str, len: usize) -> Option<Vec<bool>> {
        self.get_str(key).and_then(|raw| parse_bool_array(raw, len))
    }

    /// Number of values present.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was restored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StateSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        StateSnapshot {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Desired persisted values; `None` means the key should be removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistBatch {
    values: BTreeMap<String, Option<String>>,
}

impl PersistBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a boolean.
    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) {
        self.values.insert(key.into(), Some(encode_bool(value)));
    }

    /// Store a boolean row.
    pub fn set_bool_array(&mut self, key: impl Into<String>, values: &[bool]) {
        self.values.insert(key.into(), Some(encode_bool_array(values)));
    }

    /// Store raw text.
    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), Some(value.into()));
    }

    /// Mark a key for removal.
    pub fn remove(&mut self, key: impl Into<String>) {
        self.values.insert(key.into(), None);
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> + '_ {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
