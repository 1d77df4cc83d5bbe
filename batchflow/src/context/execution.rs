//! Execution context: the persisted progress snapshot of a step or job.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A serializable key/value snapshot of execution progress.
///
/// Values are plain JSON (numbers, strings, RFC 3339 dates, small objects)
/// so a context never holds a live resource. Readers and writers record
/// their position here between chunks; the step persists it atomically with
/// each chunk commit and hands it back on restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default)]
    entries: BTreeMap<String, serde_json::Value>,
    /// Number of times this context has been persisted.
    #[serde(default)]
    version: u64,
    #[serde(skip)]
    dirty: bool,
}

impl ExecutionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context from existing entries.
    #[must_use]
    pub fn from_entries(entries: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            entries,
            version: 0,
            dirty: false,
        }
    }

    /// Stores a raw JSON value. Marks the context dirty if the value changed.
    pub fn put_value(&mut self, key: impl Into<String>, value: serde_json::Value) {
        let key = key.into();
        if self.entries.get(&key) != Some(&value) {
            self.entries.insert(key, value);
            self.dirty = true;
        }
    }

    /// Stores any serializable value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented as JSON.
    pub fn put<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.put_value(key, value);
        Ok(())
    }

    /// Stores an integer.
    pub fn put_long(&mut self, key: impl Into<String>, value: i64) {
        self.put_value(key, serde_json::Value::from(value));
    }

    /// Stores a float.
    pub fn put_double(&mut self, key: impl Into<String>, value: f64) {
        self.put_value(key, serde_json::Value::from(value));
    }

    /// Stores a string.
    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.put_value(key, serde_json::Value::String(value.into()));
    }

    /// Stores a timestamp as an RFC 3339 string.
    pub fn put_date(&mut self, key: impl Into<String>, value: DateTime<Utc>) {
        self.put_value(key, serde_json::Value::String(value.to_rfc3339()));
    }

    /// Returns the raw JSON value for a key.
    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    /// Reads a value back into a typed form.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value does not match `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.entries
            .get(key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
    }

    /// Returns an integer, if present and integral.
    #[must_use]
    pub fn get_long(&self, key: &str) -> Option<i64> {
        self.entries.get(key).and_then(serde_json::Value::as_i64)
    }

    /// Returns an integer or the default.
    #[must_use]
    pub fn get_long_or(&self, key: &str, default: i64) -> i64 {
        self.get_long(key).unwrap_or(default)
    }

    /// Returns a float, if present and numeric.
    #[must_use]
    pub fn get_double(&self, key: &str) -> Option<f64> {
        self.entries.get(key).and_then(serde_json::Value::as_f64)
    }

    /// Returns a string, if present.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(serde_json::Value::as_str)
    }

    /// Returns a timestamp stored with [`put_date`](Self::put_date).
    #[must_use]
    pub fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get_string(key)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the context holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns all keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Returns a copy of all entries.
    #[must_use]
    pub fn entries(&self) -> BTreeMap<String, serde_json::Value> {
        self.entries.clone()
    }

    /// Returns true if the context changed since it was last persisted.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns how many times the context has been persisted.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Records a successful persist: bumps the version and clears the dirty flag.
    pub fn mark_persisted(&mut self) {
        self.version += 1;
        self.dirty = false;
    }

    /// Returns a fresh copy for a restarted execution: same entries,
    /// version carried over, not dirty.
    #[must_use]
    pub fn resume(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            version: self.version,
            dirty: false,
        }
    }

    /// Serializes to the JSON wire form used by repositories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Restores a context from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a serialized context.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl PartialEq for ExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}
