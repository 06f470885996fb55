use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::job::Operation;

/// Key/value store guarded by a single lock.
///
/// One instance belongs to one engine (or one peer service) and lives as long
/// as its owner. Entries never expire.
#[derive(Debug)]
pub struct ResultCache<V = Value> {
    entries: Mutex<HashMap<String, V>>,
}

impl<V> Default for ResultCache<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> ResultCache<V> {
    /// Creates a new, empty `ResultCache`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.entries.lock().insert(key.into(), value);
    }

    /// Returns the value under `key`, computing and storing it first if absent.
    ///
    /// The lock is held while `compute` runs, so concurrent callers for the
    /// same key observe exactly one computation. `compute` must not touch
    /// this cache.
    pub fn get_or_insert_with<F>(&self, key: &str, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        let mut entries = self.entries.lock();
        if let Some(value) = entries.get(key) {
            return value.clone();
        }

        let value = compute();
        entries.insert(key.to_string(), value.clone());
        value
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Content derived cache key for running `operation` over `inputs`.
///
/// # Returns
/// The SHA-256 hex digest of the operation name and the canonical JSON of the inputs.
pub fn fingerprint(operation: Operation, inputs: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(operation.name().as_bytes());
    hasher.update([0]);
    hasher.update(inputs.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
