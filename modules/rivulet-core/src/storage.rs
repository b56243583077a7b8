//! Storage capability and the in-memory default.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::locale::has_key_prefix;

/// A stored value and the batch version that wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored {
    pub value: Value,
    pub version: u64,
}

/// Path-addressed key/value state owned by one executor.
///
/// Implemented by `InMemoryStorage` (default). Also implemented for `Arc<S>`
/// so tests can keep a handle for assertions.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read_value(&self, path: &str) -> Result<Option<Stored>>;

    /// Every stored value by path.
    async fn read_values(&self) -> Result<BTreeMap<String, Value>>;

    /// Every stored version by path.
    async fn read_meta(&self) -> Result<BTreeMap<String, u64>>;

    async fn store_value(&self, path: &str, value: Value, version: u64) -> Result<()>;

    async fn drop_value(&self, path: &str) -> Result<()>;

    /// Drop `prefix` itself and every path below `prefix.`.
    async fn drop_by_prefix(&self, prefix: &str) -> Result<()>;

    async fn clear_all(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// InMemoryStorage
// ---------------------------------------------------------------------------

/// Volatile storage backed by an ordered map.
#[derive(Default)]
pub struct InMemoryStorage {
    entries: Mutex<BTreeMap<String, Stored>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored paths in order (for test assertions).
    pub fn paths(&self) -> Vec<String> {
        self.lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Stored>>> {
        self.entries
            .lock()
            .map_err(|e| Error::Storage(format!("storage lock poisoned: {e}")))
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn read_value(&self, path: &str) -> Result<Option<Stored>> {
        Ok(self.lock()?.get(path).cloned())
    }

    async fn read_values(&self) -> Result<BTreeMap<String, Value>> {
        Ok(self
            .lock()?
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect())
    }

    async fn read_meta(&self) -> Result<BTreeMap<String, u64>> {
        Ok(self
            .lock()?
            .iter()
            .map(|(k, v)| (k.clone(), v.version))
            .collect())
    }

    async fn store_value(&self, path: &str, value: Value, version: u64) -> Result<()> {
        self.lock()?
            .insert(path.to_string(), Stored { value, version });
        Ok(())
    }

    async fn drop_value(&self, path: &str) -> Result<()> {
        self.lock()?.remove(path);
        Ok(())
    }

    async fn drop_by_prefix(&self, prefix: &str) -> Result<()> {
        self.lock()?.retain(|k, _| !has_key_prefix(k, prefix));
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Arc<S> blanket
// ---------------------------------------------------------------------------

#[async_trait]
impl<S: Storage + ?Sized> Storage for Arc<S> {
    async fn read_value(&self, path: &str) -> Result<Option<Stored>> {
        (**self).read_value(path).await
    }

    async fn read_values(&self) -> Result<BTreeMap<String, Value>> {
        (**self).read_values().await
    }

    async fn read_meta(&self) -> Result<BTreeMap<String, u64>> {
        (**self).read_meta().await
    }

    async fn store_value(&self, path: &str, value: Value, version: u64) -> Result<()> {
        (**self).store_value(path, value, version).await
    }

    async fn drop_value(&self, path: &str) -> Result<()> {
        (**self).drop_value(path).await
    }

    async fn drop_by_prefix(&self, prefix: &str) -> Result<()> {
        (**self).drop_by_prefix(prefix).await
    }

    async fn clear_all(&self) -> Result<()> {
        (**self).clear_all().await
    }
}

// ---------------------------------------------------------------------------
// Teardowns
// ---------------------------------------------------------------------------

/// Cancels an external subscription opened by `publish_async`.
pub type Teardown = Box<dyn FnOnce() + Send>;

/// Teardown callbacks addressed like storage paths. They are not values, so
/// they live beside storage rather than inside it.
#[derive(Default)]
pub struct Teardowns {
    callbacks: Mutex<HashMap<String, Teardown>>,
}

impl Teardowns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a teardown, returning the one it replaced.
    pub fn insert(&self, path: String, teardown: Teardown) -> Option<Teardown> {
        self.callbacks
            .lock()
            .ok()
            .and_then(|mut m| m.insert(path, teardown))
    }

    pub fn take(&self, path: &str) -> Option<Teardown> {
        self.callbacks.lock().ok().and_then(|mut m| m.remove(path))
    }

    /// Remove and run every teardown at or below `prefix`. Callbacks run
    /// after the registry lock is released.
    pub fn run_by_prefix(&self, prefix: &str) -> usize {
        let taken: Vec<Teardown> = match self.callbacks.lock() {
            Ok(mut m) => {
                let paths: Vec<String> = m
                    .keys()
                    .filter(|k| has_key_prefix(k, prefix))
                    .cloned()
                    .collect();
                paths.iter().filter_map(|k| m.remove(k)).collect()
            }
            Err(_) => Vec::new(),
        };
        let count = taken.len();
        for teardown in taken {
            teardown();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
