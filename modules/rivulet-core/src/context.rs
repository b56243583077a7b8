//! Execution state threaded through one operator evaluation.
//!
//! Push evaluation takes `&mut Context` (it consumes the inlet and appends to
//! the outlets); pull evaluation only needs `&Context`.

use std::sync::Arc;

use crate::error::Result;
use crate::event::Event;
use crate::locale::{path_key, relative_key};
use crate::pack::{Pack, PackEntry};
use crate::storage::{InMemoryStorage, Storage, Stored, Teardowns};

/// Re-enters the owning executor's publish from outside a processing cycle.
pub type AsyncOutlet = Arc<dyn Fn(Event) + Send + Sync>;

pub struct Context {
    storage: Arc<dyn Storage>,
    teardowns: Arc<Teardowns>,
    inlet: Pack,
    outlet_in: Pack,
    outlet_out: Pack,
    outlet_async: Option<AsyncOutlet>,
}

impl Context {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            teardowns: Arc::new(Teardowns::new()),
            inlet: Pack::new(),
            outlet_in: Pack::new(),
            outlet_out: Pack::new(),
            outlet_async: None,
        }
    }

    /// Fresh context over empty in-memory storage.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStorage::new()))
    }

    pub fn with_inlet(mut self, inlet: Pack) -> Self {
        self.inlet = inlet;
        self
    }

    /// Seed the inlet with raw events under the single key at version 0.
    pub fn with_inlet_events(self, events: impl IntoIterator<Item = Event>) -> Self {
        self.with_inlet(Pack::from_events("", events, 0, false))
    }

    pub fn with_outlet_async(mut self, outlet: AsyncOutlet) -> Self {
        self.outlet_async = Some(outlet);
        self
    }

    pub fn with_teardowns(mut self, teardowns: Arc<Teardowns>) -> Self {
        self.teardowns = teardowns;
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn teardowns(&self) -> &Arc<Teardowns> {
        &self.teardowns
    }

    pub fn inlet(&self) -> &Pack {
        &self.inlet
    }

    /// Replace the inlet, returning the previous one.
    pub fn replace_inlet(&mut self, inlet: Pack) -> Pack {
        std::mem::replace(&mut self.inlet, inlet)
    }

    pub fn outlet_in(&self) -> &Pack {
        &self.outlet_in
    }

    pub fn outlet_out(&self) -> &Pack {
        &self.outlet_out
    }

    pub fn take_outlet_in(&mut self) -> Pack {
        std::mem::take(&mut self.outlet_in)
    }

    pub fn take_outlet_out(&mut self) -> Pack {
        std::mem::take(&mut self.outlet_out)
    }

    pub fn push_outlet_in(&mut self, pack: Pack) {
        self.outlet_in.extend(pack);
    }

    pub fn push_outlet_out(&mut self, pack: Pack) {
        self.outlet_out.extend(pack);
    }

    pub fn outlet_async(&self) -> Option<&AsyncOutlet> {
        self.outlet_async.as_ref()
    }

    // -----------------------------------------------------------------------
    // Storage helpers shared by the operators
    // -----------------------------------------------------------------------

    pub async fn read_opt(&self, path: &str) -> Result<Option<Stored>> {
        self.storage.read_value(path).await
    }

    /// Persist every entry under `path.<key>`; tombstones delete.
    pub async fn write_by_keys(&self, path: &str, pack: &Pack) -> Result<()> {
        for entry in pack {
            let target = path_key(path, &entry.key);
            if entry.deleted {
                self.storage.drop_value(&target).await?;
            } else {
                self.storage
                    .store_value(&target, entry.value.clone(), entry.version)
                    .await?;
            }
        }
        Ok(())
    }

    /// Keys stored directly under `path.locale`.
    pub async fn all_keys(&self, path: &str, locale: &str) -> Result<Vec<String>> {
        let prefix = path_key(path, locale);
        let meta = self.storage.read_meta().await?;
        let mut keys: Vec<String> = Vec::new();
        for stored in meta.keys() {
            if let Some(key) = relative_key(&prefix, stored) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    /// Stored entries under `path.locale` for the requested keys; missing
    /// keys are skipped.
    pub async fn value_by_keys(&self, path: &str, locale: &str, keys: &[String]) -> Result<Pack> {
        let prefix = path_key(path, locale);
        let mut pack = Pack::new();
        for key in keys {
            if let Some(stored) = self.read_opt(&path_key(&prefix, key)).await? {
                pack.push(PackEntry::active(key.clone(), stored.value, stored.version));
            }
        }
        Ok(pack)
    }
}

/// Keys of an operator with nothing stored: just the single key.
pub fn empty_keys() -> Vec<String> {
    vec![String::new()]
}
