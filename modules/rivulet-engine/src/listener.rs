//! Change listeners registered on an executor.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rivulet_core::{Query, QueryValue};

/// Handle returned by `listen_query` / `listen_store`, used to unlisten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Current value of every slot of a store, by slot name.
pub type StoreValue = BTreeMap<String, QueryValue>;

pub type QueryCallback = Arc<dyn Fn(&QueryValue) + Send + Sync>;
pub type StoreCallback = Arc<dyn Fn(&StoreValue) + Send + Sync>;

/// What to do when a slot produced output.
#[derive(Clone)]
pub(crate) enum Watch {
    /// Re-read `query` and hand the value over.
    Query {
        query: Query,
        callback: QueryCallback,
    },
    /// Re-read the slot, patch the shared snapshot, hand over the snapshot.
    Store {
        slot: String,
        query: Query,
        snapshot: Arc<Mutex<StoreValue>>,
        callback: StoreCallback,
    },
}

enum Entry {
    Query {
        storekey: String,
        query: Query,
        callback: QueryCallback,
    },
    Store {
        snapshot: Arc<Mutex<StoreValue>>,
        callback: StoreCallback,
    },
}

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Entry)>>,
}

impl Listeners {
    fn next(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn add_query(&self, storekey: &str, query: Query, callback: QueryCallback) -> ListenerId {
        let id = self.next();
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((
                id,
                Entry::Query {
                    storekey: storekey.to_string(),
                    query,
                    callback,
                },
            ));
        }
        id
    }

    pub(crate) fn add_store(&self, snapshot: Arc<Mutex<StoreValue>>, callback: StoreCallback) -> ListenerId {
        let id = self.next();
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((id, Entry::Store { snapshot, callback }));
        }
        id
    }

    /// `true` when something was removed.
    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        match self.entries.lock() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|(existing, _)| *existing != id);
                entries.len() != before
            }
            Err(_) => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Everything to notify after slot `slot` changed. `bound` is that
    /// slot's query, needed to refresh store snapshots.
    pub(crate) fn watching(&self, slot: &str, bound: &Query) -> Vec<Watch> {
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|(_, entry)| match entry {
                Entry::Query {
                    storekey,
                    query,
                    callback,
                } if storekey == slot => Some(Watch::Query {
                    query: query.clone(),
                    callback: callback.clone(),
                }),
                Entry::Query { .. } => None,
                Entry::Store { snapshot, callback } => Some(Watch::Store {
                    slot: slot.to_string(),
                    query: bound.clone(),
                    snapshot: snapshot.clone(),
                    callback: callback.clone(),
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::{extract, StoreDef};

    #[test]
    fn watching_selects_by_slot() {
        let store = StoreDef::builder()
            .slot("a", extract(["A"]))
            .slot("b", extract(["B"]))
            .build();
        let a = store.get("a").unwrap().clone();
        let listeners = Listeners::default();

        let id = listeners.add_query("a", a.clone(), Arc::new(|_: &QueryValue| {}));
        listeners.add_store(
            Arc::new(Mutex::new(StoreValue::new())),
            Arc::new(|_: &StoreValue| {}),
        );

        assert_eq!(listeners.watching("a", &a).len(), 2);
        assert_eq!(listeners.watching("b", &a).len(), 1);

        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        assert_eq!(listeners.len(), 1);
    }
}
