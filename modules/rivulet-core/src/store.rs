//! Store definitions: named slots of queries sharing one namespace.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::query::Query;

struct Slot {
    name: String,
    /// Bound under the slot name.
    query: Query,
    /// As supplied, for rebinding when this store is merged into another.
    source: Query,
}

/// An immutable set of slots. Every slot query is bound to this store.
pub struct StoreDef {
    id: Uuid,
    slots: Vec<Slot>,
}

impl StoreDef {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The bound query in slot `name`.
    pub fn get(&self, name: &str) -> Result<&Query> {
        self.query(name)
            .ok_or_else(|| Error::UnknownSlot(name.to_string()))
    }

    pub fn query(&self, name: &str) -> Option<&Query> {
        self.slots.iter().find(|s| s.name == name).map(|s| &s.query)
    }

    pub fn slots(&self) -> impl Iterator<Item = (&str, &Query)> {
        self.slots.iter().map(|s| (s.name.as_str(), &s.query))
    }

    pub fn names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name.clone()).collect()
    }

    pub fn action_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|s| s.query.is_action())
            .map(|s| s.name.clone())
            .collect()
    }

    /// `true` when `query` is bound to one of this store's slots.
    pub fn owns(&self, query: &Query) -> bool {
        query.store_id() == Some(self.id)
            && query
                .storekey()
                .is_some_and(|key| self.query(key).is_some())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[derive(Default)]
pub struct StoreBuilder {
    slots: Vec<(String, Query)>,
}

impl StoreBuilder {
    /// Add or replace a slot.
    pub fn slot(mut self, name: impl Into<String>, query: Query) -> Self {
        let name = name.into();
        self.slots.retain(|(existing, _)| *existing != name);
        self.slots.push((name, query));
        self
    }

    /// Take over every slot of `other`, rebinding them to the new store.
    pub fn merge(mut self, other: &StoreDef) -> Self {
        for slot in &other.slots {
            self = self.slot(slot.name.clone(), slot.source.clone());
        }
        self
    }

    pub fn build(self) -> Arc<StoreDef> {
        let id = Uuid::new_v4();
        Arc::new_cyclic(|store| StoreDef {
            id,
            slots: self
                .slots
                .into_iter()
                .map(|(name, source)| Slot {
                    query: source.bind(&name, id, store.clone()),
                    name,
                    source,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{action, extract};

    #[test]
    fn slots_are_bound_to_their_store() {
        let store = StoreDef::builder()
            .slot("todos", extract(["TODO_CREATED"]).by_id())
            .slot("create", action(|v| v.clone()).internal())
            .build();

        let todos = store.get("todos").unwrap();
        assert_eq!(todos.storekey(), Some("todos"));
        assert_eq!(todos.store_id(), Some(store.id()));
        assert!(todos.store().is_some());
        assert!(store.owns(todos));
        assert_eq!(store.action_names(), vec!["create".to_string()]);
    }

    #[test]
    fn merged_stores_rebind_slots() {
        let inner = StoreDef::builder()
            .slot("a", extract(["A"]))
            .build();
        let outer = StoreDef::builder().merge(&inner).slot("b", extract(["B"])).build();

        assert_eq!(outer.names(), vec!["a".to_string(), "b".to_string()]);
        let a = outer.get("a").unwrap();
        assert_eq!(a.store_id(), Some(outer.id()));
        assert!(!inner.owns(a));
    }

    #[test]
    fn unknown_slot_is_an_error() {
        let store = StoreDef::builder().build();
        assert!(matches!(store.get("nope"), Err(Error::UnknownSlot(_))));
    }
}
