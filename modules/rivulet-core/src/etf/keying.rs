//! Operators that recompute or narrow entry keys.

use async_trait::async_trait;

use super::{Etf, EtfRef, KeyFn};
use crate::context::{empty_keys, Context};
use crate::error::{Error, Result};
use crate::locale::{has_key_prefix, key_from_value, path_key, ADD_KEY, BY_KEY};
use crate::pack::Pack;

/// Re-keys entries from their value and persists them under the new keys.
///
/// With `compose` the computed key is appended to the previous one
/// (`old.new`), otherwise it replaces it.
pub struct ByKey {
    prev: EtfRef,
    key: KeyFn,
    compose: bool,
}

impl ByKey {
    pub fn new(prev: EtfRef, key: KeyFn) -> Self {
        Self {
            prev,
            key,
            compose: false,
        }
    }

    pub fn composed(prev: EtfRef, key: KeyFn) -> Self {
        Self {
            prev,
            key,
            compose: true,
        }
    }
}

#[async_trait]
impl Etf for ByKey {
    fn locale(&self) -> String {
        let token = if self.compose { ADD_KEY } else { BY_KEY };
        path_key(&self.prev.locale(), token)
    }

    async fn state(&self, path: &str, ctx: &mut Context) -> Result<Pack> {
        let pack = self.prev.state(path, ctx).await?;
        let mut keyed = Pack::new();
        for entry in pack {
            if entry.deleted {
                continue;
            }
            let computed = (self.key)(&entry.value, &entry.key).map_err(Error::Transform)?;
            let Some(new_key) = key_from_value(&computed) else {
                continue;
            };
            let key = if self.compose {
                path_key(&entry.key, &new_key)
            } else {
                new_key
            };
            keyed.push(entry.with_key(key));
        }
        ctx.write_by_keys(&path_key(path, &self.locale()), &keyed)
            .await?;
        Ok(keyed)
    }

    async fn keys(&self, path: &str, ctx: &Context) -> Result<Vec<String>> {
        ctx.all_keys(path, &self.locale()).await
    }

    async fn value(&self, path: &str, keys: &[String], ctx: &Context) -> Result<Pack> {
        ctx.value_by_keys(path, &self.locale(), keys).await
    }
}

/// Narrows a keyed view to one key and re-keys it as the single key.
pub struct SelectKey {
    prev: EtfRef,
    key: String,
}

impl SelectKey {
    pub fn new(prev: EtfRef, key: impl Into<String>) -> Self {
        Self {
            prev,
            key: key.into(),
        }
    }
}

#[async_trait]
impl Etf for SelectKey {
    fn locale(&self) -> String {
        self.prev.locale()
    }

    async fn state(&self, path: &str, ctx: &mut Context) -> Result<Pack> {
        let pack = self.prev.state(path, ctx).await?;
        Ok(pack
            .into_iter()
            .filter(|e| e.key == self.key)
            .map(|e| e.with_key(""))
            .collect())
    }

    async fn keys(&self, _path: &str, _ctx: &Context) -> Result<Vec<String>> {
        Ok(empty_keys())
    }

    async fn value(&self, path: &str, _keys: &[String], ctx: &Context) -> Result<Pack> {
        let pack = self
            .prev
            .value(path, std::slice::from_ref(&self.key), ctx)
            .await?;
        Ok(pack.map_entries(|e| e.with_key("")))
    }
}

/// Keeps entries whose key equals or lies under one of the prefixes; the
/// rest become tombstones.
pub struct SelectPrefixKey {
    prev: EtfRef,
    prefixes: Vec<String>,
}

impl SelectPrefixKey {
    pub fn new(prev: EtfRef, prefixes: Vec<String>) -> Self {
        Self { prev, prefixes }
    }

    fn matches(&self, key: &str) -> bool {
        self.prefixes.iter().any(|p| has_key_prefix(key, p))
    }

    fn narrow(&self, pack: Pack) -> Pack {
        pack.map_entries(|e| {
            if self.matches(&e.key) {
                e
            } else {
                e.mark_deleted()
            }
        })
    }
}

#[async_trait]
impl Etf for SelectPrefixKey {
    fn locale(&self) -> String {
        self.prev.locale()
    }

    async fn state(&self, path: &str, ctx: &mut Context) -> Result<Pack> {
        let pack = self.prev.state(path, ctx).await?;
        Ok(self.narrow(pack))
    }

    async fn keys(&self, path: &str, ctx: &Context) -> Result<Vec<String>> {
        let keys = self.prev.keys(path, ctx).await?;
        Ok(keys.into_iter().filter(|k| self.matches(k)).collect())
    }

    async fn value(&self, path: &str, keys: &[String], ctx: &Context) -> Result<Pack> {
        let wanted: Vec<String> = keys.iter().filter(|k| self.matches(k)).cloned().collect();
        let pack = self.prev.value(path, &wanted, ctx).await?;
        Ok(self.narrow(pack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etf::Extract;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn by_id() -> ByKey {
        ByKey::new(
            Arc::new(Extract::new(["T"])),
            Arc::new(|v: &Value, _: &str| -> anyhow::Result<Value> { Ok(v["id"].clone()) }),
        )
    }

    #[tokio::test]
    async fn by_key_persists_under_locale() {
        let op = by_id();
        let mut ctx = Context::in_memory().with_inlet_events(vec![
            json!({"type": "T", "id": "1"}),
            json!({"type": "T", "id": 2}),
            json!({"type": "T"}),
        ]);
        let out = op.state("todos", &mut ctx).await.unwrap();
        assert_eq!(out.len(), 2);

        let keys = op.keys("todos", &ctx).await.unwrap();
        assert_eq!(keys, vec!["1".to_string(), "2".to_string()]);
        assert!(ctx.read_opt("todos.BY_KEY.2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn select_prefix_key_filters_enumeration() {
        let op = SelectPrefixKey::new(Arc::new(by_id()), vec!["1".into()]);
        let mut ctx = Context::in_memory().with_inlet_events(vec![
            json!({"type": "T", "id": "1"}),
            json!({"type": "T", "id": "10"}),
        ]);
        let out = op.state("", &mut ctx).await.unwrap();
        assert_eq!(out.filter_active().len(), 1);
        assert_eq!(op.keys("", &ctx).await.unwrap(), vec!["1".to_string()]);
    }
}
