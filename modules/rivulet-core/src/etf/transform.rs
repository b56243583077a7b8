//! Entry-wise transforms. None of these touch storage; shape mismatches
//! filter the entry out instead of failing.

use async_trait::async_trait;
use serde_json::Value;

use super::{Etf, EtfRef, FireFn, MapArrayFn, MapFn, PredicateFn};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::pack::{Pack, PackEntry};

pub enum TransformKind {
    Map(MapFn),
    MapArray(MapArrayFn),
    /// Rejected entries become tombstones rather than disappearing.
    Filter(PredicateFn),
    NotNull,
    Flatten,
    Select(String),
    /// Tombstones become present entries with a `Null` value; pulls are
    /// total over the requested keys.
    Optional,
    NoEffect,
    /// Push-only observer.
    Fire(FireFn),
}

pub struct Transform {
    prev: EtfRef,
    kind: TransformKind,
}

impl Transform {
    pub fn new(prev: EtfRef, kind: TransformKind) -> Self {
        Self { prev, kind }
    }

    fn apply(&self, pack: Pack, pushing: bool) -> Result<Pack> {
        let mut out = Pack::new();
        for entry in pack {
            match &self.kind {
                TransformKind::Map(f) => {
                    if entry.deleted {
                        out.push(entry);
                    } else {
                        let value = f(&entry.value, &entry.key).map_err(Error::Transform)?;
                        out.push(entry.with_value(value));
                    }
                }
                TransformKind::MapArray(f) => {
                    if entry.deleted {
                        out.push(entry);
                    } else {
                        let values = f(&entry.value, &entry.key).map_err(Error::Transform)?;
                        out.extend(values.into_iter().map(|v| entry.clone().with_value(v)));
                    }
                }
                TransformKind::Filter(f) => {
                    if entry.is_active() && f(&entry.value, &entry.key).map_err(Error::Transform)? {
                        out.push(entry);
                    } else {
                        out.push(entry.mark_deleted());
                    }
                }
                TransformKind::NotNull => {
                    if entry.value.is_null() {
                        out.push(entry.mark_deleted());
                    } else {
                        out.push(entry);
                    }
                }
                TransformKind::Flatten => {
                    if entry.deleted {
                        out.push(entry);
                    } else if let Value::Array(items) = &entry.value {
                        out.extend(items.iter().map(|v| entry.clone().with_value(v.clone())));
                    }
                }
                TransformKind::Select(field) => {
                    let picked = entry.value.get(field.as_str()).cloned();
                    if let (true, Some(v)) = (entry.is_active(), picked) {
                        out.push(entry.with_value(v));
                    }
                }
                TransformKind::Optional => {
                    if entry.deleted && pushing {
                        out.push(entry.mark_active());
                    } else {
                        out.push(entry);
                    }
                }
                TransformKind::NoEffect => out.push(entry.mark_no_effect()),
                TransformKind::Fire(f) => {
                    if pushing && entry.is_effective() {
                        f(&entry.value, &entry.key);
                    }
                    out.push(entry);
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Etf for Transform {
    fn locale(&self) -> String {
        self.prev.locale()
    }

    async fn state(&self, path: &str, ctx: &mut Context) -> Result<Pack> {
        let pack = self.prev.state(path, ctx).await?;
        self.apply(pack, true)
    }

    async fn keys(&self, path: &str, ctx: &Context) -> Result<Vec<String>> {
        self.prev.keys(path, ctx).await
    }

    async fn value(&self, path: &str, keys: &[String], ctx: &Context) -> Result<Pack> {
        let pack = self.prev.value(path, keys, ctx).await?;
        match self.kind {
            TransformKind::Optional => Ok(complete_keys(pack, keys)),
            _ => self.apply(pack, false),
        }
    }
}

/// One entry per requested key: the stored active entry, or an absent value
/// at version 0.
fn complete_keys(pack: Pack, keys: &[String]) -> Pack {
    keys.iter()
        .map(|key| {
            pack.iter()
                .find(|e| &e.key == key && e.is_active())
                .cloned()
                .unwrap_or_else(|| PackEntry::active(key.clone(), Value::Null, 0))
        })
        .collect()
}
