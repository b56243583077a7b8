//! Keyed record assembly across named branches.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Etf, EtfRef};
use crate::context::Context;
use crate::error::Result;
use crate::locale::path_key;
use crate::pack::{Pack, PackEntry};

/// Fields assembled so far for one key.
struct Partial {
    key: String,
    fields: Map<String, Value>,
    /// Fields whose branch pushed a tombstone for this key.
    removed: Vec<String>,
    version: u64,
    no_effect: bool,
}

impl Partial {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            fields: Map::new(),
            removed: Vec::new(),
            version: 0,
            no_effect: false,
        }
    }

    fn absorb(&mut self, field: &str, entry: &PackEntry) {
        self.version = self.version.max(entry.version);
        if entry.deleted {
            self.fields.remove(field);
            if !self.removed.iter().any(|f| f == field) {
                self.removed.push(field.to_string());
            }
            return;
        }
        self.removed.retain(|f| f != field);
        self.fields.insert(field.to_string(), entry.value.clone());
    }

    fn lacks(&self, field: &str) -> bool {
        !self.fields.contains_key(field) && !self.removed.iter().any(|f| f == field)
    }
}

fn partial_for<'a>(partials: &'a mut Vec<Partial>, key: &str) -> &'a mut Partial {
    match partials.iter().position(|p| p.key == key) {
        Some(i) => &mut partials[i],
        None => {
            partials.push(Partial::new(key));
            let last = partials.len() - 1;
            &mut partials[last]
        }
    }
}

/// Each field's branch evaluates under `path.field`. A key surfaces only once
/// every field is present for it; missing fields are completed by pulling
/// the branch's current value. A key that loses a field to a pushed
/// tombstone surfaces as a tombstone itself.
pub struct Join {
    fields: Vec<(String, EtfRef)>,
}

impl Join {
    pub fn new(fields: Vec<(String, EtfRef)>) -> Self {
        Self { fields }
    }

    fn is_complete(&self, partial: &Partial) -> bool {
        self.fields
            .iter()
            .all(|(field, _)| partial.fields.contains_key(field))
    }

    fn emit(&self, partials: Vec<Partial>, tombstones: bool) -> Pack {
        partials
            .into_iter()
            .filter_map(|p| {
                if self.is_complete(&p) {
                    let mut entry = PackEntry::active(p.key, Value::Object(p.fields), p.version);
                    entry.no_effect = p.no_effect;
                    Some(entry)
                } else if tombstones && !p.removed.is_empty() {
                    Some(PackEntry::deleted(p.key, p.version))
                } else {
                    None
                }
            })
            .collect()
    }

    async fn dispatch(&self, path: &str, ctx: &mut Context, events: &Pack) -> Result<Pack> {
        let mut out = Pack::new();
        for event in events {
            let mut partials: Vec<Partial> = Vec::new();
            for (field, branch) in &self.fields {
                ctx.replace_inlet(Pack::single(event.clone()));
                let pack = branch.state(&path_key(path, field), ctx).await?;
                for entry in &pack {
                    let partial = partial_for(&mut partials, &entry.key);
                    partial.absorb(field, entry);
                    partial.no_effect |= entry.no_effect;
                }
            }
            if partials.is_empty() {
                continue;
            }
            self.complete(path, ctx, &mut partials).await?;
            out.extend(self.emit(partials, true));
        }
        Ok(out)
    }

    /// Pull the stored value of every missing field for the keys lacking it.
    async fn complete(&self, path: &str, ctx: &Context, partials: &mut [Partial]) -> Result<()> {
        for (field, branch) in &self.fields {
            let missing: Vec<String> = partials
                .iter()
                .filter(|p| p.lacks(field))
                .map(|p| p.key.clone())
                .collect();
            if missing.is_empty() {
                continue;
            }
            let pulled = branch.value(&path_key(path, field), &missing, ctx).await?;
            for entry in pulled.iter().filter(|e| !e.deleted) {
                if let Some(partial) = partials.iter_mut().find(|p| p.key == entry.key) {
                    partial.absorb(field, entry);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Etf for Join {
    fn locale(&self) -> String {
        String::new()
    }

    async fn state(&self, path: &str, ctx: &mut Context) -> Result<Pack> {
        let events = ctx.inlet().clone();
        let result = self.dispatch(path, ctx, &events).await;
        ctx.replace_inlet(events);
        result
    }

    async fn keys(&self, path: &str, ctx: &Context) -> Result<Vec<String>> {
        let mut keys: Vec<String> = Vec::new();
        for (field, branch) in &self.fields {
            for key in branch.keys(&path_key(path, field), ctx).await? {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    async fn value(&self, path: &str, keys: &[String], ctx: &Context) -> Result<Pack> {
        let mut partials: Vec<Partial> = keys.iter().map(|k| Partial::new(k)).collect();
        for (field, branch) in &self.fields {
            let pack = branch.value(&path_key(path, field), keys, ctx).await?;
            for entry in &pack {
                if let Some(partial) = partials.iter_mut().find(|p| p.key == entry.key) {
                    partial.absorb(field, entry);
                }
            }
        }
        Ok(self.emit(partials, false))
    }
}
