//! First-match union of several operators.

use async_trait::async_trait;

use super::{Etf, EtfRef};
use crate::context::Context;
use crate::error::Result;
use crate::locale::path_key;
use crate::pack::{Pack, PackEntry};

/// Each branch `i` evaluates under `path.i`. An incoming event is handled by
/// the first branch (in order) that produces output for it.
pub struct Merge {
    branches: Vec<EtfRef>,
}

impl Merge {
    pub fn new(branches: Vec<EtfRef>) -> Self {
        Self { branches }
    }

    async fn dispatch(&self, path: &str, ctx: &mut Context, events: &Pack) -> Result<Pack> {
        let mut out = Pack::new();
        for event in events {
            ctx.replace_inlet(Pack::single(event.clone()));
            for (i, branch) in self.branches.iter().enumerate() {
                let pack = branch.state(&path_key(path, &i.to_string()), ctx).await?;
                if !pack.is_empty() {
                    out.extend(pack);
                    break;
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Etf for Merge {
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
        for (i, branch) in self.branches.iter().enumerate() {
            for key in branch.keys(&path_key(path, &i.to_string()), ctx).await? {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    /// Per key, the entry with the highest version across branches.
    async fn value(&self, path: &str, keys: &[String], ctx: &Context) -> Result<Pack> {
        let mut best: Vec<PackEntry> = Vec::new();
        for (i, branch) in self.branches.iter().enumerate() {
            let pack = branch.value(&path_key(path, &i.to_string()), keys, ctx).await?;
            for entry in pack {
                match best.iter_mut().find(|b| b.key == entry.key) {
                    Some(current) if entry.version > current.version => *current = entry,
                    Some(_) => {}
                    None => best.push(entry),
                }
            }
        }
        Ok(best.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etf::{ByKey, Extract, Transform, TransformKind};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn flag(tag: &str, flag: bool) -> EtfRef {
        let keyed = ByKey::new(
            Arc::new(Extract::new([tag])),
            Arc::new(|v: &Value, _: &str| -> anyhow::Result<Value> { Ok(v["id"].clone()) }),
        );
        Arc::new(Transform::new(
            Arc::new(keyed),
            TransformKind::Map(Arc::new(move |_: &Value, _: &str| -> anyhow::Result<Value> {
                Ok(json!(flag))
            })),
        ))
    }

    #[tokio::test]
    async fn latest_branch_wins_on_pull() {
        let op = Merge::new(vec![flag("ACTIVATED", true), flag("COMPLETED", false)]);
        let storage = Arc::new(crate::storage::InMemoryStorage::new());

        let mut ctx = Context::new(storage.clone()).with_inlet(Pack::from_events(
            "",
            vec![json!({"type": "ACTIVATED", "id": "1"})],
            1,
            false,
        ));
        op.state("", &mut ctx).await.unwrap();
        let mut ctx = Context::new(storage.clone()).with_inlet(Pack::from_events(
            "",
            vec![json!({"type": "COMPLETED", "id": "1"})],
            2,
            false,
        ));
        let out = op.state("", &mut ctx).await.unwrap();
        assert_eq!(out.active_values(), vec![json!(false)]);

        let ctx = Context::new(storage);
        let read = op.value("", &["1".into()], &ctx).await.unwrap();
        assert_eq!(read.active_values(), vec![json!(false)]);
        assert_eq!(read.max_version(), 2);
    }
}
