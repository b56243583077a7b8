//! Per-key accumulation persisted at `path.locale.key`.

use async_trait::async_trait;
use serde_json::Value;

use super::{AccumulateFn, Etf, EtfRef};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::locale::{path_key, FOLD, LATEST, ONCE, REDUCE};
use crate::pack::Pack;

pub enum FoldKind {
    /// `f(existing, incoming)`, or `incoming` for the first value.
    Reduce(AccumulateFn),
    /// `f(existing or init, incoming)`.
    Fold(Value, AccumulateFn),
    /// First value per key wins; later ones are suppressed.
    Once,
    /// Last value per key wins.
    Latest,
}

impl FoldKind {
    fn token(&self) -> &'static str {
        match self {
            FoldKind::Reduce(_) => REDUCE,
            FoldKind::Fold(..) => FOLD,
            FoldKind::Once => ONCE,
            FoldKind::Latest => LATEST,
        }
    }

    /// `None` means the incoming entry is swallowed.
    fn step(&self, existing: Option<Value>, incoming: &Value) -> Result<Option<Value>> {
        let next = match (self, existing) {
            (FoldKind::Reduce(f), Some(acc)) => f(&acc, incoming).map_err(Error::Transform)?,
            (FoldKind::Reduce(_), None) => incoming.clone(),
            (FoldKind::Fold(init, f), acc) => {
                f(acc.as_ref().unwrap_or(init), incoming).map_err(Error::Transform)?
            }
            (FoldKind::Once, Some(_)) => return Ok(None),
            (FoldKind::Once, None) | (FoldKind::Latest, _) => incoming.clone(),
        };
        Ok(Some(next))
    }
}

pub struct Accumulate {
    prev: EtfRef,
    kind: FoldKind,
}

impl Accumulate {
    pub fn new(prev: EtfRef, kind: FoldKind) -> Self {
        Self { prev, kind }
    }
}

#[async_trait]
impl Etf for Accumulate {
    fn locale(&self) -> String {
        path_key(&self.prev.locale(), self.kind.token())
    }

    async fn state(&self, path: &str, ctx: &mut Context) -> Result<Pack> {
        let pack = self.prev.state(path, ctx).await?;
        let base = path_key(path, &self.locale());
        let mut out = Pack::new();
        // Entries fold in arrival order, so each step sees the previous write.
        for entry in pack {
            let target = path_key(&base, &entry.key);
            if entry.deleted {
                ctx.storage().drop_value(&target).await?;
                continue;
            }
            let existing = ctx.read_opt(&target).await?.map(|s| s.value);
            let Some(next) = self.kind.step(existing, &entry.value)? else {
                continue;
            };
            ctx.storage()
                .store_value(&target, next.clone(), entry.version)
                .await?;
            out.push(entry.with_value(next));
        }
        Ok(out)
    }

    async fn keys(&self, path: &str, ctx: &Context) -> Result<Vec<String>> {
        ctx.all_keys(path, &self.locale()).await
    }

    async fn value(&self, path: &str, keys: &[String], ctx: &Context) -> Result<Pack> {
        ctx.value_by_keys(path, &self.locale(), keys).await
    }
}
