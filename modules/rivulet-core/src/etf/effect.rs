//! Operators that suspend on, or hand values to, the outside world.

use async_trait::async_trait;
use tracing::debug;

use super::{Etf, EtfRef, EvalFn, SubscribeFn};
use crate::context::{empty_keys, Context};
use crate::error::{Error, Result};
use crate::locale::{path_key, CLEAR, EVAL_MAP, PUBLISH_ASYNC};
use crate::pack::Pack;

/// Awaits an asynchronous transform per entry and persists the results.
///
/// `no_effect` entries are dropped; they must not trigger the call.
pub struct EvalMap {
    prev: EtfRef,
    f: EvalFn,
}

impl EvalMap {
    pub fn new(prev: EtfRef, f: EvalFn) -> Self {
        Self { prev, f }
    }
}

#[async_trait]
impl Etf for EvalMap {
    fn locale(&self) -> String {
        path_key(&self.prev.locale(), EVAL_MAP)
    }

    async fn state(&self, path: &str, ctx: &mut Context) -> Result<Pack> {
        let pack = self.prev.state(path, ctx).await?;
        let mut out = Pack::new();
        for entry in pack {
            if entry.no_effect {
                continue;
            }
            if entry.deleted {
                out.push(entry);
                continue;
            }
            let value = (self.f)(entry.value.clone(), entry.key.clone())
                .await
                .map_err(Error::Transform)?;
            out.push(entry.with_value(value));
        }
        ctx.write_by_keys(&path_key(path, &self.locale()), &out)
            .await?;
        Ok(out)
    }

    async fn keys(&self, path: &str, ctx: &Context) -> Result<Vec<String>> {
        ctx.all_keys(path, &self.locale()).await
    }

    async fn value(&self, path: &str, keys: &[String], ctx: &Context) -> Result<Pack> {
        ctx.value_by_keys(path, &self.locale(), keys).await
    }
}

/// Opens an external subscription per entry. The subscription publishes
/// back through the context's async outlet and may hand back a teardown,
/// which runs when `clear` produces an entry for the same key.
pub struct PublishAsync {
    prev: EtfRef,
    subscribe: SubscribeFn,
    clear: EtfRef,
}

impl PublishAsync {
    pub fn new(prev: EtfRef, subscribe: SubscribeFn, clear: EtfRef) -> Self {
        Self {
            prev,
            subscribe,
            clear,
        }
    }
}

#[async_trait]
impl Etf for PublishAsync {
    fn locale(&self) -> String {
        path_key(&self.prev.locale(), PUBLISH_ASYNC)
    }

    async fn state(&self, path: &str, ctx: &mut Context) -> Result<Pack> {
        let pack = self.prev.state(path, ctx).await?;
        let cleared = self.clear.state(&path_key(path, CLEAR), ctx).await?;
        let base = path_key(path, &self.locale());

        for entry in &cleared {
            if let Some(teardown) = ctx.teardowns().take(&path_key(&base, &entry.key)) {
                debug!(key = %entry.key, "Tearing down async subscription");
                teardown();
            }
        }

        let mut effective = pack.iter().filter(|e| e.is_effective()).peekable();
        if effective.peek().is_none() {
            return Ok(Pack::new());
        }
        let outlet = ctx
            .outlet_async()
            .cloned()
            .ok_or(Error::MissingAsyncOutlet)?;
        for entry in effective {
            let teardown = (self.subscribe)(entry.value.clone(), outlet.clone())
                .map_err(Error::Transform)?;
            if let Some(teardown) = teardown {
                let replaced = ctx
                    .teardowns()
                    .insert(path_key(&base, &entry.key), teardown);
                if let Some(previous) = replaced {
                    debug!(key = %entry.key, "Replaced an active async subscription");
                    previous();
                }
            }
        }
        Ok(Pack::new())
    }

    async fn keys(&self, _path: &str, _ctx: &Context) -> Result<Vec<String>> {
        Ok(empty_keys())
    }

    async fn value(&self, _path: &str, _keys: &[String], _ctx: &Context) -> Result<Pack> {
        Ok(Pack::new())
    }
}
