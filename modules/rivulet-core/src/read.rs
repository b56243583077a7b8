//! Evaluating and reading a query outside of any executor.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::event::{is_refresh, Event};
use crate::pack::Pack;
use crate::query::Query;
use crate::value::QueryValue;

/// Internal cascades deeper than this are treated as runaway feedback.
pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 100_000;

impl Query {
    /// One push evaluation of the context inlet.
    pub async fn exec(&self, ctx: &mut Context) -> Result<Pack> {
        self.etf().state("", ctx).await
    }

    /// Push evaluation that keeps feeding internally routed events back into
    /// this query until none are left. Every drained event is left in the
    /// internal outlet afterwards; a refresh marker wipes the storage.
    pub async fn exec_deep(&self, ctx: &mut Context, max_depth: usize) -> Result<Pack> {
        let mut output = self.exec(ctx).await?;
        let mut drained = Pack::new();
        let mut depth = 0;
        loop {
            let pending = ctx.take_outlet_in();
            if pending.is_empty() {
                break;
            }
            depth += 1;
            if depth > max_depth {
                return Err(Error::CascadeLimit {
                    depth,
                    limit: max_depth,
                });
            }
            let (markers, events): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|e| is_refresh(&e.value));
            if !markers.is_empty() {
                debug!("Refresh requested, clearing storage");
                ctx.storage().clear_all().await?;
            }
            if events.is_empty() {
                continue;
            }
            let events = Pack::from(events);
            drained.extend(events.clone());
            ctx.replace_inlet(events);
            output = output.concat(self.exec(ctx).await?);
        }
        ctx.push_outlet_in(drained);
        Ok(output)
    }

    pub async fn read_keys(&self, ctx: &Context) -> Result<Vec<String>> {
        self.etf().keys("", ctx).await
    }

    /// Entries for the given keys, as the query would produce them now.
    pub async fn read_pack(&self, ctx: &Context, keys: &[String]) -> Result<Pack> {
        self.etf().value("", keys, ctx).await
    }

    /// Every currently known entry.
    pub async fn read_all(&self, ctx: &Context) -> Result<Pack> {
        let keys = self.read_keys(ctx).await?;
        self.read_pack(ctx, &keys).await
    }

    /// Value under one key; `null` reads as absent.
    pub async fn read_value(&self, ctx: &Context, key: &str) -> Result<Option<Value>> {
        let pack = self.read_pack(ctx, &[key.to_string()]).await?;
        Ok(pack
            .iter()
            .find(|e| e.is_active())
            .map(|e| e.value.clone())
            .filter(|v| !v.is_null()))
    }

    pub async fn read_record(
        &self,
        ctx: &Context,
        keys: &[String],
    ) -> Result<BTreeMap<String, Value>> {
        let pack = self.read_pack(ctx, keys).await?;
        Ok(pack
            .into_iter()
            .filter(|e| e.is_active())
            .map(|e| (e.key, e.value))
            .collect())
    }

    /// The single value when the view is unkeyed, else the keyed record.
    pub async fn read_query(&self, ctx: &Context) -> Result<QueryValue> {
        let keys = self.read_keys(ctx).await?;
        if keys.is_empty() || (keys.len() == 1 && keys[0].is_empty()) {
            return Ok(QueryValue::Single(self.read_value(ctx, "").await?));
        }
        Ok(QueryValue::Keyed(self.read_record(ctx, &keys).await?))
    }

    /// Evaluate `events` against fresh in-memory storage and read the result.
    pub async fn run_query(&self, events: impl IntoIterator<Item = Event>) -> Result<QueryValue> {
        let mut ctx = Context::in_memory().with_inlet_events(events);
        self.exec_deep(&mut ctx, DEFAULT_MAX_CASCADE_DEPTH).await?;
        self.read_query(&ctx).await
    }
}
