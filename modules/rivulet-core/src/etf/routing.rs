//! Feeding results back as events: into the same store or onto the bus.

use async_trait::async_trait;

use super::{Etf, EtfRef};
use crate::context::Context;
use crate::error::Result;
use crate::event::{refresh_event, retag};
use crate::pack::{Pack, PackEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// Re-processed by every operator of the same store.
    Internal,
    /// Published to every other store on the bus.
    External,
}

pub struct Route {
    prev: EtfRef,
    target: RouteTarget,
    as_type: Option<String>,
}

impl Route {
    pub fn new(prev: EtfRef, target: RouteTarget, as_type: Option<String>) -> Self {
        Self {
            prev,
            target,
            as_type,
        }
    }

    fn transform(&self, pack: Pack) -> Pack {
        let pack = match self.target {
            RouteTarget::External => pack.into_iter().filter(|e| !e.no_effect).collect(),
            RouteTarget::Internal => pack,
        };
        pack.increment_version().map_entries(|entry| match &self.as_type {
            Some(tag) if entry.is_active() => {
                let value = retag(&entry.value, tag);
                entry.with_value(value)
            }
            _ => entry,
        })
    }
}

#[async_trait]
impl Etf for Route {
    fn locale(&self) -> String {
        self.prev.locale()
    }

    async fn state(&self, path: &str, ctx: &mut Context) -> Result<Pack> {
        let pack = self.prev.state(path, ctx).await?;
        let routed = self.transform(pack);
        let events: Pack = routed.iter().filter(|e| e.is_effective()).cloned().collect();
        match self.target {
            RouteTarget::Internal => ctx.push_outlet_in(events),
            RouteTarget::External => ctx.push_outlet_out(events),
        }
        Ok(routed)
    }

    async fn keys(&self, path: &str, ctx: &Context) -> Result<Vec<String>> {
        self.prev.keys(path, ctx).await
    }

    async fn value(&self, path: &str, keys: &[String], ctx: &Context) -> Result<Pack> {
        let pack = self.prev.value(path, keys, ctx).await?;
        Ok(self.transform(pack))
    }
}

/// Any effective output asks the owning executor to wipe the store once in-flight work
/// settles.
pub struct RefreshAll {
    prev: EtfRef,
}

impl RefreshAll {
    pub fn new(prev: EtfRef) -> Self {
        Self { prev }
    }
}

#[async_trait]
impl Etf for RefreshAll {
    fn locale(&self) -> String {
        self.prev.locale()
    }

    async fn state(&self, path: &str, ctx: &mut Context) -> Result<Pack> {
        let pack = self.prev.state(path, ctx).await?;
        if pack.iter().any(PackEntry::is_effective) {
            let marker = PackEntry::active("", refresh_event(), pack.max_version());
            ctx.push_outlet_in(Pack::single(marker));
        }
        Ok(pack)
    }

    async fn keys(&self, path: &str, ctx: &Context) -> Result<Vec<String>> {
        self.prev.keys(path, ctx).await
    }

    async fn value(&self, path: &str, keys: &[String], ctx: &Context) -> Result<Pack> {
        self.prev.value(path, keys, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etf::{Extract, Transform, TransformKind};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn internal_retags_and_bumps_version() {
        let op = Route::new(
            Arc::new(Extract::new(["A"])),
            RouteTarget::Internal,
            Some("B".into()),
        );
        let mut ctx = Context::in_memory().with_inlet(Pack::from_events(
            "",
            vec![json!({"type": "A", "n": 1})],
            4,
            false,
        ));
        op.state("", &mut ctx).await.unwrap();
        let routed = ctx.outlet_in().first().cloned().unwrap();
        assert_eq!(routed.version, 5);
        assert_eq!(routed.value, json!({"type": "B", "n": 1}));
    }

    #[tokio::test]
    async fn external_skips_no_effect_entries() {
        let quiet = Transform::new(Arc::new(Extract::new(["A"])), TransformKind::NoEffect);
        let op = Route::new(Arc::new(quiet), RouteTarget::External, None);
        let mut ctx = Context::in_memory().with_inlet_events(vec![json!({"type": "A"})]);
        let out = op.state("", &mut ctx).await.unwrap();
        assert!(out.is_empty());
        assert!(ctx.outlet_out().is_empty());
    }
}
