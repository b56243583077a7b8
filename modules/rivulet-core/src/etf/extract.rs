//! Source operators.

use async_trait::async_trait;

use super::Etf;
use crate::context::{empty_keys, Context};
use crate::error::Result;
use crate::event::event_type;
use crate::pack::Pack;

/// Picks inlet events whose tag is one of `types` and remembers the latest
/// one at its path.
pub struct Extract {
    types: Vec<String>,
}

impl Extract {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    fn accepts(&self, tag: Option<&str>) -> bool {
        tag.is_some_and(|tag| self.types.iter().any(|t| t == tag))
    }
}

#[async_trait]
impl Etf for Extract {
    fn locale(&self) -> String {
        String::new()
    }

    async fn state(&self, path: &str, ctx: &mut Context) -> Result<Pack> {
        let picked: Pack = ctx
            .inlet()
            .iter()
            .filter(|e| e.is_active() && self.accepts(event_type(&e.value)))
            .cloned()
            .collect();
        ctx.write_by_keys(path, &picked).await?;
        Ok(picked)
    }

    async fn keys(&self, path: &str, ctx: &Context) -> Result<Vec<String>> {
        ctx.all_keys(path, "").await
    }

    async fn value(&self, path: &str, keys: &[String], ctx: &Context) -> Result<Pack> {
        ctx.value_by_keys(path, "", keys).await
    }
}

/// Never produces anything.
pub struct Never;

#[async_trait]
impl Etf for Never {
    fn locale(&self) -> String {
        String::new()
    }

    async fn state(&self, _path: &str, _ctx: &mut Context) -> Result<Pack> {
        Ok(Pack::new())
    }

    async fn keys(&self, _path: &str, _ctx: &Context) -> Result<Vec<String>> {
        Ok(empty_keys())
    }

    async fn value(&self, _path: &str, _keys: &[String], _ctx: &Context) -> Result<Pack> {
        Ok(Pack::new())
    }
}
