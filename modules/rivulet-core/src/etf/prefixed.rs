use async_trait::async_trait;

use super::{Etf, EtfRef};
use crate::context::Context;
use crate::error::Result;
use crate::locale::path_key;
use crate::pack::Pack;

/// Moves an operator under a store slot's namespace.
pub struct Prefixed {
    prev: EtfRef,
    prefix: String,
}

impl Prefixed {
    pub fn new(prev: EtfRef, prefix: impl Into<String>) -> Self {
        Self {
            prev,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl Etf for Prefixed {
    fn locale(&self) -> String {
        self.prev.locale()
    }

    async fn state(&self, path: &str, ctx: &mut Context) -> Result<Pack> {
        self.prev.state(&path_key(&self.prefix, path), ctx).await
    }

    async fn keys(&self, path: &str, ctx: &Context) -> Result<Vec<String>> {
        self.prev.keys(&path_key(&self.prefix, path), ctx).await
    }

    async fn value(&self, path: &str, keys: &[String], ctx: &Context) -> Result<Pack> {
        self.prev
            .value(&path_key(&self.prefix, path), keys, ctx)
            .await
    }
}
