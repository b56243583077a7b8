//! The operator algebra.
//!
//! Every operator ("ETF": extract, transform, fold) exposes three
//! capabilities over a storage path:
//!
//! - `state`: push. Consume the context inlet, return the output batch,
//!   possibly writing storage and the outlets.
//! - `keys`: pull. Enumerate the keys currently known under the namespace.
//! - `value`: pull. Materialize the entries for the given keys from storage.
//!
//! Operators compose by wrapping a predecessor. All mutable state lives in
//! storage, addressed by `path.locale.key`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::context::{AsyncOutlet, Context};
use crate::error::Result;
use crate::pack::Pack;
use crate::storage::Teardown;

pub mod effect;
pub mod extract;
pub mod fold;
pub mod join;
pub mod keying;
pub mod merge;
pub mod prefixed;
pub mod routing;
pub mod transform;

pub use effect::{EvalMap, PublishAsync};
pub use extract::{Extract, Never};
pub use fold::{Accumulate, FoldKind};
pub use join::Join;
pub use keying::{ByKey, SelectKey, SelectPrefixKey};
pub use merge::Merge;
pub use prefixed::Prefixed;
pub use routing::{RefreshAll, Route, RouteTarget};
pub use transform::{Transform, TransformKind};

/// Shared handle to an operator node.
pub type EtfRef = Arc<dyn Etf>;

#[async_trait]
pub trait Etf: Send + Sync {
    /// Namespace segment this node persists under, relative to its path.
    fn locale(&self) -> String;

    async fn state(&self, path: &str, ctx: &mut Context) -> Result<Pack>;

    async fn keys(&self, path: &str, ctx: &Context) -> Result<Vec<String>>;

    async fn value(&self, path: &str, keys: &[String], ctx: &Context) -> Result<Pack>;
}

// ---------------------------------------------------------------------------
// User function shapes
// ---------------------------------------------------------------------------

/// `(value, key) -> value`
pub type MapFn = Arc<dyn Fn(&Value, &str) -> anyhow::Result<Value> + Send + Sync>;

/// `(value, key) -> values`
pub type MapArrayFn = Arc<dyn Fn(&Value, &str) -> anyhow::Result<Vec<Value>> + Send + Sync>;

/// `(value, key) -> keep?`
pub type PredicateFn = Arc<dyn Fn(&Value, &str) -> anyhow::Result<bool> + Send + Sync>;

/// `(value, key) -> key value` (string, number or array for composite keys)
pub type KeyFn = Arc<dyn Fn(&Value, &str) -> anyhow::Result<Value> + Send + Sync>;

/// `(accumulated, incoming) -> accumulated`
pub type AccumulateFn = Arc<dyn Fn(&Value, &Value) -> anyhow::Result<Value> + Send + Sync>;

/// `(value, key)` observer
pub type FireFn = Arc<dyn Fn(&Value, &str) + Send + Sync>;

/// `(value, key) -> future value`
pub type EvalFn =
    Arc<dyn Fn(Value, String) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// `(value, outlet) -> optional teardown`
pub type SubscribeFn =
    Arc<dyn Fn(Value, AsyncOutlet) -> anyhow::Result<Option<Teardown>> + Send + Sync>;

// Constructors that pin closure signatures through their bounds.

pub fn map_fn<F>(f: F) -> MapFn
where
    F: Fn(&Value, &str) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn map_array_fn<F>(f: F) -> MapArrayFn
where
    F: Fn(&Value, &str) -> anyhow::Result<Vec<Value>> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn predicate_fn<F>(f: F) -> PredicateFn
where
    F: Fn(&Value, &str) -> anyhow::Result<bool> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn key_fn<F>(f: F) -> KeyFn
where
    F: Fn(&Value, &str) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn accumulate_fn<F>(f: F) -> AccumulateFn
where
    F: Fn(&Value, &Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn eval_fn<F>(f: F) -> EvalFn
where
    F: Fn(Value, String) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn subscribe_fn<F>(f: F) -> SubscribeFn
where
    F: Fn(Value, AsyncOutlet) -> anyhow::Result<Option<Teardown>> + Send + Sync + 'static,
{
    Arc::new(f)
}
