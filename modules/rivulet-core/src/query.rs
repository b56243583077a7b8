//! Fluent operator construction.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::context::AsyncOutlet;
use crate::etf::{
    accumulate_fn, eval_fn, key_fn, map_array_fn, map_fn, predicate_fn, subscribe_fn, Accumulate,
    ByKey, Etf, EtfRef, EvalMap, FoldKind, Join, Never, Prefixed, PublishAsync, RefreshAll, Route,
    RouteTarget, SelectKey, SelectPrefixKey, Transform, TransformKind,
};
use crate::event::retag;
use crate::storage::Teardown;
use crate::store::StoreDef;

/// Where a query lives once it is placed in a store slot.
#[derive(Clone)]
pub struct Binding {
    storekey: String,
    store_id: Uuid,
    store: Weak<StoreDef>,
}

/// An operator description plus its store binding.
///
/// Builder methods consume the query and wrap its operator; the binding and
/// the action flag carry over.
#[derive(Clone)]
pub struct Query {
    etf: EtfRef,
    binding: Option<Binding>,
    is_action: bool,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("locale", &self.etf.locale())
            .field("storekey", &self.storekey())
            .field("is_action", &self.is_action)
            .finish()
    }
}

impl Query {
    pub fn from_etf(etf: EtfRef) -> Self {
        Self {
            etf,
            binding: None,
            is_action: false,
        }
    }

    pub fn etf(&self) -> &EtfRef {
        &self.etf
    }

    pub fn storekey(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.storekey.as_str())
    }

    pub fn store_id(&self) -> Option<Uuid> {
        self.binding.as_ref().map(|b| b.store_id)
    }

    /// The store this query was placed in, while that store is alive.
    pub fn store(&self) -> Option<Arc<StoreDef>> {
        self.binding.as_ref().and_then(|b| b.store.upgrade())
    }

    pub fn is_action(&self) -> bool {
        self.is_action
    }

    pub(crate) fn bind(&self, storekey: &str, store_id: Uuid, store: Weak<StoreDef>) -> Query {
        Query {
            etf: Arc::new(Prefixed::new(self.etf.clone(), storekey)),
            binding: Some(Binding {
                storekey: storekey.to_string(),
                store_id,
                store,
            }),
            is_action: self.is_action,
        }
    }

    pub(crate) fn into_action(mut self) -> Query {
        self.is_action = true;
        self
    }

    fn wrap(self, etf: impl Etf + 'static) -> Query {
        Query {
            etf: Arc::new(etf),
            binding: self.binding,
            is_action: self.is_action,
        }
    }

    fn transform(self, kind: TransformKind) -> Query {
        let prev = self.etf.clone();
        self.wrap(Transform::new(prev, kind))
    }

    fn accumulate(self, kind: FoldKind) -> Query {
        let prev = self.etf.clone();
        self.wrap(Accumulate::new(prev, kind))
    }

    fn route(self, target: RouteTarget, as_type: Option<String>) -> Query {
        let prev = self.etf.clone();
        self.wrap(Route::new(prev, target, as_type))
    }

    // -----------------------------------------------------------------------
    // Entry-wise transforms
    // -----------------------------------------------------------------------

    pub fn map<F>(self, f: F) -> Query
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.transform(TransformKind::Map(map_fn(move |v, _| Ok(f(v)))))
    }

    /// Map with access to the entry key.
    pub fn map_with_key<F>(self, f: F) -> Query
    where
        F: Fn(&Value, &str) -> Value + Send + Sync + 'static,
    {
        self.transform(TransformKind::Map(map_fn(move |v, k| Ok(f(v, k)))))
    }

    /// Fallible map; an error aborts the evaluation.
    pub fn try_map<F>(self, f: F) -> Query
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.transform(TransformKind::Map(map_fn(move |v, _| f(v))))
    }

    /// Map through typed shapes. Values that do not deserialize into `T` are
    /// filtered out.
    pub fn map_typed<T, R, F>(self, f: F) -> Query
    where
        T: DeserializeOwned,
        R: Serialize,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        self.transform(TransformKind::MapArray(map_array_fn(move |v, _| {
            match serde_json::from_value::<T>(v.clone()) {
                Ok(input) => Ok(vec![serde_json::to_value(f(input))?]),
                Err(_) => Ok(Vec::new()),
            }
        })))
    }

    /// One entry in, any number out, all sharing key and version.
    pub fn map_array<F>(self, f: F) -> Query
    where
        F: Fn(&Value) -> Vec<Value> + Send + Sync + 'static,
    {
        self.transform(TransformKind::MapArray(map_array_fn(move |v, _| Ok(f(v)))))
    }

    pub fn filter<F>(self, f: F) -> Query
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.transform(TransformKind::Filter(predicate_fn(move |v, _| Ok(f(v)))))
    }

    pub fn try_filter<F>(self, f: F) -> Query
    where
        F: Fn(&Value) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.transform(TransformKind::Filter(predicate_fn(move |v, _| f(v))))
    }

    pub fn not_null(self) -> Query {
        self.transform(TransformKind::NotNull)
    }

    pub fn flatten(self) -> Query {
        self.transform(TransformKind::Flatten)
    }

    /// Project one field; entries without it are dropped.
    pub fn select(self, field: impl Into<String>) -> Query {
        self.transform(TransformKind::Select(field.into()))
    }

    pub fn optional(self) -> Query {
        self.transform(TransformKind::Optional)
    }

    /// Visible to reads, but never triggers effects downstream.
    pub fn no_effect(self) -> Query {
        self.transform(TransformKind::NoEffect)
    }

    /// Observe effective entries as they are pushed.
    pub fn fire<F>(self, f: F) -> Query
    where
        F: Fn(&Value, &str) + Send + Sync + 'static,
    {
        self.transform(TransformKind::Fire(Arc::new(f)))
    }

    pub fn log(self, label: impl Into<String>) -> Query {
        let label = label.into();
        self.fire(move |value, key| info!(label = %label, key, %value, "Entry"))
    }

    /// Force the `type` tag.
    pub fn astype(self, tag: impl Into<String>) -> Query {
        let tag = tag.into();
        self.map(move |v| retag(v, &tag))
    }

    /// Replace every value with a constant.
    pub fn as_value(self, value: Value) -> Query {
        self.map(move |_| value.clone())
    }

    /// Shallow-merge fixed fields into object values.
    pub fn with(self, fields: Value) -> Query {
        self.map(move |v| match (v, &fields) {
            (Value::Object(base), Value::Object(extra)) => {
                let mut merged = base.clone();
                merged.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
                Value::Object(merged)
            }
            _ => v.clone(),
        })
    }

    /// Map with a fresh random number per entry.
    pub fn random<F>(self, f: F) -> Query
    where
        F: Fn(&Value, u64) -> Value + Send + Sync + 'static,
    {
        self.map(move |v| f(v, Uuid::new_v4().as_u128() as u64))
    }

    // -----------------------------------------------------------------------
    // Keying
    // -----------------------------------------------------------------------

    /// Key entries by a computed value (string, number or array of parts).
    pub fn by_key<F>(self, f: F) -> Query
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        let prev = self.etf.clone();
        self.wrap(ByKey::new(prev, key_fn(move |v, _| Ok(f(v)))))
    }

    /// Key entries by one of their fields.
    pub fn by(self, field: impl Into<String>) -> Query {
        let field = field.into();
        self.by_key(move |v| v.get(field.as_str()).cloned().unwrap_or(Value::Null))
    }

    pub fn by_id(self) -> Query {
        self.by("id")
    }

    /// Append a computed segment to the existing key.
    pub fn add_key<F>(self, f: F) -> Query
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        let prev = self.etf.clone();
        self.wrap(ByKey::composed(prev, key_fn(move |v, _| Ok(f(v)))))
    }

    pub fn select_key(self, key: impl Into<String>) -> Query {
        let prev = self.etf.clone();
        self.wrap(SelectKey::new(prev, key))
    }

    /// Select a composite key given as its parts.
    pub fn select_key_parts<S: AsRef<str>>(self, parts: &[S]) -> Query {
        let key = parts
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<_>>()
            .join(".");
        self.select_key(key)
    }

    pub fn select_prefix_key<I, S>(self, prefixes: I) -> Query
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prev = self.etf.clone();
        let prefixes = prefixes.into_iter().map(Into::into).collect();
        self.wrap(SelectPrefixKey::new(prev, prefixes))
    }

    // -----------------------------------------------------------------------
    // Accumulation
    // -----------------------------------------------------------------------

    pub fn reduce<F>(self, f: F) -> Query
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        self.accumulate(FoldKind::Reduce(accumulate_fn(move |a, b| Ok(f(a, b)))))
    }

    pub fn try_reduce<F>(self, f: F) -> Query
    where
        F: Fn(&Value, &Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.accumulate(FoldKind::Reduce(Arc::new(f)))
    }

    pub fn fold<F>(self, init: Value, f: F) -> Query
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        self.accumulate(FoldKind::Fold(init, accumulate_fn(move |a, b| Ok(f(a, b)))))
    }

    pub fn latest(self) -> Query {
        self.accumulate(FoldKind::Latest)
    }

    pub fn once(self) -> Query {
        self.accumulate(FoldKind::Once)
    }

    /// Pair this query with the first value of `other` per key, as `[a, b]`.
    pub fn join_with(self, other: Query) -> Query {
        let binding = self.binding.clone();
        let is_action = self.is_action;
        let paired = Join::new(vec![
            ("a".to_string(), self.etf.clone()),
            ("b".to_string(), other.once().etf),
        ]);
        Query {
            etf: Arc::new(paired),
            binding,
            is_action,
        }
        .map(|v| Value::Array(vec![v["a"].clone(), v["b"].clone()]))
    }

    // -----------------------------------------------------------------------
    // Effects and routing
    // -----------------------------------------------------------------------

    /// Await an asynchronous transform per entry.
    pub fn eval_map<F, Fut>(self, f: F) -> Query
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let prev = self.etf.clone();
        self.wrap(EvalMap::new(prev, eval_fn(move |v, _| f(v).boxed())))
    }

    /// Await an asynchronous side effect per entry, keeping the value.
    pub fn eval_tap<F, Fut>(self, f: F) -> Query
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let prev = self.etf.clone();
        self.wrap(EvalMap::new(
            prev,
            eval_fn(move |v, _| {
                let tapped = f(v.clone());
                async move {
                    tapped.await?;
                    Ok::<Value, anyhow::Error>(v)
                }
                .boxed()
            }),
        ))
    }

    pub fn internal(self) -> Query {
        self.route(RouteTarget::Internal, None)
    }

    pub fn internal_as(self, tag: impl Into<String>) -> Query {
        self.route(RouteTarget::Internal, Some(tag.into()))
    }

    pub fn internal_with<F>(self, f: F) -> Query
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.map(f).internal()
    }

    pub fn external(self) -> Query {
        self.route(RouteTarget::External, None)
    }

    pub fn external_as(self, tag: impl Into<String>) -> Query {
        self.route(RouteTarget::External, Some(tag.into()))
    }

    pub fn external_with<F>(self, f: F) -> Query
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.map(f).external()
    }

    /// Open an external subscription per effective entry. Entries of `clear`
    /// tear down the subscription stored under the same key.
    pub fn publish_async<F>(self, f: F, clear: Option<Query>) -> Query
    where
        F: Fn(Value, AsyncOutlet) -> Option<Teardown> + Send + Sync + 'static,
    {
        let prev = self.etf.clone();
        let clear: EtfRef = match clear {
            Some(q) => q.etf,
            None => Arc::new(Never),
        };
        self.wrap(PublishAsync::new(
            prev,
            subscribe_fn(move |v, outlet| Ok(f(v, outlet))),
            clear,
        ))
    }

    /// Wipe the owning store whenever this query produces output.
    pub fn refresh_all(self) -> Query {
        let prev = self.etf.clone();
        self.wrap(RefreshAll::new(prev))
    }
}
