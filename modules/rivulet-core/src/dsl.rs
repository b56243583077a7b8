//! Entry points for building queries.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::etf::{EtfRef, Extract, Join, Merge, Never};
use crate::event::ACTION_EVENT;
use crate::query::Query;

/// Events whose tag is one of `types`.
pub fn extract<I, S>(types: I) -> Query
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Query::from_etf(Arc::new(Extract::new(types)))
}

pub fn never() -> Query {
    Query::from_etf(Arc::new(Never))
}

/// First matching branch per event; reads take the newest entry per key.
pub fn merge(queries: impl IntoIterator<Item = Query>) -> Query {
    let branches: Vec<EtfRef> = queries.into_iter().map(|q| q.etf().clone()).collect();
    Query::from_etf(Arc::new(Merge::new(branches)))
}

/// Keyed records that surface once every named field is present.
pub fn join<I, S>(fields: I) -> Query
where
    I: IntoIterator<Item = (S, Query)>,
    S: Into<String>,
{
    let fields = fields
        .into_iter()
        .map(|(name, q)| (name.into(), q.etf().clone()))
        .collect();
    Query::from_etf(Arc::new(Join::new(fields)))
}

/// A query driven by direct invocation: `f` receives the action arguments.
pub fn action<F>(f: F) -> Query
where
    F: Fn(&Value) -> Value + Send + Sync + 'static,
{
    extract([ACTION_EVENT])
        .map(move |event| f(&event["value"]))
        .into_action()
}

/// Fallible action; an error is returned to the caller of the action.
pub fn try_action<F>(f: F) -> Query
where
    F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    extract([ACTION_EVENT])
        .try_map(move |event| f(&event["value"]))
        .into_action()
}

/// Action with typed arguments. Multiple arguments arrive as a JSON array
/// and deserialize into a tuple.
pub fn action_typed<I, O, F>(f: F) -> Query
where
    I: DeserializeOwned,
    O: Serialize,
    F: Fn(I) -> O + Send + Sync + 'static,
{
    try_action(move |args| {
        let input: I = serde_json::from_value(args.clone())?;
        Ok(serde_json::to_value(f(input))?)
    })
}

/// Action without a payload; its value is `null`.
pub fn action_unit() -> Query {
    action(|_| Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn typed_action_decodes_tuple_arguments() {
        let add = action_typed(|(a, b): (i64, i64)| a + b);
        let value = add
            .run_query(vec![crate::event::action_event(json!([2, 3]))])
            .await
            .unwrap();
        assert_eq!(value.value(), Some(&json!(5)));
        assert!(add.is_action());
    }

    #[tokio::test]
    async fn typed_action_rejects_wrong_arguments() {
        let add = action_typed(|(a, b): (i64, i64)| a + b);
        let err = add
            .run_query(vec![crate::event::action_event(json!("nope"))])
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Transform(_)));
    }
}
