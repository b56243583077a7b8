//! Materialized read results.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::pack::Pack;

/// Current value of an operator: a scalar when the view is unkeyed, a
/// key → value record otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(Option<Value>),
    Keyed(BTreeMap<String, Value>),
}

impl QueryValue {
    /// Result of one processing pass: the active entries by key, collapsed to
    /// a scalar when the only key is the single key.
    pub fn from_pack(pack: &Pack) -> Self {
        let record: BTreeMap<String, Value> = pack
            .iter()
            .filter(|e| e.is_active())
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect();
        if record.len() == 1 {
            if let Some(value) = record.get("") {
                return QueryValue::Single(Some(value.clone()));
            }
        }
        QueryValue::Keyed(record)
    }

    /// The scalar value, if this is a present single value.
    pub fn value(&self) -> Option<&Value> {
        match self {
            QueryValue::Single(value) => value.as_ref(),
            QueryValue::Keyed(_) => None,
        }
    }

    pub fn record(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            QueryValue::Keyed(record) => Some(record),
            QueryValue::Single(_) => None,
        }
    }

    /// Look up one key. The single value answers to the empty key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            QueryValue::Keyed(record) => record.get(key),
            QueryValue::Single(value) if key.is_empty() => value.as_ref(),
            QueryValue::Single(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            QueryValue::Single(value) => value.is_none(),
            QueryValue::Keyed(record) => record.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            QueryValue::Single(value) => usize::from(value.is_some()),
            QueryValue::Keyed(record) => record.len(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            QueryValue::Single(value) => value.clone().unwrap_or(Value::Null),
            QueryValue::Keyed(record) => {
                Value::Object(record.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
        }
    }

    /// Deserialize the whole result into a typed shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_json())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::PackEntry;
    use serde_json::json;

    #[test]
    fn single_key_collapses_to_scalar() {
        let pack = Pack::single(PackEntry::active("", json!("todo1"), 1));
        assert_eq!(QueryValue::from_pack(&pack), QueryValue::Single(Some(json!("todo1"))));
    }

    #[test]
    fn tombstones_are_not_part_of_the_record() {
        let pack: Pack = vec![
            PackEntry::active("1", json!(1), 1),
            PackEntry::deleted("2", 1),
        ]
        .into();
        let value = QueryValue::from_pack(&pack);
        assert_eq!(value.len(), 1);
        assert_eq!(value.get("1"), Some(&json!(1)));
        assert_eq!(value.get("2"), None);
    }

    #[test]
    fn decode_into_typed_map() {
        let value = QueryValue::Keyed(BTreeMap::from([("a".to_string(), json!(2))]));
        let decoded: BTreeMap<String, u32> = value.decode().unwrap();
        assert_eq!(decoded["a"], 2);
    }
}
