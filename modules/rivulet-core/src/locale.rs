//! Storage addressing: dot-joined paths and the locale segments operators
//! contribute to them.

use serde_json::Value;

pub const BY_KEY: &str = "BY_KEY";
pub const ADD_KEY: &str = "ADD_KEY";
pub const FOLD: &str = "FOLD";
pub const REDUCE: &str = "REDUCE";
pub const ONCE: &str = "ONCE";
pub const LATEST: &str = "LATEST";
pub const EVAL_MAP: &str = "EVAL_MAP";
pub const PUBLISH_ASYNC: &str = "PUBLISH_ASYNC";
pub const CLEAR: &str = "CLEAR";

const TOKENS: &[&str] = &[
    BY_KEY,
    ADD_KEY,
    FOLD,
    REDUCE,
    ONCE,
    LATEST,
    EVAL_MAP,
    PUBLISH_ASYNC,
    CLEAR,
];

/// Join a namespace and a key. The empty key addresses the namespace itself.
pub fn path_key(path: &str, key: &str) -> String {
    if key.is_empty() {
        path.to_string()
    } else if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

pub fn is_locale_token(segment: &str) -> bool {
    TOKENS.contains(&segment)
}

/// Key of `stored` relative to namespace `prefix`, if it lives directly in it.
///
/// Paths that continue into another operator's locale (`prefix.REDUCE.1`)
/// belong to that operator and are not keys of this one.
pub fn relative_key(prefix: &str, stored: &str) -> Option<String> {
    let suffix = if prefix.is_empty() {
        stored
    } else if stored == prefix {
        return Some(String::new());
    } else {
        stored.strip_prefix(prefix)?.strip_prefix('.')?
    };
    let first = suffix.split('.').next().unwrap_or_default();
    if is_locale_token(first) {
        None
    } else {
        Some(suffix.to_string())
    }
}

/// `true` when `key` equals `prefix` or lies under it.
pub fn has_key_prefix(key: &str, prefix: &str) -> bool {
    key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Turn a computed key value into a storage key segment.
///
/// Arrays are composite keys and join with `.`. Nulls and objects carry no
/// usable key.
pub fn key_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(parts) => {
            let parts = parts
                .iter()
                .map(key_from_value)
                .collect::<Option<Vec<_>>>()?;
            Some(parts.join("."))
        }
        Value::Null | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_key_skips_empty_segments() {
        assert_eq!(path_key("", ""), "");
        assert_eq!(path_key("todos", ""), "todos");
        assert_eq!(path_key("", "1"), "1");
        assert_eq!(path_key("todos.BY_KEY", "1"), "todos.BY_KEY.1");
    }

    #[test]
    fn relative_key_ignores_nested_locales() {
        assert_eq!(relative_key("t.BY_KEY", "t.BY_KEY.1"), Some("1".into()));
        assert_eq!(relative_key("t.BY_KEY", "t.BY_KEY.123.1"), Some("123.1".into()));
        assert_eq!(relative_key("t.BY_KEY", "t.BY_KEY.REDUCE.1"), None);
        assert_eq!(relative_key("t", "t"), Some(String::new()));
        assert_eq!(relative_key("t", "t2.x"), None);
        assert_eq!(relative_key("", "x"), Some("x".into()));
        assert_eq!(relative_key("", "REDUCE"), None);
    }

    #[test]
    fn key_prefix_respects_segments() {
        assert!(has_key_prefix("a.b", "a"));
        assert!(has_key_prefix("a", "a"));
        assert!(!has_key_prefix("ab", "a"));
    }

    #[test]
    fn keys_from_values() {
        assert_eq!(key_from_value(&json!("x")), Some("x".into()));
        assert_eq!(key_from_value(&json!(12)), Some("12".into()));
        assert_eq!(key_from_value(&json!(["123", 1])), Some("123.1".into()));
        assert_eq!(key_from_value(&json!(null)), None);
        assert_eq!(key_from_value(&json!({ "id": 1 })), None);
    }
}
