//! Events are JSON objects carrying a string `type` tag.

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// A published event. Always a JSON object with a string `type` field.
pub type Event = Value;

/// Tag of the synthetic event an action injects into its own operator.
pub const ACTION_EVENT: &str = "$action";

/// Tag of the marker `refresh_all` pushes into the internal outlet.
pub const REFRESH_EVENT: &str = "$refresh";

/// Domain events know their tag and how to become a JSON payload.
///
/// Blanket-implemented for every `Serialize` type, so a
/// `#[serde(tag = "type")]` enum works out of the box.
pub trait EventLike {
    fn to_event(&self) -> Result<Event>;
}

impl<T: Serialize> EventLike for T {
    fn to_event(&self) -> Result<Event> {
        let value = serde_json::to_value(self)?;
        match event_type(&value) {
            Some(_) => Ok(value),
            None => Err(Error::MissingEventType(value.to_string())),
        }
    }
}

/// The `type` tag of an event, if it has one.
pub fn event_type(event: &Value) -> Option<&str> {
    event.get("type").and_then(Value::as_str)
}

pub fn action_event(args: Value) -> Event {
    json!({ "type": ACTION_EVENT, "value": args })
}

pub fn refresh_event() -> Event {
    json!({ "type": REFRESH_EVENT })
}

pub fn is_refresh(event: &Value) -> bool {
    event_type(event) == Some(REFRESH_EVENT)
}

/// Force the tag of a value. Objects keep their other fields, anything
/// else is replaced by a bare `{ "type": tag }`.
pub fn retag(value: &Value, tag: &str) -> Value {
    match value {
        Value::Object(fields) => {
            let mut fields = fields.clone();
            fields.insert("type".into(), Value::String(tag.to_string()));
            Value::Object(fields)
        }
        _ => json!({ "type": tag }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(tag = "type")]
    enum TodoEvent {
        #[serde(rename = "TODO_CREATED")]
        Created { id: String, title: String },
    }

    #[test]
    fn tagged_enum_becomes_event() {
        let event = TodoEvent::Created {
            id: "1".into(),
            title: "todo1".into(),
        }
        .to_event()
        .unwrap();
        assert_eq!(event_type(&event), Some("TODO_CREATED"));
        assert_eq!(event["title"], "todo1");
    }

    #[test]
    fn untagged_payload_is_rejected() {
        let err = json!({ "id": 1 }).to_event().unwrap_err();
        assert!(matches!(err, Error::MissingEventType(_)));
    }

    #[test]
    fn retag_replaces_scalars() {
        assert_eq!(retag(&json!(5), "COUNT"), json!({ "type": "COUNT" }));
        assert_eq!(
            retag(&json!({ "type": "A", "n": 1 }), "B"),
            json!({ "type": "B", "n": 1 })
        );
    }
}
