//! Decoded wire messages.

use crate::DecodeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Field carrying the device identity.
pub const CAMERA_ID_FIELD: &str = "camera_id";

/// Field carrying a recognised member identity.
pub const MEMBER_ID_FIELD: &str = "member_id";

/// One decoded frame: a JSON object of named fields.
///
/// Messages are built once (decoded or assembled with [`Message::with`]) and
/// never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    /// Create an empty message.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Identity event sent by an edge device.
    pub fn identity(camera_id: impl Into<Value>, member_id: &str) -> Self {
        Self::new()
            .with(CAMERA_ID_FIELD, camera_id)
            .with(MEMBER_ID_FIELD, member_id)
    }

    /// Convert a JSON value, rejecting anything that is not an object.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(DecodeError::NotAnObject(value_kind(&other))),
        }
    }

    /// Builder-style field insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn camera_id(&self) -> Option<&Value> {
        self.get(CAMERA_ID_FIELD)
    }

    pub fn member_id(&self) -> Option<&str> {
        self.get_str(MEMBER_ID_FIELD)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Message {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl TryFrom<Value> for Message {
    type Error = DecodeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

/// Compact JSON rendering, identical to the wire encoding.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_message_fields() {
        let message = Message::identity("Face", "alice");
        assert_eq!(message.camera_id(), Some(&json!("Face")));
        assert_eq!(message.member_id(), Some("alice"));
        assert_eq!(message.len(), 2);
    }

    #[test]
    fn test_numeric_camera_id_is_kept() {
        let message = Message::identity(2, "bob");
        assert_eq!(message.camera_id(), Some(&json!(2)));
        assert_eq!(message.get_str(CAMERA_ID_FIELD), None);
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        for (value, kind) in [
            (json!(null), "null"),
            (json!(true), "boolean"),
            (json!(42), "number"),
            (json!("text"), "string"),
            (json!([1, 2]), "array"),
        ] {
            match Message::from_value(value) {
                Err(DecodeError::NotAnObject(got)) => assert_eq!(got, kind),
                other => panic!("expected NotAnObject, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_display_is_compact_json() {
        let message = Message::new().with("cmd", "ack");
        assert_eq!(message.to_string(), r#"{"cmd":"ack"}"#);
    }

    #[test]
    fn test_into_value_roundtrip() {
        let message = Message::new().with("cmd", "ack").with("n", 3);
        let value = message.clone().into_value();
        assert_eq!(Message::try_from(value).unwrap(), message);
    }
}
