//! Core request/reply types for the a3s-backbone broker
//!
//! Wire-facing types use camelCase JSON serialization, matching the payload
//! keys gateways already send (`sessionKey`, `pixelsId`, ...).

use crate::error::{BackboneError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload key carrying the session token
pub const SESSION_KEY: &str = "sessionKey";

/// Group id meaning "all groups the subject is a member of"
pub const ALL_GROUPS: i64 = -1;

/// Authenticated identity a unit of work runs as
///
/// Derived once per request from a successful session lookup and dropped
/// together with the request's unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Session uuid the request authenticated with
    pub subject: String,

    /// Group scope of the unit of work
    pub group_id: i64,

    /// Default activity type of the session (e.g. "User")
    pub event_type: String,
}

impl Identity {
    /// Create an identity scoped to all of the subject's groups
    pub fn new(subject: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            group_id: ALL_GROUPS,
            event_type: event_type.into(),
        }
    }
}

/// Operation-specific request payload
///
/// String keys mapped to primitive or array values. Accessors turn missing
/// or mistyped keys into `InvalidPayload` errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// Create an empty payload
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Add an entry
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// The session token, if present
    pub fn session_key(&self) -> Option<&str> {
        self.0.get(SESSION_KEY).and_then(Value::as_str)
    }

    /// Raw value lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Required string value
    pub fn str(&self, key: &str) -> Result<&str> {
        match self.0.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(mistyped(key, "a string", other)),
            None => Err(missing(key)),
        }
    }

    /// Required integer value
    pub fn i64(&self, key: &str) -> Result<i64> {
        match self.0.get(key) {
            Some(v) => v.as_i64().ok_or_else(|| mistyped(key, "an integer", v)),
            None => Err(missing(key)),
        }
    }

    /// Required array of integers
    pub fn i64_array(&self, key: &str) -> Result<Vec<i64>> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_i64().ok_or_else(|| mistyped(key, "an array of integers", v)))
                .collect(),
            Some(other) => Err(mistyped(key, "an array", other)),
            None => Err(missing(key)),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload has no entries
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn missing(key: &str) -> BackboneError {
    BackboneError::InvalidPayload(format!("missing key '{}'", key))
}

fn mistyped(key: &str, expected: &str, got: &Value) -> BackboneError {
    BackboneError::InvalidPayload(format!("key '{}' must be {}, got {}", key, expected, got))
}

/// A single brokered call
#[derive(Debug, Clone)]
pub struct Request {
    /// Unique request identifier (req-<uuid>), used only for diagnostics
    pub id: String,

    /// Operation name as received (e.g. "omero.get_object")
    pub operation: String,

    /// Operation payload including the session token
    pub payload: Payload,
}

impl Request {
    /// Create a new request with an auto-generated id
    pub fn new(operation: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: format!("req-{}", uuid::Uuid::new_v4()),
            operation: operation.into(),
            payload,
        }
    }
}

/// Body of a successful reply
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    /// Identity/permission checks answer with a bare boolean
    Bool(bool),

    /// Serialized (sanitized) result
    Serialized(Bytes),
}

/// Typed failure carried back to the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    /// 403, 404 or 500
    pub code: u16,

    /// Human-readable failure message
    pub message: String,
}

/// Result envelope: exactly one per request
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Success(ReplyBody),
    Failure(Failure),
}

impl Reply {
    /// Boolean success reply
    pub fn bool(value: bool) -> Self {
        Self::Success(ReplyBody::Bool(value))
    }

    /// Failure reply from an error
    pub fn failure(err: &BackboneError) -> Self {
        Self::Failure(Failure {
            code: err.code(),
            message: err.to_string(),
        })
    }

    /// Whether this is a success reply
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Failure code, if this is a failure reply
    pub fn failure_code(&self) -> Option<u16> {
        match self {
            Self::Failure(f) => Some(f.code),
            Self::Success(_) => None,
        }
    }

    /// Decode a serialized success body as JSON
    pub fn json(&self) -> Option<Value> {
        match self {
            Self::Success(ReplyBody::Serialized(bytes)) => serde_json::from_slice(bytes).ok(),
            Self::Success(ReplyBody::Bool(b)) => Some(Value::Bool(*b)),
            Self::Failure(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_unique() {
        let a = Request::new("omero.get_object", Payload::new());
        let b = Request::new("omero.get_object", Payload::new());
        assert!(a.id.starts_with("req-"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_payload_accessors() {
        let payload = Payload::new()
            .with(SESSION_KEY, "T1")
            .with("type", "Image")
            .with("id", 42)
            .with("originalFileIds", serde_json::json!([1, 2, 3]));

        assert_eq!(payload.session_key(), Some("T1"));
        assert_eq!(payload.str("type").unwrap(), "Image");
        assert_eq!(payload.i64("id").unwrap(), 42);
        assert_eq!(payload.i64_array("originalFileIds").unwrap(), vec![1, 2, 3]);
        assert_eq!(payload.len(), 4);
    }

    #[test]
    fn test_payload_missing_and_mistyped() {
        let payload = Payload::new().with("id", "forty-two");

        let err = payload.i64("id").unwrap_err();
        assert!(matches!(err, BackboneError::InvalidPayload(_)));
        assert!(err.to_string().contains("'id'"));

        let err = payload.str("type").unwrap_err();
        assert!(err.to_string().contains("missing key 'type'"));

        let payload = Payload::new().with("originalFileIds", serde_json::json!([1, "x"]));
        assert!(payload.i64_array("originalFileIds").is_err());
    }

    #[test]
    fn test_payload_deserializes_from_object() {
        let payload: Payload =
            serde_json::from_str(r#"{"sessionKey":"abc","imageId":5}"#).unwrap();
        assert_eq!(payload.session_key(), Some("abc"));
        assert_eq!(payload.i64("imageId").unwrap(), 5);
    }

    #[test]
    fn test_reply_failure_from_error() {
        let reply = Reply::failure(&BackboneError::SessionInvalid);
        assert_eq!(reply.failure_code(), Some(403));
        assert_eq!(
            reply,
            Reply::Failure(Failure {
                code: 403,
                message: "Session invalid".to_string()
            })
        );
        assert!(!reply.is_success());
    }

    #[test]
    fn test_identity_defaults_to_all_groups() {
        let identity = Identity::new("uuid-1", "User");
        assert_eq!(identity.group_id, ALL_GROUPS);
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["groupId"], -1);
        assert_eq!(json["eventType"], "User");
    }
}
