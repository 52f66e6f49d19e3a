use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use tallyline_core::TenantId;

/// A domain event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (`type` + `v` identify the payload schema)
/// - **tenant-scoped** (every event names its tenant)
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "inventory.stock_corrected").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Tenant that owns the event.
    fn tenant_id(&self) -> TenantId;
}

/// Explicit encoding/decoding of a closed set of events.
///
/// Implementors match on `(type, v)` when decoding so an unknown type or an
/// unsupported version is an error instead of a silently mis-shaped value.
pub trait EventCodec: Event + Sized {
    fn encode(&self) -> Result<JsonValue, EventCodecError>;

    fn decode(event_type: &str, payload: &JsonValue) -> Result<Self, EventCodecError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventCodecError {
    #[error("failed to serialize {event_type}: {message}")]
    Serialize { event_type: String, message: String },

    #[error("payload of {0} is not a JSON object")]
    NotAnObject(String),

    #[error("payload of {0} has no integer `v` field")]
    MissingVersion(String),

    #[error("unknown event {event_type} v{version}")]
    Unknown { event_type: String, version: u32 },

    #[error("failed to decode {event_type} v{version}: {message}")]
    Deserialize {
        event_type: String,
        version: u32,
        message: String,
    },
}

/// Serialize `body` and stamp it with `type` and `v`.
pub fn encode_payload<T: Serialize>(
    event_type: &str,
    version: u32,
    body: &T,
) -> Result<JsonValue, EventCodecError> {
    let mut value = serde_json::to_value(body).map_err(|e| EventCodecError::Serialize {
        event_type: event_type.to_string(),
        message: e.to_string(),
    })?;

    let obj = value
        .as_object_mut()
        .ok_or_else(|| EventCodecError::NotAnObject(event_type.to_string()))?;
    obj.insert("type".to_string(), JsonValue::from(event_type));
    obj.insert("v".to_string(), JsonValue::from(version));

    Ok(value)
}

/// Read the schema version stamped on a payload.
pub fn payload_version(event_type: &str, payload: &JsonValue) -> Result<u32, EventCodecError> {
    payload
        .get("v")
        .and_then(JsonValue::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| EventCodecError::MissingVersion(event_type.to_string()))
}

/// Decode the body of a known `(type, v)` pair. Unknown fields are ignored so
/// additive changes stay within the same version.
pub fn decode_body<T: DeserializeOwned>(
    event_type: &str,
    version: u32,
    payload: &JsonValue,
) -> Result<T, EventCodecError> {
    serde_json::from_value(payload.clone()).map_err(|e| EventCodecError::Deserialize {
        event_type: event_type.to_string(),
        version,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Body {
        branch_id: String,
        delta: i64,
    }

    #[test]
    fn encode_stamps_type_and_version() {
        let body = Body {
            branch_id: "b1".into(),
            delta: -2,
        };
        let json = encode_payload("inventory.stock_corrected", 1, &body).unwrap();
        assert_eq!(json["type"], "inventory.stock_corrected");
        assert_eq!(json["v"], 1);
        assert_eq!(json["branchId"], "b1");
        assert_eq!(payload_version("inventory.stock_corrected", &json).unwrap(), 1);

        let back: Body = decode_body("inventory.stock_corrected", 1, &json).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn non_object_bodies_are_rejected() {
        let err = encode_payload("x", 1, &5).unwrap_err();
        assert_eq!(err, EventCodecError::NotAnObject("x".into()));
    }

    #[test]
    fn missing_version_is_an_error() {
        let json = serde_json::json!({ "type": "x" });
        assert!(matches!(
            payload_version("x", &json),
            Err(EventCodecError::MissingVersion(_))
        ));
    }
}
