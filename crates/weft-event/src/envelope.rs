//! Envelopes and invoke body shapes.
//!
//! An [`Envelope`] is what actually travels on the bus: the descriptor
//! plus a `serde_json::Value` body. For plain events the body is whatever
//! the emitter chose. For invoke events the body is always one of the four
//! shapes below, all carrying the correlation id so concurrent callers on
//! a shared bus stay isolated.
//!
//! Wire field names are camelCase (`invokeId`, `isReqStream`) so frames
//! interoperate with peers regardless of their implementation language.

use crate::{EventDesc, EventError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_types::InvokeId;

/// A descriptor paired with its body; the unit of dispatch on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Identity (and flow marker) of the event.
    pub desc: EventDesc,
    /// Event payload.
    pub body: Value,
}

impl Envelope {
    /// Creates an envelope.
    #[must_use]
    pub fn new(desc: EventDesc, body: Value) -> Self {
        Self { desc, body }
    }

    /// Extracts the correlation id, if the body carries one.
    ///
    /// Every invoke body shape stores it under `invokeId`.
    #[must_use]
    pub fn invoke_id(&self) -> Option<InvokeId> {
        self.body
            .get("invokeId")
            .and_then(Value::as_str)
            .map(InvokeId::from_wire)
    }
}

/// Body of `send` and `receive` events.
///
/// `is_req_stream` is present (and `true`) only on chunks of a
/// client-streaming request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokePayload {
    /// Correlation id of the call.
    pub invoke_id: InvokeId,
    /// Request or response content.
    pub content: Value,
    /// Marks this `send` as one chunk of a streaming request.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub is_req_stream: Option<bool>,
}

impl InvokePayload {
    /// A unary payload (no request-stream marker).
    #[must_use]
    pub fn unary(invoke_id: InvokeId, content: Value) -> Self {
        Self {
            invoke_id,
            content,
            is_req_stream: None,
        }
    }

    /// One chunk of a streaming request.
    #[must_use]
    pub fn chunk(invoke_id: InvokeId, content: Value) -> Self {
        Self {
            invoke_id,
            content,
            is_req_stream: Some(true),
        }
    }

    /// Returns `true` if this payload is a streaming-request chunk.
    #[must_use]
    pub fn is_stream_chunk(&self) -> bool {
        self.is_req_stream == Some(true)
    }
}

/// Body of `send-error` and `receive-error` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeErrorPayload {
    /// Correlation id of the call.
    pub invoke_id: InvokeId,
    /// The raised error value, forwarded as-is.
    pub error: Value,
}

/// Body of `send-stream-end` and `receive-stream-end` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeEndPayload {
    /// Correlation id of the call.
    pub invoke_id: InvokeId,
}

/// Body of `send-abort` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeAbortPayload {
    /// Correlation id of the call.
    pub invoke_id: InvokeId,
    /// Cancellation reason, forwarded to the server-side token.
    pub reason: Value,
}

/// Decodes a typed invoke body out of an envelope body.
///
/// # Errors
///
/// Returns [`EventError::MalformedBody`] when the value does not have the
/// expected shape.
pub fn decode_body<T: serde::de::DeserializeOwned>(body: &Value) -> Result<T, EventError> {
    serde_json::from_value(body.clone())
        .map_err(|e| EventError::MalformedBody(e.to_string()))
}

/// Encodes a typed invoke body into an envelope body.
///
/// The invoke body shapes serialize infallibly (string keys, plain JSON
/// values); a failure here would be a bug, so it is surfaced as an error
/// rather than a panic.
pub fn encode_body<T: Serialize>(body: &T) -> Result<Value, EventError> {
    serde_json::to_value(body).map_err(|e| EventError::MalformedBody(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unary_payload_wire_shape() {
        let id = InvokeId::from_wire("abc123");
        let body = encode_body(&InvokePayload::unary(id, json!({"x": 1}))).unwrap();
        assert_eq!(body, json!({"invokeId": "abc123", "content": {"x": 1}}));
    }

    #[test]
    fn chunk_payload_wire_shape() {
        let id = InvokeId::from_wire("abc123");
        let body = encode_body(&InvokePayload::chunk(id, json!(7))).unwrap();
        assert_eq!(
            body,
            json!({"invokeId": "abc123", "content": 7, "isReqStream": true})
        );
    }

    #[test]
    fn decode_round_trip() {
        let id = InvokeId::generate();
        let payload = InvokePayload::chunk(id.clone(), json!([1, 2]));
        let body = encode_body(&payload).unwrap();
        let back: InvokePayload = decode_body(&body).unwrap();
        assert_eq!(back, payload);
        assert!(back.is_stream_chunk());
    }

    #[test]
    fn decode_rejects_malformed() {
        let err = decode_body::<InvokePayload>(&json!({"content": 1})).unwrap_err();
        assert!(matches!(err, EventError::MalformedBody(_)));
    }

    #[test]
    fn envelope_invoke_id_extraction() {
        let id = InvokeId::from_wire("deadbeef");
        let body = encode_body(&InvokeEndPayload {
            invoke_id: id.clone(),
        })
        .unwrap();
        let env = Envelope::new(EventDesc::new("x:send-stream-end"), body);
        assert_eq!(env.invoke_id(), Some(id));

        let plain = Envelope::new(EventDesc::new("x"), json!("hello"));
        assert_eq!(plain.invoke_id(), None);
    }

    #[test]
    fn abort_payload_carries_reason() {
        let payload = InvokeAbortPayload {
            invoke_id: InvokeId::from_wire("a1"),
            reason: json!("user cancelled"),
        };
        let body = encode_body(&payload).unwrap();
        assert_eq!(body["reason"], json!("user cancelled"));
        let back: InvokeAbortPayload = decode_body(&body).unwrap();
        assert_eq!(back, payload);
    }
}
