//! MessageEnvelope - the unit of data exchanged through a queue.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::QueueError;
use super::ids::{LockToken, MessageId};
use crate::typed::Message;

/// Application payload plus tracing/identity metadata.
///
/// Design:
/// - `message_id` is generated at construction and never changes.
/// - `sent_time` is stamped by the queue on `send`, never by the caller.
/// - `lock_token` is only set while the envelope is checked out by `receive`.
///   It is a plain token; the lock record itself stays inside the queue.
///
/// The serialized form stores the payload base64 encoded under `message` and
/// never includes the lock token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(default)]
    trace_id: String,
    message_id: MessageId,
    #[serde(default)]
    message_type: String,
    #[serde(default)]
    sent_time: Option<DateTime<Utc>>,
    #[serde(rename = "message", with = "base64_payload", default)]
    payload: Vec<u8>,
    #[serde(skip)]
    lock_token: Option<LockToken>,
}

impl MessageEnvelope {
    pub fn new(
        trace_id: impl Into<String>,
        message_type: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            message_id: MessageId::generate(),
            message_type: message_type.into(),
            sent_time: None,
            payload: payload.into(),
            lock_token: None,
        }
    }

    /// Envelope whose payload is the JSON form of `value`.
    pub fn from_object<T: Serialize + ?Sized>(
        trace_id: impl Into<String>,
        message_type: impl Into<String>,
        value: &T,
    ) -> Result<Self, QueueError> {
        let trace_id = trace_id.into();
        let payload = serde_json::to_vec(value)
            .map_err(|e| QueueError::serialization(trace_id.clone(), e))?;
        Ok(Self::new(trace_id, message_type, payload))
    }

    /// Envelope for a typed message; the message type is `T::TYPE`.
    pub fn from_message<T: Message>(
        trace_id: impl Into<String>,
        message: &T,
    ) -> Result<Self, QueueError> {
        Self::from_object(trace_id, T::TYPE, message)
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn sent_time(&self) -> Option<DateTime<Utc>> {
        self.sent_time
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn lock_token(&self) -> Option<LockToken> {
        self.lock_token
    }

    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    /// Payload decoded as UTF-8 (invalid sequences are replaced).
    pub fn payload_as_string(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn set_payload_as_string(&mut self, value: &str) {
        self.payload = value.as_bytes().to_vec();
    }

    pub fn payload_as_object<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| QueueError::serialization(self.trace_id.clone(), e))
    }

    pub fn set_payload_as_object<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> Result<(), QueueError> {
        self.payload = serde_json::to_vec(value)
            .map_err(|e| QueueError::serialization(self.trace_id.clone(), e))?;
        Ok(())
    }

    /// Stamped by queue implementations when the envelope is sent.
    pub fn set_sent_time(&mut self, sent_time: DateTime<Utc>) {
        self.sent_time = Some(sent_time);
    }

    /// Set by queue implementations when the envelope is checked out,
    /// cleared when it is settled.
    pub fn set_lock_token(&mut self, lock_token: Option<LockToken>) {
        self.lock_token = lock_token;
    }

    pub fn to_json(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::serialization(self.trace_id.clone(), e))
    }

    pub fn from_json(json: &str) -> Result<Self, QueueError> {
        serde_json::from_str(json).map_err(|e| QueueError::serialization("", e))
    }
}

/// `[trace_id,message_type,payload]`, `---` for empty fields.
///
/// Operational tooling greps for this exact shape.
impl fmt::Display for MessageEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn or_dashes(value: &str) -> &str {
            if value.is_empty() { "---" } else { value }
        }

        let payload = String::from_utf8_lossy(&self.payload);
        write!(
            f,
            "[{},{},{}]",
            or_dashes(&self.trace_id),
            or_dashes(&self.message_type),
            or_dashes(&payload)
        )
    }
}

mod base64_payload {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
