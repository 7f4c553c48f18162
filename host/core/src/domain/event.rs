// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Queue Messages and Audit Events
//!
//! The event queue delivers [`QueueMessage`] envelopes whose body is
//! base64-encoded JSON in the Event Grid schema:
//!
//! ```json
//! {
//!   "subject": "/subscriptions/.../resourceGroups/rg",
//!   "eventType": "Microsoft.Resources.ResourceWriteSuccess",
//!   "eventTime": "2026-05-01T10:00:00Z",
//!   "id": "619d2674-...",
//!   "data": {
//!     "correlationId": "...",
//!     "resourceProvider": "Microsoft.Resources",
//!     "resourceUri": "/subscriptions/.../resourceGroups/rg",
//!     "operationName": "Microsoft.Resources/subscriptions/resourceGroups/write",
//!     "status": "Succeeded"
//!   },
//!   "topic": "/subscriptions/..."
//! }
//! ```
//!
//! Unknown fields are ignored.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque receipt needed to delete a received message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub message_id: String,
    pub pop_receipt: String,
}

/// Transport envelope returned by the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub handle: MessageHandle,
    /// Number of times the queue has handed this message out, this delivery included
    pub dequeue_count: u32,
    /// Base64-encoded JSON event
    pub body: String,
}

impl QueueMessage {
    /// Wrap a JSON payload the way the event grid writes it to the queue
    pub fn encode(handle: MessageHandle, dequeue_count: u32, json: &str) -> Self {
        Self {
            handle,
            dequeue_count,
            body: STANDARD.encode(json.as_bytes()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub resource_provider: String,
    #[serde(default)]
    pub resource_uri: String,
    pub operation_name: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Parsed audit event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub subject: String,
    #[serde(rename = "id")]
    pub event_id: String,
    pub event_type: String,
    pub event_time: DateTime<Utc>,
    pub topic: Option<String>,
    pub data: EventData,
    #[serde(skip)]
    pub dequeue_count: u32,
    #[serde(skip)]
    pub handle: MessageHandle,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventPayload {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    event_type: String,
    event_time: DateTime<Utc>,
    id: String,
    data: EventData,
    #[serde(default)]
    topic: Option<String>,
}

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("message {message_id} body is not valid base64: {error}")]
    Base64 { message_id: String, error: String },

    #[error("message {message_id} body is not a valid event: {error}")]
    Json { message_id: String, error: String },
}

impl Event {
    /// Decode base64 → JSON → event
    pub fn decode(message: &QueueMessage) -> Result<Self, EventDecodeError> {
        let raw = STANDARD
            .decode(message.body.trim().as_bytes())
            .map_err(|e| EventDecodeError::Base64 {
                message_id: message.handle.message_id.clone(),
                error: e.to_string(),
            })?;

        let payload: EventPayload =
            serde_json::from_slice(&raw).map_err(|e| EventDecodeError::Json {
                message_id: message.handle.message_id.clone(),
                error: e.to_string(),
            })?;

        Ok(Self {
            subject: payload.subject,
            event_id: payload.id,
            event_type: payload.event_type,
            event_time: payload.event_time,
            topic: payload.topic,
            data: payload.data,
            dequeue_count: message.dequeue_count,
            handle: message.handle.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RG_WRITE: &str = r#"{
        "subject": "/subscriptions/sub/resourceGroups/test_rg",
        "eventType": "Microsoft.Resources.ResourceWriteSuccess",
        "eventTime": "2026-05-01T10:00:00.1234567Z",
        "id": "619d2674-b396-4356-9619-6c5a52fe4e88",
        "data": {
            "correlationId": "7dd5a476-e052-40e2-99e4-bb9852dc1f86",
            "resourceProvider": "Microsoft.Resources",
            "resourceUri": "/subscriptions/sub/resourceGroups/test_rg",
            "operationName": "Microsoft.Resources/subscriptions/resourceGroups/write",
            "status": "Succeeded",
            "claims": {"ignored": true}
        },
        "dataVersion": "",
        "topic": "/subscriptions/sub"
    }"#;

    fn handle() -> MessageHandle {
        MessageHandle {
            message_id: "m1".to_string(),
            pop_receipt: "pr1".to_string(),
        }
    }

    #[test]
    fn test_decode_event_grid_message() {
        let message = QueueMessage::encode(handle(), 2, RG_WRITE);
        let event = Event::decode(&message).unwrap();

        assert_eq!(event.event_id, "619d2674-b396-4356-9619-6c5a52fe4e88");
        assert_eq!(event.data.resource_provider, "Microsoft.Resources");
        assert_eq!(
            event.data.operation_name,
            "Microsoft.Resources/subscriptions/resourceGroups/write"
        );
        assert_eq!(event.topic.as_deref(), Some("/subscriptions/sub"));
        assert_eq!(event.dequeue_count, 2);
        assert_eq!(event.handle, handle());
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        let message = QueueMessage {
            handle: handle(),
            dequeue_count: 1,
            body: "***".to_string(),
        };
        assert!(matches!(
            Event::decode(&message),
            Err(EventDecodeError::Base64 { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_payload_without_operation() {
        let message = QueueMessage::encode(
            handle(),
            1,
            r#"{"id": "x", "eventTime": "2026-05-01T10:00:00Z", "data": {}}"#,
        );
        assert!(matches!(
            Event::decode(&message),
            Err(EventDecodeError::Json { .. })
        ));
    }
}
