// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-Memory Event Queue
//!
//! Mimics the visibility semantics of a storage queue inside one process:
//! a received message is hidden until its visibility timeout lapses, then
//! handed out again with a higher dequeue count and a fresh pop receipt.

use crate::domain::event::{MessageHandle, QueueMessage};
use crate::domain::queue::{EventQueue, QueueError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    dequeue_count: u32,
    pop_receipt: Option<String>,
    visible_at: Instant,
}

pub struct InMemoryEventQueue {
    messages: Mutex<Vec<StoredMessage>>,
    visibility_timeout: Duration,
}

impl Default for InMemoryEventQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl InMemoryEventQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            visibility_timeout,
        }
    }

    /// Enqueue a JSON event, base64-encoding it the way the event grid does
    pub fn push_json(&self, json: &str) -> String {
        self.push_raw(STANDARD.encode(json.as_bytes()), 0)
    }

    /// Enqueue a body as-is, pretending it has already been delivered
    /// `dequeue_count` times
    pub fn push_raw(&self, body: impl Into<String>, dequeue_count: u32) -> String {
        let message_id = Uuid::new_v4().to_string();
        self.messages.lock().push(StoredMessage {
            message_id: message_id.clone(),
            body: body.into(),
            dequeue_count,
            pop_receipt: None,
            visible_at: Instant::now(),
        });
        message_id
    }

    /// Messages not yet deleted, visible or not
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventQueue for InMemoryEventQueue {
    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let now = Instant::now();
        let mut messages = self.messages.lock();

        Ok(messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(max_messages)
            .map(|m| {
                let pop_receipt = Uuid::new_v4().to_string();
                m.dequeue_count += 1;
                m.pop_receipt = Some(pop_receipt.clone());
                m.visible_at = now + self.visibility_timeout;
                QueueMessage {
                    handle: MessageHandle {
                        message_id: m.message_id.clone(),
                        pop_receipt,
                    },
                    dequeue_count: m.dequeue_count,
                    body: m.body.clone(),
                }
            })
            .collect())
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<(), QueueError> {
        let mut messages = self.messages.lock();
        let position = messages.iter().position(|m| m.message_id == handle.message_id);

        match position {
            Some(index) if messages[index].pop_receipt.as_deref() == Some(handle.pop_receipt.as_str()) => {
                messages.remove(index);
                Ok(())
            }
            // stale receipt: the message was handed out again since
            Some(_) => Err(QueueError::Status {
                status: 404,
                body: "pop receipt does not match".to_string(),
            }),
            None => Ok(()),
        }
    }
}
