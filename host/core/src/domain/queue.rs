// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Event Queue Trait
//!
//! Competing-consumer queue with at-least-once delivery. A received message
//! stays invisible to other consumers until it is deleted or its visibility
//! timeout lapses, after which it is handed out again with a higher
//! dequeue count.

use crate::domain::credentials::CredentialError;
use crate::domain::event::{MessageHandle, QueueMessage};
use async_trait::async_trait;
use thiserror::Error;

#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Receive up to `max_messages` visible messages; empty when the queue is drained
    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge (delete) a received message
    async fn delete(&self, handle: &MessageHandle) -> Result<(), QueueError>;
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue request failed: {0}")]
    Request(String),

    #[error("Queue returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Queue response could not be decoded: {0}")]
    Decode(String),

    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl From<reqwest::Error> for QueueError {
    fn from(err: reqwest::Error) -> Self {
        QueueError::Request(err.to_string())
    }
}
