// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Blob Store Trait - Anti-Corruption Layer for the policy container
//!
//! The host only needs two things from the object store: an enumeration of
//! blob names with a server-provided content digest, and the bytes of one
//! blob. Implementations live in `crate::infrastructure::storage`.

use async_trait::async_trait;
use thiserror::Error;

/// One listed blob
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlobItem {
    pub name: String,
    /// Opaque version key (MD5, ETag, or a locally computed hash)
    pub content_digest: String,
}

impl BlobItem {
    pub fn new(name: impl Into<String>, content_digest: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_digest: content_digest.into(),
        }
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List every blob in the container
    async fn list(&self) -> Result<Vec<BlobItem>, StorageError>;

    /// Download one blob
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, StorageError>;
}

/// Storage errors. Everything except `InvalidUri` is retried on the next tick.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Storage request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Invalid storage URI: {0}")]
    InvalidUri(String),
}
