// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory blob store
//!
//! Digests are the hex SHA-256 of the content, so rewriting a blob with the
//! same bytes keeps its digest.

use crate::domain::storage::{BlobItem, BlobStore, StorageError};
use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<BTreeMap<String, (String, Vec<u8>)>>,
    fetches: AtomicUsize,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, name: impl Into<String>, content: impl Into<Vec<u8>>) {
        let content = content.into();
        let digest = hex::encode(Sha256::digest(&content));
        self.blobs.write().insert(name.into(), (digest, content));
    }

    /// Store a blob under an explicit digest
    pub fn put_with_digest(
        &self,
        name: impl Into<String>,
        digest: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) {
        self.blobs
            .write()
            .insert(name.into(), (digest.into(), content.into()));
    }

    pub fn delete(&self, name: &str) -> bool {
        self.blobs.write().remove(name).is_some()
    }

    pub fn clear(&self) {
        self.blobs.write().clear();
    }

    /// Number of `fetch` calls served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn list(&self) -> Result<Vec<BlobItem>, StorageError> {
        Ok(self
            .blobs
            .read()
            .iter()
            .map(|(name, (digest, _))| BlobItem::new(name.clone(), digest.clone()))
            .collect())
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.blobs
            .read()
            .get(name)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }
}
