// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! OpenDAL Blob Store
//!
//! One [`BlobStore`] over any OpenDAL operator. Azure containers and local
//! directories are supported.
//!
//! # Content Digest
//!
//! The first available of:
//!
//! 1. `Content-MD5` reported by the listing (Azure sets this on upload)
//! 2. `ETag`
//! 3. hex SHA-256 of the content, computed locally (filesystem backend)

use crate::domain::storage::{BlobItem, BlobStore, StorageError};
use crate::infrastructure::storage::BlobStoreBackend;
use async_trait::async_trait;
use opendal::{services, EntryMode, ErrorKind, Operator};
use sha2::{Digest, Sha256};
use std::future::IntoFuture;
use std::time::Duration;
use tracing::debug;

/// Bound on each storage call
pub const STORAGE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct OpendalBlobStore {
    operator: Operator,
    timeout: Duration,
}

impl OpendalBlobStore {
    pub fn new(operator: Operator) -> Self {
        Self {
            operator,
            timeout: STORAGE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_backend(backend: &BlobStoreBackend) -> Result<Self, StorageError> {
        let operator = match backend {
            BlobStoreBackend::AzureBlob {
                endpoint,
                container,
                prefix,
                sas_token,
            } => {
                let mut builder = services::Azblob::default()
                    .endpoint(endpoint)
                    .container(container)
                    .root(&format!("/{}", prefix));
                if let Some(token) = sas_token {
                    builder = builder.sas_token(token);
                }
                Operator::new(builder).map_err(map_error)?.finish()
            }
            BlobStoreBackend::Local { root } => {
                let root = root.to_string_lossy();
                let builder = services::Fs::default().root(&root);
                Operator::new(builder).map_err(map_error)?.finish()
            }
            BlobStoreBackend::Memory => Operator::new(services::Memory::default())
                .map_err(map_error)?
                .finish(),
        };

        debug!(backend = ?backend_kind(backend), "Blob store initialized");
        Ok(Self::new(operator))
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StorageError>
    where
        F: IntoFuture<Output = opendal::Result<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StorageError::Timeout(self.timeout))?
            .map_err(map_error)
    }
}

#[async_trait]
impl BlobStore for OpendalBlobStore {
    async fn list(&self) -> Result<Vec<BlobItem>, StorageError> {
        let entries = self
            .bounded(self.operator.list_with("/").recursive(true))
            .await?;

        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            let meta = entry.metadata();
            if meta.mode() != EntryMode::FILE {
                continue;
            }

            let name = entry.path().trim_start_matches('/').to_string();
            let digest = match meta.content_md5().or(meta.etag()) {
                Some(reported) => reported.trim_matches('"').to_string(),
                None => {
                    let content = self.fetch(&name).await?;
                    hex::encode(Sha256::digest(&content))
                }
            };
            items.push(BlobItem::new(name, digest));
        }

        Ok(items)
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let buffer = self.bounded(self.operator.read(name)).await?;
        Ok(buffer.to_vec())
    }
}

fn backend_kind(backend: &BlobStoreBackend) -> &'static str {
    match backend {
        BlobStoreBackend::AzureBlob { .. } => "azblob",
        BlobStoreBackend::Local { .. } => "fs",
        BlobStoreBackend::Memory => "memory",
    }
}

fn map_error(err: opendal::Error) -> StorageError {
    match err.kind() {
        ErrorKind::NotFound => StorageError::NotFound(err.to_string()),
        ErrorKind::ConfigInvalid => StorageError::InvalidUri(err.to_string()),
        _ => StorageError::Backend(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_directory_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yml"), "policies: []").unwrap();
        std::fs::create_dir(dir.path().join("team")).unwrap();
        std::fs::write(dir.path().join("team/b.yaml"), "policies: []").unwrap();

        let store = OpendalBlobStore::from_backend(&BlobStoreBackend::Local {
            root: dir.path().to_path_buf(),
        })
        .unwrap();

        let mut items = store.list().await.unwrap();
        items.sort();
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a.yml", "team/b.yaml"]);

        assert!(items.iter().all(|i| !i.content_digest.is_empty()));
        assert_eq!(store.fetch("team/b.yaml").await.unwrap(), b"policies: []");
    }

    #[tokio::test]
    async fn test_digest_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.yml");
        std::fs::write(&path, "policies: []").unwrap();

        let store = OpendalBlobStore::from_backend(&BlobStoreBackend::Local {
            root: dir.path().to_path_buf(),
        })
        .unwrap();
        let before = store.list().await.unwrap();

        std::fs::write(&path, "policies: [changed]").unwrap();
        let after = store.list().await.unwrap();
        assert_ne!(before[0].content_digest, after[0].content_digest);
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = OpendalBlobStore::from_backend(&BlobStoreBackend::Local {
            root: dir.path().to_path_buf(),
        })
        .unwrap();

        assert!(matches!(
            store.fetch("missing.yml").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
