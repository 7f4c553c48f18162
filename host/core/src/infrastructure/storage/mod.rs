// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Blob Store Infrastructure Module
//!
//! Concrete [`BlobStore`] implementations for the policy container.

pub mod memory;
pub mod object_store;

pub use memory::InMemoryBlobStore;
pub use object_store::OpendalBlobStore;

use crate::domain::storage::{BlobStore, StorageError};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// Where policy blobs live, as understood from `POLICY_STORAGE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobStoreBackend {
    /// Azure Blob Storage container, optionally narrowed to a prefix
    AzureBlob {
        endpoint: String,
        container: String,
        prefix: String,
        sas_token: Option<String>,
    },

    /// Local directory (development)
    Local { root: PathBuf },

    /// Process-local memory (testing)
    Memory,
}

impl BlobStoreBackend {
    /// Parse a storage URI.
    ///
    /// - `https://{account}.blob.core.windows.net/{container}[/{prefix}][?{sas}]`
    /// - `http://127.0.0.1:10000/{account}/{container}[/{prefix}]` (path-style, Azurite)
    /// - `file:///var/policies` or a bare path
    /// - `memory://`
    pub fn parse(uri: &str) -> Result<Self, StorageError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(StorageError::InvalidUri("empty storage URI".to_string()));
        }
        if uri.starts_with("memory://") {
            return Ok(BlobStoreBackend::Memory);
        }
        if !uri.contains("://") {
            return Ok(BlobStoreBackend::Local {
                root: PathBuf::from(uri),
            });
        }

        let url = Url::parse(uri).map_err(|e| StorageError::InvalidUri(format!("{}: {}", uri, e)))?;
        match url.scheme() {
            "file" => url
                .to_file_path()
                .map(|root| BlobStoreBackend::Local { root })
                .map_err(|_| StorageError::InvalidUri(uri.to_string())),
            "http" | "https" => Self::parse_azure(uri, &url),
            other => Err(StorageError::InvalidUri(format!(
                "unsupported scheme '{}' in {}",
                other, uri
            ))),
        }
    }

    fn parse_azure(uri: &str, url: &Url) -> Result<Self, StorageError> {
        let host = url
            .host_str()
            .ok_or_else(|| StorageError::InvalidUri(uri.to_string()))?;
        let mut segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let mut endpoint = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        };

        // Non-Azure hosts use path-style addressing: the account comes first
        if !host.contains(".blob.") {
            if segments.is_empty() {
                return Err(StorageError::InvalidUri(format!("{}: missing account", uri)));
            }
            let account = segments.remove(0);
            endpoint = format!("{}/{}", endpoint, account);
        }

        if segments.is_empty() {
            return Err(StorageError::InvalidUri(format!("{}: missing container", uri)));
        }
        let container = segments.remove(0).to_string();
        let prefix = segments.join("/");

        Ok(BlobStoreBackend::AzureBlob {
            endpoint,
            container,
            prefix,
            sas_token: url.query().map(str::to_string),
        })
    }
}

/// Build the blob store for a storage URI
pub fn create_blob_store(uri: &str) -> Result<Arc<dyn BlobStore>, StorageError> {
    match BlobStoreBackend::parse(uri)? {
        BlobStoreBackend::Memory => Ok(Arc::new(InMemoryBlobStore::new())),
        backend => Ok(Arc::new(OpendalBlobStore::from_backend(&backend)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_azure_blob_url() {
        let backend = BlobStoreBackend::parse(
            "https://acct.blob.core.windows.net/policies/team-a?sv=2022&sig=abc",
        )
        .unwrap();
        assert_eq!(
            backend,
            BlobStoreBackend::AzureBlob {
                endpoint: "https://acct.blob.core.windows.net".to_string(),
                container: "policies".to_string(),
                prefix: "team-a".to_string(),
                sas_token: Some("sv=2022&sig=abc".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_path_style_url() {
        let backend =
            BlobStoreBackend::parse("http://127.0.0.1:10000/devstoreaccount1/policies").unwrap();
        assert_eq!(
            backend,
            BlobStoreBackend::AzureBlob {
                endpoint: "http://127.0.0.1:10000/devstoreaccount1".to_string(),
                container: "policies".to_string(),
                prefix: String::new(),
                sas_token: None,
            }
        );
    }

    #[test]
    fn test_parse_local_and_memory() {
        assert_eq!(
            BlobStoreBackend::parse("/var/policies").unwrap(),
            BlobStoreBackend::Local {
                root: PathBuf::from("/var/policies")
            }
        );
        assert_eq!(
            BlobStoreBackend::parse("file:///var/policies").unwrap(),
            BlobStoreBackend::Local {
                root: PathBuf::from("/var/policies")
            }
        );
        assert_eq!(
            BlobStoreBackend::parse("memory://").unwrap(),
            BlobStoreBackend::Memory
        );
    }

    #[test]
    fn test_parse_rejects_bad_uris() {
        assert!(BlobStoreBackend::parse("").is_err());
        assert!(BlobStoreBackend::parse("s3://bucket/key").is_err());
        assert!(BlobStoreBackend::parse("https://acct.blob.core.windows.net/").is_err());
    }
}
