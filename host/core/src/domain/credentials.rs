// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Access Token Seam
//!
//! Azure REST adapters ask for a bearer token per resource audience. How the
//! token is obtained (and refreshed) is outside the host's concern.

use async_trait::async_trait;
use thiserror::Error;

/// Audience for Queue Storage data-plane calls
pub const STORAGE_RESOURCE: &str = "https://storage.azure.com/";

/// Audience for Azure Resource Manager calls
pub const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";

#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn token(&self, resource: &str) -> Result<String, CredentialError>;
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Token request failed: {0}")]
    Request(String),

    #[error("Token endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Token response was malformed: {0}")]
    Malformed(String),
}
