// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Access Token Providers
//!
//! - [`StaticTokenProvider`]: a fixed bearer token (e.g. `AZURE_ACCESS_TOKEN`)
//! - [`ManagedIdentityTokenProvider`]: the instance metadata endpoint, with
//!   tokens cached per resource until shortly before they expire

use crate::domain::credentials::{AccessTokenProvider, CredentialError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";

/// Refresh this long before the reported expiry
const REFRESH_MARGIN_SECS: i64 = 5 * 60;

pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn token(&self, _resource: &str) -> Result<String, CredentialError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Epoch seconds; IMDS sends it as a string
    expires_on: serde_json::Value,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    refresh_at: DateTime<Utc>,
}

pub struct ManagedIdentityTokenProvider {
    client: Client,
    endpoint: String,
    client_id: Option<String>,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl ManagedIdentityTokenProvider {
    pub fn new() -> Result<Self, CredentialError> {
        Self::with_endpoint(IMDS_TOKEN_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, CredentialError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            client_id: None,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Pick a user-assigned identity
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    async fn request_token(&self, resource: &str) -> Result<CachedToken, CredentialError> {
        let mut query = vec![("api-version", IMDS_API_VERSION), ("resource", resource)];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .header("Metadata", "true")
            .query(&query)
            .send()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body: TokenResponse = response
                    .json()
                    .await
                    .map_err(|e| CredentialError::Malformed(e.to_string()))?;
                let expires_on = parse_epoch(&body.expires_on).ok_or_else(|| {
                    CredentialError::Malformed(format!("bad expires_on: {}", body.expires_on))
                })?;
                Ok(CachedToken {
                    token: body.access_token,
                    refresh_at: expires_on - ChronoDuration::seconds(REFRESH_MARGIN_SECS),
                })
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(CredentialError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

#[async_trait]
impl AccessTokenProvider for ManagedIdentityTokenProvider {
    async fn token(&self, resource: &str) -> Result<String, CredentialError> {
        let cached = self.cache.lock().get(resource).cloned();
        if let Some(cached) = cached {
            if Utc::now() < cached.refresh_at {
                return Ok(cached.token);
            }
        }

        debug!(resource, "Requesting managed identity token");
        let fresh = self.request_token(resource).await?;
        let token = fresh.token.clone();
        self.cache.lock().insert(resource.to_string(), fresh);
        Ok(token)
    }
}

fn parse_epoch(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        serde_json::Value::String(s) => s.parse::<i64>().ok()?,
        serde_json::Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    DateTime::from_timestamp(secs, 0)
}
