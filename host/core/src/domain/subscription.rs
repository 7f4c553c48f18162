// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Event Subscription Trait
//!
//! The cloud event grid routes audit events into the host's queue through a
//! server-side subscription. From the host's point of view the only tunable
//! dimension of that subscription is the set of accepted
//! `data.operationName` strings.

use crate::domain::credentials::CredentialError;
use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

/// What a sync call did on the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The filter already admitted exactly the requested set
    Unchanged,
    /// The filter was created or replaced
    Updated,
    /// The requested set was empty and the subscription is gone
    Removed,
}

#[async_trait]
pub trait EventSubscription: Send + Sync {
    /// Make the server-side filter admit exactly `operations`.
    ///
    /// Must be a no-op when the filter already matches.
    async fn sync(&self, operations: &BTreeSet<String>) -> Result<SyncOutcome, EventGridError>;
}

#[derive(Debug, Error)]
pub enum EventGridError {
    #[error("Event grid request failed: {0}")]
    Request(String),

    #[error("Event grid returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid event subscription configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl From<reqwest::Error> for EventGridError {
    fn from(err: reqwest::Error) -> Self {
        EventGridError::Request(err.to_string())
    }
}
