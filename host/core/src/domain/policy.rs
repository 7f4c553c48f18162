// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Policy Domain Types
//!
//! A blob in the policy container parses into zero or more [`Policy`]
//! records. Each policy is triggered either periodically (cron) or by audit
//! events whose operation matches one of the policy's [`OperationTuple`]s.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Policy, mode and operation-alias value types

use crate::domain::schedule::CronExpression;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// `(resource_provider, operation)` pair identifying a control-plane action.
///
/// Compared by exact, case-sensitive string equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationTuple {
    #[serde(rename = "resourceProvider")]
    pub resource_provider: String,
    #[serde(rename = "event")]
    pub operation: String,
}

impl OperationTuple {
    pub fn new(resource_provider: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            resource_provider: resource_provider.into(),
            operation: operation.into(),
        }
    }

    /// Canonical `"{resource_provider}/{operation}"` form, as carried in the
    /// `operationName` field of audit events and in the event-grid filter.
    pub fn operation_string(&self) -> String {
        format!("{}/{}", self.resource_provider, self.operation)
    }
}

impl fmt::Display for OperationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_provider, self.operation)
    }
}

/// One element of a policy's `mode.events` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventSpec {
    /// Symbolic name resolved through the [`OperationAliasTable`]
    Alias(String),
    /// Explicit `{resourceProvider, event}` pair
    Explicit {
        #[serde(rename = "resourceProvider")]
        resource_provider: String,
        event: String,
    },
}

/// How a policy is triggered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyMode {
    Periodic { schedule: CronExpression },
    Event { operations: BTreeSet<OperationTuple> },
}

impl PolicyMode {
    pub fn is_periodic(&self) -> bool {
        matches!(self, PolicyMode::Periodic { .. })
    }

    pub fn is_event(&self) -> bool {
        matches!(self, PolicyMode::Event { .. })
    }

    pub fn operations(&self) -> Option<&BTreeSet<OperationTuple>> {
        match self {
            PolicyMode::Event { operations } => Some(operations),
            PolicyMode::Periodic { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PolicyMode::Periodic { .. } => "periodic",
            PolicyMode::Event { .. } => "event",
        }
    }
}

/// A single policy loaded from a blob
#[derive(Debug, Clone)]
pub struct Policy {
    pub name: String,
    pub resource: String,
    pub mode: PolicyMode,
    /// Blob this policy was loaded from
    pub blob_name: String,
    /// Scratch copy of the blob handed to the runner
    pub source_path: PathBuf,
    /// Full policy document, opaque to the host
    pub document: serde_json::Value,
}

impl Policy {
    /// Operation strings this policy subscribes to (empty for periodic policies)
    pub fn operation_strings(&self) -> BTreeSet<String> {
        self.mode
            .operations()
            .map(|ops| ops.iter().map(OperationTuple::operation_string).collect())
            .unwrap_or_default()
    }

    /// Exact-string match of an event's `operationName` against this policy
    pub fn subscribes_to(&self, operation_name: &str) -> bool {
        self.mode
            .operations()
            .is_some_and(|ops| ops.iter().any(|op| op.operation_string() == operation_name))
    }
}

/// Cached state for one blob in the policy container
#[derive(Debug, Clone)]
pub struct PolicyEntry {
    pub blob_name: String,
    /// Server-reported digest; equality means "unchanged on server"
    pub content_digest: String,
    pub policies: BTreeMap<String, Arc<Policy>>,
    /// Scheduler ids of the recurring jobs installed for this blob
    pub job_ids: Vec<String>,
    pub local_path: PathBuf,
}

impl PolicyEntry {
    pub fn event_policies(&self) -> impl Iterator<Item = &Arc<Policy>> {
        self.policies.values().filter(|p| p.mode.is_event())
    }

    pub fn periodic_policies(&self) -> impl Iterator<Item = &Arc<Policy>> {
        self.policies.values().filter(|p| p.mode.is_periodic())
    }

    pub fn operation_strings(&self) -> BTreeSet<String> {
        self.event_policies()
            .flat_map(|p| p.operation_strings())
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum AliasTableError {
    #[error("failed to parse operation alias table: {0}")]
    Yaml(String),

    #[error("failed to read operation alias table {path}: {error}")]
    Io { path: String, error: String },
}

/// Symbolic event names (e.g. `VnetWrite`) mapped to operation tuples.
///
/// The table is configuration: it is loaded from YAML of the form
///
/// ```yaml
/// VnetWrite:
///   resourceProvider: Microsoft.Network/virtualNetworks
///   event: write
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationAliasTable {
    aliases: HashMap<String, OperationTuple>,
}

impl OperationAliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, AliasTableError> {
        let aliases: HashMap<String, OperationTuple> =
            serde_yaml::from_str(yaml).map_err(|e| AliasTableError::Yaml(e.to_string()))?;
        Ok(Self { aliases })
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, AliasTableError> {
        let content = std::fs::read_to_string(path).map_err(|e| AliasTableError::Io {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    pub fn insert(&mut self, alias: impl Into<String>, operation: OperationTuple) {
        self.aliases.insert(alias.into(), operation);
    }

    /// Overlay `other` on top of this table; later entries win
    pub fn extend(&mut self, other: OperationAliasTable) {
        self.aliases.extend(other.aliases);
    }

    pub fn resolve(&self, alias: &str) -> Option<&OperationTuple> {
        self.aliases.get(alias)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
