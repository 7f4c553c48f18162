// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Policy Document Loader
//!
//! Parses a policy blob into [`Policy`] records.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → Domain objects
//! - **Anti-Corruption:** Only `name`, `resource` and `mode` are interpreted;
//!   the rest of each policy is carried through untouched for the runner
//!
//! # Document Format
//!
//! ```yaml
//! policies:
//!   - name: tag-nightly
//!     resource: azure.vm
//!     mode:
//!       type: container-periodic
//!       schedule: "0 2 * * *"
//!   - name: vnet-audit
//!     resource: azure.vnet
//!     mode:
//!       type: container-event
//!       events:
//!         - VnetWrite
//!         - resourceProvider: Microsoft.Network/virtualNetworks
//!           event: delete
//! ```
//!
//! `mode.type` is looked up in a [`ModeRegistry`]. Policies whose mode is not
//! registered are not meant for the container host and are skipped.

use crate::domain::policy::{
    AliasTableError, EventSpec, OperationAliasTable, OperationTuple, Policy, PolicyMode,
};
use crate::domain::schedule::{CronError, CronExpression};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

pub const MODE_CONTAINER_PERIODIC: &str = "container-periodic";
pub const MODE_CONTAINER_EVENT: &str = "container-event";

/// Alias table shipped with the host
const BUILTIN_ALIASES: &str = include_str!("../../resources/operation_aliases.yaml");

#[derive(Debug, Error)]
pub enum PolicyParseError {
    #[error("{blob}: document is not valid UTF-8")]
    Utf8 { blob: String },

    #[error("{blob}: invalid YAML: {error}")]
    Yaml { blob: String, error: String },

    #[error("{blob}: document has no `policies` sequence")]
    MissingPolicies { blob: String },

    #[error("{blob}: policy #{index}: {reason}")]
    InvalidPolicy {
        blob: String,
        index: usize,
        reason: String,
    },

    #[error("{blob}: duplicate policy name '{name}'")]
    DuplicateName { blob: String, name: String },

    #[error("{blob}: policy '{policy}' references unknown event alias '{alias}'")]
    UnknownAlias {
        blob: String,
        policy: String,
        alias: String,
    },

    #[error("{blob}: policy '{policy}' has no schedule")]
    MissingSchedule { blob: String, policy: String },

    #[error("{blob}: policy '{policy}': {error}")]
    InvalidSchedule {
        blob: String,
        policy: String,
        error: CronError,
    },

    #[error("{blob}: policy '{policy}' declares no events")]
    EmptyEvents { blob: String, policy: String },

    #[error("unsafe blob name '{0}'")]
    UnsafeBlobName(String),

    #[error("failed to read {path}: {error}")]
    Io { path: String, error: String },
}

// ============================================================================
// YAML Schema (External Representation)
// ============================================================================

#[derive(Debug, Deserialize)]
struct PolicyYaml {
    name: Option<String>,
    resource: Option<String>,
    mode: Option<ModeYaml>,
}

/// The `mode` block of a policy
#[derive(Debug, Clone, Deserialize)]
pub struct ModeYaml {
    #[serde(rename = "type")]
    pub mode_type: String,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub events: Vec<EventSpec>,
}

// ============================================================================
// Mode Registry
// ============================================================================

/// Where a mode parser is being applied, for error reporting
pub struct ModeContext<'a> {
    pub blob_name: &'a str,
    pub policy_name: &'a str,
    pub aliases: &'a OperationAliasTable,
}

pub type ModeParser = fn(&ModeContext<'_>, &ModeYaml) -> Result<PolicyMode, PolicyParseError>;

/// Maps `mode.type` discriminators to the function that builds the mode
#[derive(Clone)]
pub struct ModeRegistry {
    parsers: HashMap<String, ModeParser>,
}

impl ModeRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    pub fn register(&mut self, mode_type: impl Into<String>, parser: ModeParser) {
        self.parsers.insert(mode_type.into(), parser);
    }

    pub fn get(&self, mode_type: &str) -> Option<ModeParser> {
        self.parsers.get(mode_type).copied()
    }

    pub fn mode_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl Default for ModeRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(MODE_CONTAINER_PERIODIC, parse_periodic_mode);
        registry.register(MODE_CONTAINER_EVENT, parse_event_mode);
        registry
    }
}

fn parse_periodic_mode(
    ctx: &ModeContext<'_>,
    mode: &ModeYaml,
) -> Result<PolicyMode, PolicyParseError> {
    let source = mode
        .schedule
        .as_deref()
        .ok_or_else(|| PolicyParseError::MissingSchedule {
            blob: ctx.blob_name.to_string(),
            policy: ctx.policy_name.to_string(),
        })?;

    let schedule =
        CronExpression::parse(source).map_err(|error| PolicyParseError::InvalidSchedule {
            blob: ctx.blob_name.to_string(),
            policy: ctx.policy_name.to_string(),
            error,
        })?;

    Ok(PolicyMode::Periodic { schedule })
}

fn parse_event_mode(
    ctx: &ModeContext<'_>,
    mode: &ModeYaml,
) -> Result<PolicyMode, PolicyParseError> {
    let mut operations = BTreeSet::new();

    for declared in &mode.events {
        let operation = match declared {
            EventSpec::Alias(alias) => ctx.aliases.resolve(alias).cloned().ok_or_else(|| {
                PolicyParseError::UnknownAlias {
                    blob: ctx.blob_name.to_string(),
                    policy: ctx.policy_name.to_string(),
                    alias: alias.clone(),
                }
            })?,
            EventSpec::Explicit {
                resource_provider,
                event,
            } => OperationTuple::new(resource_provider.clone(), event.clone()),
        };
        operations.insert(operation);
    }

    if operations.is_empty() {
        return Err(PolicyParseError::EmptyEvents {
            blob: ctx.blob_name.to_string(),
            policy: ctx.policy_name.to_string(),
        });
    }

    Ok(PolicyMode::Event { operations })
}

// ============================================================================
// Loader
// ============================================================================

/// Result of loading one document
#[derive(Debug, Default)]
pub struct LoadedDocument {
    pub policies: Vec<Policy>,
    /// Policies that were dropped; the rest of the document still loaded
    pub errors: Vec<PolicyParseError>,
    /// Names of policies whose mode is not handled by the host
    pub skipped: Vec<String>,
}

#[derive(Clone)]
pub struct PolicyLoader {
    aliases: Arc<OperationAliasTable>,
    modes: ModeRegistry,
}

impl PolicyLoader {
    pub fn new(aliases: Arc<OperationAliasTable>) -> Self {
        Self {
            aliases,
            modes: ModeRegistry::default(),
        }
    }

    pub fn with_modes(mut self, modes: ModeRegistry) -> Self {
        self.modes = modes;
        self
    }

    pub fn aliases(&self) -> &OperationAliasTable {
        &self.aliases
    }

    pub fn load_bytes(
        &self,
        blob_name: &str,
        source_path: &Path,
        content: &[u8],
    ) -> Result<LoadedDocument, PolicyParseError> {
        let text = std::str::from_utf8(content).map_err(|_| PolicyParseError::Utf8 {
            blob: blob_name.to_string(),
        })?;
        self.load_str(blob_name, source_path, text)
    }

    /// Parse one document.
    ///
    /// Whole-document problems are returned as `Err`; problems with a single
    /// policy are collected in [`LoadedDocument::errors`].
    pub fn load_str(
        &self,
        blob_name: &str,
        source_path: &Path,
        content: &str,
    ) -> Result<LoadedDocument, PolicyParseError> {
        let root: serde_yaml::Value =
            serde_yaml::from_str(content).map_err(|e| PolicyParseError::Yaml {
                blob: blob_name.to_string(),
                error: e.to_string(),
            })?;

        let entries = root
            .get("policies")
            .and_then(serde_yaml::Value::as_sequence)
            .ok_or_else(|| PolicyParseError::MissingPolicies {
                blob: blob_name.to_string(),
            })?;

        let mut loaded = LoadedDocument::default();
        let mut seen = HashSet::new();

        for (index, raw) in entries.iter().enumerate() {
            match self.load_policy(blob_name, source_path, index, raw) {
                Ok(Some(policy)) => {
                    if !seen.insert(policy.name.clone()) {
                        loaded.errors.push(PolicyParseError::DuplicateName {
                            blob: blob_name.to_string(),
                            name: policy.name,
                        });
                        continue;
                    }
                    loaded.policies.push(policy);
                }
                Ok(None) => {
                    let name = raw
                        .get("name")
                        .and_then(serde_yaml::Value::as_str)
                        .unwrap_or("<unnamed>")
                        .to_string();
                    debug!(blob = blob_name, policy = %name, "Skipping policy with non-container mode");
                    loaded.skipped.push(name);
                }
                Err(e) => loaded.errors.push(e),
            }
        }

        Ok(loaded)
    }

    /// Parse a document from disk, naming it after its file name
    pub fn load_file(&self, path: &Path) -> Result<LoadedDocument, PolicyParseError> {
        let content = std::fs::read(path).map_err(|e| PolicyParseError::Io {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let blob_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.load_bytes(&blob_name, path, &content)
    }

    fn load_policy(
        &self,
        blob_name: &str,
        source_path: &Path,
        index: usize,
        raw: &serde_yaml::Value,
    ) -> Result<Option<Policy>, PolicyParseError> {
        let invalid = |reason: String| PolicyParseError::InvalidPolicy {
            blob: blob_name.to_string(),
            index,
            reason,
        };

        let parsed: PolicyYaml =
            serde_yaml::from_value(raw.clone()).map_err(|e| invalid(e.to_string()))?;

        let name = parsed
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| invalid("missing `name`".to_string()))?;
        let mode = parsed
            .mode
            .ok_or_else(|| invalid(format!("policy '{}' has no `mode`", name)))?;

        let Some(parser) = self.modes.get(&mode.mode_type) else {
            return Ok(None);
        };

        let resource = parsed
            .resource
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| invalid(format!("policy '{}' has no `resource`", name)))?;

        let ctx = ModeContext {
            blob_name,
            policy_name: &name,
            aliases: &self.aliases,
        };
        let mode = parser(&ctx, &mode)?;

        let document = serde_json::to_value(raw).map_err(|e| invalid(e.to_string()))?;

        Ok(Some(Policy {
            name,
            resource,
            mode,
            blob_name: blob_name.to_string(),
            source_path: source_path.to_path_buf(),
            document,
        }))
    }
}

/// Built-in alias table, optionally overlaid with a user-supplied file
pub fn load_alias_table(overrides: Option<&Path>) -> Result<OperationAliasTable, AliasTableError> {
    let mut table = builtin_aliases();
    if let Some(path) = overrides {
        table.extend(OperationAliasTable::from_file(path)?);
    }
    Ok(table)
}

/// The alias table compiled into the binary
pub fn builtin_aliases() -> OperationAliasTable {
    match OperationAliasTable::from_yaml(BUILTIN_ALIASES) {
        Ok(table) => table,
        Err(e) => {
            error!(error = %e, "Built-in operation alias table is invalid");
            OperationAliasTable::new()
        }
    }
}

/// Characters escaped out of blob names so every scratch copy is a plain
/// file directly under the scratch root
const SCRATCH_NAME: &AsciiSet = &CONTROLS.add(b'%').add(b'/').add(b'\\').add(b':');

/// Flat scratch location for `blob_name`.
///
/// Blob namespaces are flat, so `a.yml` and `a.yml/x.yml` may coexist; both
/// map to sibling files (`a.yml`, `a.yml%2Fx.yml`).
pub fn scratch_path(root: &Path, blob_name: &str) -> Result<PathBuf, PolicyParseError> {
    if matches!(blob_name, "" | "." | "..") {
        return Err(PolicyParseError::UnsafeBlobName(blob_name.to_string()));
    }
    let file_name = utf8_percent_encode(blob_name, SCRATCH_NAME).to_string();
    Ok(root.join(file_name))
}
