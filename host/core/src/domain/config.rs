// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Host Configuration - read once from the process environment at boot
//
// Required:
// - POLICY_STORAGE      URI of the blob container holding policies
// - EVENT_QUEUE_NAME    queue to poll
// - EVENT_QUEUE_ID      resource id of the storage account owning the queue
//
// Optional:
// - OUTPUT_DIR, LOG_GROUP, METRICS           runner options
// - POISON_THRESHOLD (3), RECONCILE_INTERVAL_SECONDS (60),
//   POLL_INTERVAL_SECONDS (30), MAX_BATCH_SIZE (16), POLICY_RUN_TIMEOUT_SECONDS (3600)
// - OPERATION_ALIASES_FILE, POLICY_RUNNER_COMMAND, AZURE_ACCESS_TOKEN
//
// Unknown variables are ignored.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const ENV_POLICY_STORAGE: &str = "POLICY_STORAGE";
pub const ENV_EVENT_QUEUE_NAME: &str = "EVENT_QUEUE_NAME";
pub const ENV_EVENT_QUEUE_ID: &str = "EVENT_QUEUE_ID";
pub const ENV_OUTPUT_DIR: &str = "OUTPUT_DIR";
pub const ENV_LOG_GROUP: &str = "LOG_GROUP";
pub const ENV_METRICS: &str = "METRICS";
pub const ENV_POISON_THRESHOLD: &str = "POISON_THRESHOLD";
pub const ENV_RECONCILE_INTERVAL: &str = "RECONCILE_INTERVAL_SECONDS";
pub const ENV_POLL_INTERVAL: &str = "POLL_INTERVAL_SECONDS";
pub const ENV_MAX_BATCH_SIZE: &str = "MAX_BATCH_SIZE";
pub const ENV_OPERATION_ALIASES_FILE: &str = "OPERATION_ALIASES_FILE";
pub const ENV_POLICY_RUNNER_COMMAND: &str = "POLICY_RUNNER_COMMAND";
pub const ENV_POLICY_RUN_TIMEOUT: &str = "POLICY_RUN_TIMEOUT_SECONDS";
pub const ENV_AZURE_ACCESS_TOKEN: &str = "AZURE_ACCESS_TOKEN";

pub const DEFAULT_POISON_THRESHOLD: u32 = 3;
pub const DEFAULT_RECONCILE_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 16;
pub const DEFAULT_RUNNER_COMMAND: &str = "custodian";
pub const DEFAULT_POLICY_RUN_TIMEOUT_SECONDS: u64 = 3600;

/// Queue Storage refuses to hand out more than 32 messages per request
pub const MAX_BATCH_SIZE_LIMIT: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("failed to prepare {what}: {error}")]
    Io { what: String, error: String },
}

/// Parsed `/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.Storage/storageAccounts/{name}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageAccountId {
    pub resource_id: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub account_name: String,
}

impl StorageAccountId {
    pub fn parse(resource_id: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            key: ENV_EVENT_QUEUE_ID.to_string(),
            value: resource_id.to_string(),
            reason: reason.to_string(),
        };

        let segments: Vec<&str> = resource_id
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let value_after = |key: &str| {
            segments
                .iter()
                .position(|s| s.eq_ignore_ascii_case(key))
                .and_then(|i| segments.get(i + 1))
                .map(|s| s.to_string())
        };

        let subscription_id =
            value_after("subscriptions").ok_or_else(|| invalid("no subscription segment"))?;
        let resource_group =
            value_after("resourceGroups").ok_or_else(|| invalid("no resource group segment"))?;
        let account_name =
            value_after("storageAccounts").ok_or_else(|| invalid("not a storage account id"))?;

        Ok(Self {
            resource_id: format!("/{}", segments.join("/")),
            subscription_id,
            resource_group,
            account_name,
        })
    }
}

/// Options forwarded to the policy runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Artifact directory
    pub output_dir: PathBuf,
    /// Log sink identifier
    pub log_group: Option<String>,
    /// Metrics destination
    pub metrics: Option<String>,
}

impl RunOptions {
    /// Read `OUTPUT_DIR`, `LOG_GROUP` and `METRICS`.
    ///
    /// A missing `OUTPUT_DIR` is replaced with a freshly created temporary
    /// directory that outlives the process.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let output_dir = match non_empty(&lookup, ENV_OUTPUT_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => create_output_dir()?,
        };

        Ok(Self {
            output_dir,
            log_group: non_empty(&lookup, ENV_LOG_GROUP),
            metrics: non_empty(&lookup, ENV_METRICS),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

fn create_output_dir() -> Result<PathBuf, ConfigError> {
    tempfile::Builder::new()
        .prefix("policy-host-output-")
        .tempdir()
        .map(|dir| dir.keep())
        .map_err(|e| ConfigError::Io {
            what: "output directory".to_string(),
            error: e.to_string(),
        })
}

/// Complete host configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub policy_storage: String,
    pub queue_name: String,
    pub queue_storage: StorageAccountId,
    pub output_dir: Option<PathBuf>,
    pub log_group: Option<String>,
    pub metrics: Option<String>,
    pub poison_threshold: u32,
    pub reconcile_interval: Duration,
    pub poll_interval: Duration,
    pub max_batch_size: usize,
    pub aliases_file: Option<PathBuf>,
    pub runner_command: String,
    /// Upper bound on a single policy run
    pub run_timeout: Duration,
    pub access_token: Option<String>,
}

impl HostConfig {
    /// Build the configuration from a key lookup.
    ///
    /// All missing required keys are reported together.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = [ENV_POLICY_STORAGE, ENV_EVENT_QUEUE_NAME, ENV_EVENT_QUEUE_ID];
        let missing: Vec<String> = required
            .iter()
            .filter(|key| non_empty(&lookup, key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let policy_storage = non_empty(&lookup, ENV_POLICY_STORAGE).unwrap_or_default();
        let queue_name = non_empty(&lookup, ENV_EVENT_QUEUE_NAME).unwrap_or_default();
        let queue_storage =
            StorageAccountId::parse(&non_empty(&lookup, ENV_EVENT_QUEUE_ID).unwrap_or_default())?;

        let poison_threshold: u32 =
            parse_or(&lookup, ENV_POISON_THRESHOLD, DEFAULT_POISON_THRESHOLD)?;
        if poison_threshold == 0 {
            return Err(invalid(ENV_POISON_THRESHOLD, "0", "must be at least 1"));
        }

        let reconcile_secs: u64 = parse_or(
            &lookup,
            ENV_RECONCILE_INTERVAL,
            DEFAULT_RECONCILE_INTERVAL_SECONDS,
        )?;
        if reconcile_secs == 0 {
            return Err(invalid(ENV_RECONCILE_INTERVAL, "0", "must be at least 1"));
        }

        let poll_secs: u64 = parse_or(&lookup, ENV_POLL_INTERVAL, DEFAULT_POLL_INTERVAL_SECONDS)?;
        if poll_secs == 0 {
            return Err(invalid(ENV_POLL_INTERVAL, "0", "must be at least 1"));
        }

        let max_batch_size: usize = parse_or(&lookup, ENV_MAX_BATCH_SIZE, DEFAULT_MAX_BATCH_SIZE)?;
        if max_batch_size == 0 || max_batch_size > MAX_BATCH_SIZE_LIMIT {
            return Err(invalid(
                ENV_MAX_BATCH_SIZE,
                &max_batch_size.to_string(),
                "must be between 1 and 32",
            ));
        }

        let run_timeout_secs: u64 = parse_or(
            &lookup,
            ENV_POLICY_RUN_TIMEOUT,
            DEFAULT_POLICY_RUN_TIMEOUT_SECONDS,
        )?;
        if run_timeout_secs == 0 {
            return Err(invalid(ENV_POLICY_RUN_TIMEOUT, "0", "must be at least 1"));
        }

        Ok(Self {
            policy_storage,
            queue_name,
            queue_storage,
            output_dir: non_empty(&lookup, ENV_OUTPUT_DIR).map(PathBuf::from),
            log_group: non_empty(&lookup, ENV_LOG_GROUP),
            metrics: non_empty(&lookup, ENV_METRICS),
            poison_threshold,
            reconcile_interval: Duration::from_secs(reconcile_secs),
            poll_interval: Duration::from_secs(poll_secs),
            max_batch_size,
            aliases_file: non_empty(&lookup, ENV_OPERATION_ALIASES_FILE).map(PathBuf::from),
            runner_command: non_empty(&lookup, ENV_POLICY_RUNNER_COMMAND)
                .unwrap_or_else(|| DEFAULT_RUNNER_COMMAND.to_string()),
            run_timeout: Duration::from_secs(run_timeout_secs),
            access_token: non_empty(&lookup, ENV_AZURE_ACCESS_TOKEN),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Runner options, creating the default output directory when needed
    pub fn run_options(&self) -> Result<RunOptions, ConfigError> {
        let output_dir = match &self.output_dir {
            Some(dir) => dir.clone(),
            None => create_output_dir()?,
        };

        Ok(RunOptions {
            output_dir,
            log_group: self.log_group.clone(),
            metrics: self.metrics.clone(),
        })
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup, key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| invalid(key, &raw, &e.to_string())),
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const ACCOUNT_ID: &str =
        "/subscriptions/0000-1111/resourceGroups/policy-rg/providers/Microsoft.Storage/storageAccounts/policyevents";

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            (ENV_POLICY_STORAGE, "https://acct.blob.core.windows.net/policies"),
            (ENV_EVENT_QUEUE_NAME, "policy-events"),
            (ENV_EVENT_QUEUE_ID, ACCOUNT_ID),
        ]
    }

    #[test]
    fn test_defaults_applied() {
        let config = HostConfig::from_lookup(lookup(&required())).unwrap();

        assert_eq!(config.poison_threshold, 3);
        assert_eq!(config.reconcile_interval, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.max_batch_size, 16);
        assert_eq!(config.runner_command, "custodian");
        assert_eq!(config.run_timeout, Duration::from_secs(3600));
        assert_eq!(config.queue_storage.account_name, "policyevents");
        assert_eq!(config.queue_storage.subscription_id, "0000-1111");
        assert!(config.output_dir.is_none());
    }

    #[test]
    fn test_all_missing_keys_reported() {
        let err = HostConfig::from_lookup(lookup(&[(ENV_EVENT_QUEUE_NAME, "q")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing(vec![
                ENV_POLICY_STORAGE.to_string(),
                ENV_EVENT_QUEUE_ID.to_string()
            ])
        );
        assert_eq!(
            err.to_string(),
            "missing required environment variables: POLICY_STORAGE, EVENT_QUEUE_ID"
        );
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut vars = required();
        vars[1] = (ENV_EVENT_QUEUE_NAME, "   ");
        let err = HostConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert_eq!(err, ConfigError::Missing(vec![ENV_EVENT_QUEUE_NAME.to_string()]));
    }

    #[test]
    fn test_overrides_parsed() {
        let mut vars = required();
        vars.extend([
            (ENV_POISON_THRESHOLD, "5"),
            (ENV_RECONCILE_INTERVAL, "120"),
            (ENV_POLL_INTERVAL, "10"),
            (ENV_MAX_BATCH_SIZE, "32"),
            (ENV_POLICY_RUN_TIMEOUT, "900"),
            (ENV_LOG_GROUP, "policy-logs"),
            (ENV_OUTPUT_DIR, "/var/lib/policy-host/out"),
            ("UNRELATED_VARIABLE", "ignored"),
        ]);
        let config = HostConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.poison_threshold, 5);
        assert_eq!(config.reconcile_interval, Duration::from_secs(120));
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.max_batch_size, 32);
        assert_eq!(config.run_timeout, Duration::from_secs(900));
        assert_eq!(config.log_group.as_deref(), Some("policy-logs"));

        let options = config.run_options().unwrap();
        assert_eq!(options.output_dir, PathBuf::from("/var/lib/policy-host/out"));
        assert!(options.metrics.is_none());
    }

    #[test]
    fn test_malformed_integer_rejected() {
        let mut vars = required();
        vars.push((ENV_POISON_THRESHOLD, "three"));
        let err = HostConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == ENV_POISON_THRESHOLD));
    }

    #[test]
    fn test_batch_size_bounds() {
        let mut vars = required();
        vars.push((ENV_MAX_BATCH_SIZE, "64"));
        assert!(HostConfig::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn test_zero_run_timeout_rejected() {
        let mut vars = required();
        vars.push((ENV_POLICY_RUN_TIMEOUT, "0"));
        let err = HostConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == ENV_POLICY_RUN_TIMEOUT));
    }

    #[test]
    fn test_queue_id_must_be_storage_account() {
        let mut vars = required();
        vars[2] = (ENV_EVENT_QUEUE_ID, "policyevents");
        let err = HostConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == ENV_EVENT_QUEUE_ID));
    }

    #[test]
    fn test_run_options_default_output_dir_is_created() {
        let options = RunOptions::from_lookup(lookup(&[(ENV_METRICS, "azure")])).unwrap();
        assert!(options.output_dir.is_dir());
        assert_eq!(options.metrics.as_deref(), Some("azure"));
        assert!(options.log_group.is_none());
        std::fs::remove_dir_all(&options.output_dir).unwrap();
    }
}
