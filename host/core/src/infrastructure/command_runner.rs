// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command Policy Runner
//!
//! Runs a policy by invoking the policy CLI on the blob's scratch copy:
//!
//! ```text
//! {command} run -s {output_dir} [-l {log_group}] [-m {metrics}] -p {policy} {source_path}
//! ```
//!
//! For event dispatches the triggering event is passed as JSON in
//! `POLICY_HOST_EVENT`, and its id in `POLICY_HOST_EVENT_ID`.

use crate::domain::config::RunOptions;
use crate::domain::event::Event;
use crate::domain::policy::Policy;
use crate::domain::runner::{PolicyRunner, RunnerError};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub const ENV_EVENT: &str = "POLICY_HOST_EVENT";
pub const ENV_EVENT_ID: &str = "POLICY_HOST_EVENT_ID";

/// Keep this much of the runner's stderr in error reports
const STDERR_TAIL_BYTES: usize = 2048;

/// Applied until [`CommandPolicyRunner::with_timeout`] picks another bound
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(3600);

pub struct CommandPolicyRunner {
    command: String,
    options: RunOptions,
    timeout: Duration,
}

impl CommandPolicyRunner {
    pub fn new(command: impl Into<String>, options: RunOptions) -> Self {
        Self {
            command: command.into(),
            options,
            timeout: DEFAULT_RUN_TIMEOUT,
        }
    }

    /// The child is killed once a run exceeds `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments for one invocation
    pub fn arguments(&self, policy: &Policy) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-s".to_string(),
            self.options.output_dir.display().to_string(),
        ];
        if let Some(log_group) = &self.options.log_group {
            args.push("-l".to_string());
            args.push(log_group.clone());
        }
        if let Some(metrics) = &self.options.metrics {
            args.push("-m".to_string());
            args.push(metrics.clone());
        }
        args.push("-p".to_string());
        args.push(policy.name.clone());
        args.push(policy.source_path.display().to_string());
        args
    }
}

#[async_trait]
impl PolicyRunner for CommandPolicyRunner {
    async fn run(&self, policy: &Policy, event: Option<&Event>) -> Result<(), RunnerError> {
        let mut command = Command::new(&self.command);
        command
            .args(self.arguments(policy))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(event) = event {
            let payload =
                serde_json::to_string(event).map_err(|e| RunnerError::IoError(e.to_string()))?;
            command.env(ENV_EVENT, payload).env(ENV_EVENT_ID, &event.event_id);
        }

        debug!(policy = %policy.name, command = %self.command, "Spawning policy runner");
        let child = command
            .spawn()
            .map_err(|e| RunnerError::Spawn(format!("{}: {}", self.command, e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| RunnerError::Timeout {
                policy: policy.name.clone(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| RunnerError::IoError(e.to_string()))?;

        if output.status.success() {
            return Ok(());
        }

        Err(RunnerError::Failed {
            policy: policy.name.clone(),
            code: output.status.code(),
            stderr: stderr_tail(&output.stderr),
        })
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}
