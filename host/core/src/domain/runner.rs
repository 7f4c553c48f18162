// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Policy Runner Trait
//!
//! Filter evaluation and action execution are not the host's business; a
//! runner receives the policy and, for event-mode dispatches, the event
//! that triggered it. Failures are reported back but never retried here.

use crate::domain::event::Event;
use crate::domain::policy::Policy;
use async_trait::async_trait;
use thiserror::Error;

#[async_trait]
pub trait PolicyRunner: Send + Sync {
    async fn run(&self, policy: &Policy, event: Option<&Event>) -> Result<(), RunnerError>;
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to start policy runner: {0}")]
    Spawn(String),

    #[error("Policy '{policy}' failed (exit code {code:?}): {stderr}")]
    Failed {
        policy: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Policy '{policy}' timed out after {seconds}s")]
    Timeout { policy: String, seconds: u64 },

    #[error("Runner I/O error: {0}")]
    IoError(String),
}
