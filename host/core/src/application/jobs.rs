// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Scheduler job bodies

use crate::application::metrics;
use crate::application::policy_cache::PolicyCache;
use crate::application::queue_poller::QueuePoller;
use crate::domain::event::Event;
use crate::domain::policy::Policy;
use crate::domain::runner::PolicyRunner;
use crate::application::scheduler::{JobAction, JobContext};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Run one policy, optionally for the event that matched it.
///
/// Runner failures are logged and counted; nothing is retried. A run still
/// in flight when the scheduler stops is abandoned.
pub struct RunPolicyJob {
    runner: Arc<dyn PolicyRunner>,
    policy: Arc<Policy>,
    event: Option<Arc<Event>>,
}

impl RunPolicyJob {
    pub fn periodic(runner: Arc<dyn PolicyRunner>, policy: Arc<Policy>) -> Self {
        Self {
            runner,
            policy,
            event: None,
        }
    }

    pub fn for_event(runner: Arc<dyn PolicyRunner>, policy: Arc<Policy>, event: Arc<Event>) -> Self {
        Self {
            runner,
            policy,
            event: Some(event),
        }
    }
}

#[async_trait]
impl JobAction for RunPolicyJob {
    async fn run(&self, ctx: JobContext) {
        let event_id = self.event.as_ref().map(|e| e.event_id.as_str());
        debug!(
            job_id = %ctx.job_id,
            policy = %self.policy.name,
            blob = %self.policy.blob_name,
            event_id = ?event_id,
            "Running policy"
        );

        // Dropping the runner future on shutdown kills its child process
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                metrics::record_policy_run("cancelled");
                warn!(policy = %self.policy.name, event_id = ?event_id, "Policy run abandoned on shutdown");
                return;
            }
            result = self.runner.run(&self.policy, self.event.as_deref()) => result,
        };

        match result {
            Ok(()) => {
                metrics::record_policy_run("ok");
                info!(policy = %self.policy.name, event_id = ?event_id, "Policy run completed");
            }
            Err(e) => {
                metrics::record_policy_run("error");
                error!(
                    policy = %self.policy.name,
                    event_id = ?event_id,
                    error = %e,
                    "Policy run failed"
                );
            }
        }
    }
}

/// Recurring `update_policies` job
pub struct ReconcileJob {
    cache: Arc<PolicyCache>,
}

impl ReconcileJob {
    pub fn new(cache: Arc<PolicyCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl JobAction for ReconcileJob {
    async fn run(&self, _ctx: JobContext) {
        if let Err(e) = self.cache.reconcile().await {
            if e.is_transient() {
                warn!(error = %e, "Policy reconcile failed, retrying next tick");
            } else {
                error!(error = %e, "Policy reconcile failed");
            }
        }
    }
}

/// Recurring `poll_queue` job
pub struct PollQueueJob {
    poller: Arc<QueuePoller>,
}

impl PollQueueJob {
    pub fn new(poller: Arc<QueuePoller>) -> Self {
        Self { poller }
    }
}

#[async_trait]
impl JobAction for PollQueueJob {
    async fn run(&self, ctx: JobContext) {
        if let Err(e) = self.poller.poll(&ctx.cancel).await {
            warn!(error = %e, "Queue poll failed, retrying next tick");
        }
    }
}
