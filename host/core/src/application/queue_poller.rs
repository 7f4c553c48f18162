// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Queue Poller
//!
//! Drains the event queue in one round. Each message is either
//!
//! - **poisoned** (`dequeue_count >= poison_threshold`): deleted, never dispatched
//! - **malformed** (body does not decode): left on the queue so it comes
//!   back with a higher dequeue count and is eventually poisoned
//! - **dispatched**: one one-shot job per matching policy, id
//!   `policy_name || event_id`, then deleted. Policy names are scoped to
//!   their blob; when two matched blobs declare the same name, those ids
//!   become `blob_name/policy_name || event_id`
//!
//! A redelivered event whose one-shot is still queued is suppressed by the
//! scheduler's duplicate-id check.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Competing-consumer dispatch of audit events

use crate::application::event_matcher::EventMatcher;
use crate::application::host::HostError;
use crate::application::jobs::RunPolicyJob;
use crate::application::metrics;
use crate::application::policy_cache::PolicyCache;
use crate::application::scheduler::{JobOptions, Scheduler, SchedulerError};
use crate::domain::event::{Event, QueueMessage};
use crate::domain::policy::Policy;
use crate::domain::queue::EventQueue;
use crate::domain::runner::PolicyRunner;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How late a queued event dispatch may start before it is dropped
pub const EVENT_MISFIRE_GRACE: Duration = Duration::from_secs(5 * 60);

/// One-shot job id for running `policy` against `event`
pub fn dispatch_job_id(policy: &Policy, event: &Event) -> String {
    format!("{}{}", policy.name, event.event_id)
}

/// Job id for a policy whose name is also used by another matched blob
pub fn qualified_dispatch_job_id(policy: &Policy, event: &Event) -> String {
    format!("{}/{}{}", policy.blob_name, policy.name, event.event_id)
}

/// Dispatch ids for every matched policy, distinct per `(blob, policy)`.
///
/// Stable across redeliveries as long as the matched set is unchanged.
pub fn dispatch_job_ids(matched: &[Arc<Policy>], event: &Event) -> Vec<String> {
    let mut blobs_per_name: HashMap<&str, usize> = HashMap::new();
    for policy in matched {
        *blobs_per_name.entry(policy.name.as_str()).or_default() += 1;
    }
    matched
        .iter()
        .map(|policy| {
            if blobs_per_name[policy.name.as_str()] > 1 {
                qualified_dispatch_job_id(policy, event)
            } else {
                dispatch_job_id(policy, event)
            }
        })
        .collect()
}

/// Counters for one poll round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub batches: usize,
    pub received: usize,
    /// One-shot submissions (matched policy × message)
    pub dispatched: usize,
    /// Submissions the scheduler accepted
    pub scheduled: usize,
    /// Submissions rejected because the same job was already queued
    pub duplicates: usize,
    pub poisoned: usize,
    pub malformed: usize,
}

pub struct QueuePoller {
    queue: Arc<dyn EventQueue>,
    cache: Arc<PolicyCache>,
    scheduler: Scheduler,
    runner: Arc<dyn PolicyRunner>,
    poison_threshold: u32,
    max_batch_size: usize,
}

impl QueuePoller {
    pub fn new(
        queue: Arc<dyn EventQueue>,
        cache: Arc<PolicyCache>,
        scheduler: Scheduler,
        runner: Arc<dyn PolicyRunner>,
        poison_threshold: u32,
        max_batch_size: usize,
    ) -> Self {
        Self {
            queue,
            cache,
            scheduler,
            runner,
            poison_threshold,
            max_batch_size: max_batch_size.max(1),
        }
    }

    /// Drain the queue until it reports empty.
    ///
    /// When `cancel` fires, the batch in hand is finished and acknowledged
    /// and no further batch is requested.
    pub async fn poll(&self, cancel: &CancellationToken) -> Result<PollReport, HostError> {
        let mut report = PollReport::default();

        loop {
            let batch = self.queue.receive(self.max_batch_size).await?;
            if batch.is_empty() {
                break;
            }
            report.batches += 1;
            report.received += batch.len();
            debug!(messages = batch.len(), "Received queue batch");

            for message in &batch {
                self.handle_message(message, &mut report).await;
            }

            if cancel.is_cancelled() {
                info!("Shutdown requested, not fetching further queue batches");
                break;
            }
        }

        if report.received > 0 {
            info!(
                received = report.received,
                scheduled = report.scheduled,
                duplicates = report.duplicates,
                poisoned = report.poisoned,
                malformed = report.malformed,
                "Queue drained"
            );
        }
        Ok(report)
    }

    async fn handle_message(&self, message: &QueueMessage, report: &mut PollReport) {
        let message_id = message.handle.message_id.as_str();

        if message.dequeue_count >= self.poison_threshold {
            warn!(
                message_id,
                dequeue_count = message.dequeue_count,
                threshold = self.poison_threshold,
                "Dropping poison message"
            );
            report.poisoned += 1;
            metrics::record_message("poison");
            self.acknowledge(message).await;
            return;
        }

        let event = match Event::decode(message) {
            Ok(event) => Arc::new(event),
            Err(e) => {
                error!(message_id, dequeue_count = message.dequeue_count, error = %e, "Malformed queue message");
                report.malformed += 1;
                metrics::record_message("malformed");
                return;
            }
        };

        let snapshot = self.cache.snapshot();
        let matched = EventMatcher::select(&event, &snapshot);
        debug!(
            event_id = %event.event_id,
            operation = %event.data.operation_name,
            dequeue_count = event.dequeue_count,
            matched = matched.len(),
            "Event received"
        );

        let job_ids = dispatch_job_ids(&matched, &event);
        for (policy, job_id) in matched.into_iter().zip(job_ids) {
            report.dispatched += 1;
            let options = JobOptions::default()
                .with_misfire_grace(EVENT_MISFIRE_GRACE)
                .in_group(policy.blob_name.clone());
            let action = Arc::new(RunPolicyJob::for_event(
                self.runner.clone(),
                policy.clone(),
                event.clone(),
            ));

            match self.scheduler.add_one_shot(job_id.clone(), action, options) {
                Ok(()) => {
                    report.scheduled += 1;
                    metrics::record_dispatch("scheduled");
                    debug!(job_id = %job_id, policy = %policy.name, event_id = %event.event_id, "Policy dispatch queued");
                }
                Err(SchedulerError::DuplicateJob(_)) => {
                    report.duplicates += 1;
                    metrics::record_dispatch("duplicate");
                    debug!(job_id = %job_id, "Policy dispatch already queued");
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Failed to queue policy dispatch");
                }
            }
        }

        metrics::record_message("dispatched");
        self.acknowledge(message).await;
    }

    async fn acknowledge(&self, message: &QueueMessage) {
        if let Err(e) = self.queue.delete(&message.handle).await {
            warn!(message_id = %message.handle.message_id, error = %e, "Failed to delete queue message");
        }
    }
}
