// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cooperative Job Scheduler
//!
//! Single worker that runs recurring and one-shot jobs one at a time.
//!
//! - Recurring jobs are keyed by id; adding an id that exists replaces it.
//! - One-shot jobs are rejected with [`SchedulerError::DuplicateJob`] while a
//!   job with the same id is still queued. Event dispatch relies on this to
//!   suppress redelivered messages.
//! - A recurring job never overlaps itself: its next fire is computed only
//!   after the current run returns, so fires missed during a long run are
//!   coalesced into one.
//! - A fire that is later than its misfire grace when the worker reaches it
//!   is dropped.
//! - Fires due at the same instant run in installation order.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements the host's only execution context

use crate::domain::schedule::CronExpression;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Grace applied when a caller does not pick one
pub const DEFAULT_MISFIRE_GRACE: Duration = Duration::from_secs(1);

/// Upper bound on how long the worker sleeps with an empty queue
const IDLE_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("job '{0}' is already queued")]
    DuplicateJob(String),

    #[error("job '{0}' has no future fire time")]
    NoFutureFire(String),

    #[error("scheduler has been stopped")]
    Stopped,
}

/// Passed to every job run
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    /// Cancelled when the scheduler is stopping
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait JobAction: Send + Sync {
    async fn run(&self, ctx: JobContext);
}

/// When a recurring job fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Cron(CronExpression),
    Interval { every: Duration, immediate: bool },
}

impl Trigger {
    pub fn interval(every: Duration) -> Self {
        Trigger::Interval {
            every,
            immediate: false,
        }
    }

    /// For interval triggers, fire once as soon as the job is installed
    pub fn immediately(self) -> Self {
        match self {
            Trigger::Interval { every, .. } => Trigger::Interval {
                every,
                immediate: true,
            },
            cron => cron,
        }
    }

    fn first_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval {
                immediate: true, ..
            } => Some(now),
            _ => self.next_fire(now),
        }
    }

    fn next_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron(expr) => expr.next_after(now),
            Trigger::Interval { every, .. } => chrono::Duration::from_std(*every)
                .ok()
                .and_then(|d| now.checked_add_signed(d)),
        }
    }

    /// Spacing between consecutive fires
    pub fn period(&self) -> Option<Duration> {
        match self {
            Trigger::Cron(expr) => expr.period_after(Utc::now()),
            Trigger::Interval { every, .. } => Some(*every),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub misfire_grace: Option<Duration>,
    /// Owner tag; see [`Scheduler::remove_group`]
    pub group: Option<String>,
}

impl JobOptions {
    pub fn with_misfire_grace(mut self, grace: Duration) -> Self {
        self.misfire_grace = Some(grace);
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Recurring,
    OneShot,
}

/// Read-only view of a queued job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: String,
    pub kind: JobKind,
    pub next_fire: DateTime<Utc>,
    pub misfire_grace: Duration,
    pub group: Option<String>,
}

struct JobEntry {
    trigger: Option<Trigger>,
    action: Arc<dyn JobAction>,
    misfire_grace: Duration,
    next_fire: DateTime<Utc>,
    /// Monotonic twin of `next_fire`, used for sleeping
    deadline: Instant,
    group: Option<String>,
    seq: u64,
}

impl JobEntry {
    fn reschedule(&mut self, next_fire: DateTime<Utc>) {
        self.next_fire = next_fire;
        self.deadline = deadline_for(next_fire);
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_fire <= now || self.deadline <= Instant::now()
    }

    fn kind(&self) -> JobKind {
        if self.trigger.is_some() {
            JobKind::Recurring
        } else {
            JobKind::OneShot
        }
    }
}

#[derive(Default)]
struct SchedulerState {
    jobs: HashMap<String, JobEntry>,
    next_seq: u64,
    revision: u64,
    stopped: bool,
}

impl SchedulerState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

struct DueJob {
    id: String,
    seq: u64,
    action: Arc<dyn JobAction>,
    recurring: bool,
}

struct SchedulerInner {
    state: Mutex<SchedulerState>,
    wakeup: Notify,
    cancel: CancellationToken,
}

/// Cheap-to-clone handle to the scheduler
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Scheduler that stops when `cancel` fires
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(SchedulerState::default()),
                wakeup: Notify::new(),
                cancel,
            }),
        }
    }

    /// Install or replace a recurring job
    pub fn add_recurring(
        &self,
        id: impl Into<String>,
        trigger: Trigger,
        action: Arc<dyn JobAction>,
        options: JobOptions,
    ) -> Result<(), SchedulerError> {
        let id = id.into();
        let now = Utc::now();
        let next_fire = trigger
            .first_fire(now)
            .ok_or_else(|| SchedulerError::NoFutureFire(id.clone()))?;

        {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return Err(SchedulerError::Stopped);
            }
            let seq = state.next_seq();
            let replaced = state.jobs.insert(
                id.clone(),
                JobEntry {
                    trigger: Some(trigger),
                    action,
                    misfire_grace: options.misfire_grace.unwrap_or(DEFAULT_MISFIRE_GRACE),
                    next_fire,
                    deadline: deadline_for(next_fire),
                    group: options.group,
                    seq,
                },
            );
            state.revision += 1;
            debug!(job_id = %id, %next_fire, replaced = replaced.is_some(), "Recurring job installed");
        }

        self.inner.wakeup.notify_one();
        Ok(())
    }

    /// Queue a job that runs once, as soon as the worker is free
    pub fn add_one_shot(
        &self,
        id: impl Into<String>,
        action: Arc<dyn JobAction>,
        options: JobOptions,
    ) -> Result<(), SchedulerError> {
        let id = id.into();

        {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return Err(SchedulerError::Stopped);
            }
            if state.jobs.contains_key(&id) {
                return Err(SchedulerError::DuplicateJob(id));
            }
            let seq = state.next_seq();
            state.jobs.insert(
                id.clone(),
                JobEntry {
                    trigger: None,
                    action,
                    misfire_grace: options.misfire_grace.unwrap_or(DEFAULT_MISFIRE_GRACE),
                    next_fire: Utc::now(),
                    deadline: Instant::now(),
                    group: options.group,
                    seq,
                },
            );
            state.revision += 1;
            debug!(job_id = %id, "One-shot job queued");
        }

        self.inner.wakeup.notify_one();
        Ok(())
    }

    /// Remove a job; returns whether it existed
    pub fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            let removed = state.jobs.remove(id).is_some();
            if removed {
                state.revision += 1;
            }
            removed
        };

        if removed {
            debug!(job_id = %id, "Job removed");
            self.inner.wakeup.notify_one();
        }
        removed
    }

    /// Remove every job tagged with `group`; returns how many were removed
    pub fn remove_group(&self, group: &str) -> usize {
        let removed = {
            let mut state = self.inner.state.lock();
            let before = state.jobs.len();
            state
                .jobs
                .retain(|_, job| job.group.as_deref() != Some(group));
            let removed = before - state.jobs.len();
            if removed > 0 {
                state.revision += 1;
            }
            removed
        };

        if removed > 0 {
            debug!(group, removed, "Job group removed");
            self.inner.wakeup.notify_one();
        }
        removed
    }

    /// Queued jobs ordered by next fire time
    pub fn list(&self) -> Vec<JobInfo> {
        let state = self.inner.state.lock();
        let mut jobs: Vec<(u64, JobInfo)> = state
            .jobs
            .iter()
            .map(|(id, job)| {
                (
                    job.seq,
                    JobInfo {
                        id: id.clone(),
                        kind: job.kind(),
                        next_fire: job.next_fire,
                        misfire_grace: job.misfire_grace,
                        group: job.group.clone(),
                    },
                )
            })
            .collect();
        jobs.sort_by(|(a_seq, a), (b_seq, b)| {
            a.next_fire.cmp(&b.next_fire).then(a_seq.cmp(b_seq))
        });
        jobs.into_iter().map(|(_, info)| info).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.state.lock().jobs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Incremented on every add, replace or remove
    pub fn revision(&self) -> u64 {
        self.inner.state.lock().revision
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Spawn the worker on the current runtime
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run().await })
    }

    /// Ask the worker to stop after the job in flight returns
    pub fn stop(&self) {
        self.inner.cancel.cancel();
        self.inner.wakeup.notify_one();
    }

    /// Drive the worker until stopped. Jobs are dropped on exit.
    pub async fn run(&self) {
        info!("Scheduler started");
        let cancel = self.inner.cancel.clone();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let deadline = self
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + IDLE_WAIT);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.inner.wakeup.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => {}
            }

            self.run_due_jobs(Utc::now()).await;
        }

        let dropped = {
            let mut state = self.inner.state.lock();
            state.stopped = true;
            let dropped = state.jobs.len();
            state.jobs.clear();
            dropped
        };
        info!(dropped_jobs = dropped, "Scheduler stopped");
    }

    /// Run every job due at `now`, one after another; returns how many ran
    pub async fn run_due_jobs(&self, now: DateTime<Utc>) -> usize {
        let mut executed = 0;
        while let Some(due) = self.take_due(now) {
            self.execute(due).await;
            executed += 1;
            if self.inner.cancel.is_cancelled() {
                break;
            }
        }
        executed
    }

    fn next_deadline(&self) -> Option<Instant> {
        let state = self.inner.state.lock();
        state.jobs.values().map(|job| job.deadline).min()
    }

    fn take_due(&self, now: DateTime<Utc>) -> Option<DueJob> {
        let mut state = self.inner.state.lock();

        loop {
            let id = state
                .jobs
                .iter()
                .filter(|(_, job)| job.is_due(now))
                .min_by(|(_, a), (_, b)| a.next_fire.cmp(&b.next_fire).then(a.seq.cmp(&b.seq)))
                .map(|(id, _)| id.clone())?;

            let job = state.jobs.get_mut(&id)?;
            let lateness = (now - job.next_fire).to_std().unwrap_or(Duration::ZERO);

            if lateness > job.misfire_grace {
                warn!(
                    job_id = %id,
                    lateness_secs = lateness.as_secs(),
                    grace_secs = job.misfire_grace.as_secs(),
                    "Skipping misfired job"
                );
                let next = job.trigger.as_ref().and_then(|t| t.next_fire(now));
                match next {
                    Some(next_fire) => job.reschedule(next_fire),
                    None => {
                        state.jobs.remove(&id);
                    }
                }
                continue;
            }

            let due = DueJob {
                id: id.clone(),
                seq: job.seq,
                action: job.action.clone(),
                recurring: job.trigger.is_some(),
            };
            if !due.recurring {
                state.jobs.remove(&id);
            }
            return Some(due);
        }
    }

    async fn execute(&self, due: DueJob) {
        let ctx = JobContext {
            job_id: due.id.clone(),
            cancel: self.inner.cancel.clone(),
        };
        let action = due.action.clone();

        // A panicking job must not take the worker down with it
        if let Err(e) = tokio::spawn(async move { action.run(ctx).await }).await {
            error!(job_id = %due.id, error = %e, "Job panicked");
        }

        if due.recurring {
            let mut state = self.inner.state.lock();
            let Some(job) = state.jobs.get_mut(&due.id) else {
                return;
            };
            if job.seq != due.seq {
                // replaced while running
                return;
            }
            match job.trigger.as_ref().and_then(|t| t.next_fire(Utc::now())) {
                Some(next_fire) => job.reschedule(next_fire),
                None => {
                    state.jobs.remove(&due.id);
                }
            }
        }
    }
}

fn deadline_for(next_fire: DateTime<Utc>) -> Instant {
    Instant::now() + (next_fire - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}
