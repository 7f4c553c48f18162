// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Container Host
//!
//! Owns configuration, the scheduler, the policy cache and the queue poller.
//! [`Host::run`] installs the two recurring jobs and blocks until the
//! shutdown token fires.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Composition root for the core services

use crate::application::jobs::{PollQueueJob, ReconcileJob};
use crate::application::policy_cache::PolicyCache;
use crate::application::queue_poller::QueuePoller;
use crate::application::scheduler::{JobOptions, Scheduler, SchedulerError, Trigger};
use crate::domain::config::{ConfigError, HostConfig};
use crate::domain::policy::{AliasTableError, OperationAliasTable};
use crate::domain::queue::{EventQueue, QueueError};
use crate::domain::runner::PolicyRunner;
use crate::domain::storage::{BlobStore, StorageError};
use crate::domain::subscription::{EventGridError, EventSubscription};
use crate::infrastructure::policy_loader::{PolicyLoader, PolicyParseError};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const RECONCILE_JOB_ID: &str = "update_policies";
pub const POLL_JOB_ID: &str = "poll_queue";

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transient storage error: {0}")]
    TransientStorage(#[from] StorageError),

    #[error("Transient queue error: {0}")]
    TransientQueue(#[from] QueueError),

    #[error("Transient event grid error: {0}")]
    TransientEventGrid(#[from] EventGridError),

    #[error("Policy parse error: {0}")]
    Parse(#[from] PolicyParseError),

    #[error("Operation alias table error: {0}")]
    AliasTable(#[from] AliasTableError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl HostError {
    /// Retried on the next tick rather than surfaced
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HostError::TransientStorage(_)
                | HostError::TransientQueue(_)
                | HostError::TransientEventGrid(_)
        )
    }
}

/// External collaborators the host is built from
pub struct HostComponents {
    pub blob_store: Arc<dyn BlobStore>,
    pub queue: Arc<dyn EventQueue>,
    pub subscription: Arc<dyn EventSubscription>,
    pub runner: Arc<dyn PolicyRunner>,
    pub aliases: OperationAliasTable,
}

pub struct Host {
    config: HostConfig,
    scheduler: Scheduler,
    cache: Arc<PolicyCache>,
    poller: Arc<QueuePoller>,
    scratch: TempDir,
}

impl Host {
    pub fn new(config: HostConfig, components: HostComponents) -> Result<Self, HostError> {
        let scratch = tempfile::Builder::new()
            .prefix("policy-cache-")
            .tempdir()
            .map_err(|source| HostError::Io {
                context: "failed to create policy cache directory".to_string(),
                source,
            })?;

        let scheduler = Scheduler::new();
        let loader = PolicyLoader::new(Arc::new(components.aliases));

        let cache = Arc::new(PolicyCache::new(
            components.blob_store,
            components.subscription,
            loader,
            scheduler.clone(),
            components.runner.clone(),
            scratch.path().to_path_buf(),
        ));

        let poller = Arc::new(QueuePoller::new(
            components.queue,
            cache.clone(),
            scheduler.clone(),
            components.runner,
            config.poison_threshold,
            config.max_batch_size,
        ));

        Ok(Self {
            config,
            scheduler,
            cache,
            poller,
            scratch,
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn cache(&self) -> &Arc<PolicyCache> {
        &self.cache
    }

    pub fn poller(&self) -> &Arc<QueuePoller> {
        &self.poller
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Install `update_policies` and `poll_queue`; both fire immediately
    pub fn install_jobs(&self) -> Result<(), HostError> {
        let reconcile = Trigger::interval(self.config.reconcile_interval).immediately();
        self.scheduler.add_recurring(
            RECONCILE_JOB_ID,
            reconcile,
            Arc::new(ReconcileJob::new(self.cache.clone())),
            JobOptions::default().with_misfire_grace(self.config.reconcile_interval),
        )?;

        let poll = Trigger::interval(self.config.poll_interval).immediately();
        self.scheduler.add_recurring(
            POLL_JOB_ID,
            poll,
            Arc::new(PollQueueJob::new(self.poller.clone())),
            JobOptions::default().with_misfire_grace(self.config.poll_interval),
        )?;

        Ok(())
    }

    /// Run until `shutdown` is cancelled, then delete the scratch directory
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), HostError> {
        self.install_jobs()?;
        info!(
            policy_storage = %self.config.policy_storage,
            queue = %self.config.queue_name,
            scratch_dir = %self.scratch.path().display(),
            "Policy host started"
        );

        let scheduler = self.scheduler.clone();
        let watcher = tokio::spawn(async move {
            shutdown.cancelled().await;
            info!("Shutdown requested, stopping scheduler");
            scheduler.stop();
        });

        self.scheduler.run().await;
        watcher.abort();

        let scratch_path = self.scratch.path().to_path_buf();
        drop(self.poller);
        drop(self.cache);
        if let Err(e) = self.scratch.close() {
            warn!(path = %scratch_path.display(), error = %e, "Failed to delete policy cache directory");
        }

        info!("Policy host stopped");
        Ok(())
    }
}
