// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Policy Cache
//!
//! Keeps the in-memory policy set, the scheduler's periodic jobs and the
//! event-grid filter in step with the blob container.
//!
//! A reconcile run has two phases:
//!
//! 1. **Plan** (async): list the container, diff digests against the current
//!    snapshot, download and parse every added or changed blob. A transient
//!    storage failure here aborts the run before anything is touched.
//! 2. **Apply** (sync): uninstall removed and changed entries, write scratch
//!    copies, install periodic jobs, then swap the snapshot in one step.
//!
//! The event filter is synced afterwards with the union of all event-mode
//! operation strings.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Reconciliation between remote policy blobs and the live schedule

use crate::application::host::HostError;
use crate::application::jobs::RunPolicyJob;
use crate::application::metrics;
use crate::application::scheduler::{JobOptions, Scheduler, Trigger, DEFAULT_MISFIRE_GRACE};
use crate::domain::policy::{Policy, PolicyEntry, PolicyMode};
use crate::domain::runner::PolicyRunner;
use crate::domain::storage::BlobStore;
use crate::domain::subscription::{EventSubscription, SyncOutcome};
use crate::infrastructure::policy_loader::{scratch_path, LoadedDocument, PolicyLoader, PolicyParseError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Immutable view of the cache; readers hold it for as long as they like
#[derive(Debug, Default)]
pub struct PolicySnapshot {
    entries: BTreeMap<String, Arc<PolicyEntry>>,
}

impl PolicySnapshot {
    pub fn get(&self, blob_name: &str) -> Option<&Arc<PolicyEntry>> {
        self.entries.get(blob_name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<PolicyEntry>> {
        self.entries.values()
    }

    pub fn blob_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn policy_count(&self) -> usize {
        self.entries.values().map(|e| e.policies.len()).sum()
    }

    /// Every event-mode policy, in blob then policy-name order
    pub fn event_policies(&self) -> impl Iterator<Item = &Arc<Policy>> {
        self.entries.values().flat_map(|e| e.event_policies())
    }

    /// Union of operation strings across all event-mode policies
    pub fn operation_strings(&self) -> BTreeSet<String> {
        self.entries
            .values()
            .flat_map(|e| e.operation_strings())
            .collect()
    }

    /// blob name → content digest
    pub fn digests(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(name, e)| (name.clone(), e.content_digest.clone()))
            .collect()
    }
}

/// What one reconcile run changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: usize,
    /// Blobs that could not be loaded this run
    pub failed: Vec<String>,
    /// Whether the event filter matches the cache after this run
    pub subscription_synced: bool,
    /// Another reconcile was already running; nothing was done
    pub skipped: bool,
}

impl ReconcileReport {
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty())
    }
}

struct ReconcileGuard<'a>(&'a AtomicBool);

impl Drop for ReconcileGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A blob downloaded and parsed during the plan phase
struct PlannedBlob {
    name: String,
    digest: String,
    path: PathBuf,
    content: Vec<u8>,
    document: Result<LoadedDocument, PolicyParseError>,
}

pub struct PolicyCache {
    blob_store: Arc<dyn BlobStore>,
    subscription: Arc<dyn EventSubscription>,
    loader: PolicyLoader,
    scheduler: Scheduler,
    runner: Arc<dyn PolicyRunner>,
    scratch_dir: PathBuf,
    entries: Mutex<Arc<PolicySnapshot>>,
    /// Blobs whose current digest failed to parse
    rejected: Mutex<HashMap<String, String>>,
    last_synced: Mutex<Option<BTreeSet<String>>>,
    reconciling: AtomicBool,
}

impl PolicyCache {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        subscription: Arc<dyn EventSubscription>,
        loader: PolicyLoader,
        scheduler: Scheduler,
        runner: Arc<dyn PolicyRunner>,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            blob_store,
            subscription,
            loader,
            scheduler,
            runner,
            scratch_dir,
            entries: Mutex::new(Arc::new(PolicySnapshot::default())),
            rejected: Mutex::new(HashMap::new()),
            last_synced: Mutex::new(None),
            reconciling: AtomicBool::new(false),
        }
    }

    /// Current cache contents
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.entries.lock().clone()
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Bring the cache in line with the container.
    ///
    /// A call made while another is in progress returns immediately with
    /// [`ReconcileReport::skipped`] set.
    pub async fn reconcile(&self) -> Result<ReconcileReport, HostError> {
        if self.reconciling.swap(true, Ordering::AcqRel) {
            warn!("Reconcile already in progress, skipping");
            return Ok(ReconcileReport {
                skipped: true,
                ..Default::default()
            });
        }
        let _guard = ReconcileGuard(&self.reconciling);

        match self.reconcile_once().await {
            Ok(report) => {
                metrics::record_reconcile(if report.has_changes() { "changed" } else { "unchanged" });
                Ok(report)
            }
            Err(e) => {
                metrics::record_reconcile("error");
                Err(e)
            }
        }
    }

    async fn reconcile_once(&self) -> Result<ReconcileReport, HostError> {
        let listed: BTreeMap<String, String> = self
            .blob_store
            .list()
            .await?
            .into_iter()
            .filter(|b| is_policy_blob(&b.name))
            .map(|b| (b.name, b.content_digest))
            .collect();

        let current = self.snapshot();
        let mut report = ReconcileReport::default();

        // ---- plan ----
        let mut removed = Vec::new();
        let mut changed = BTreeSet::new();
        let mut kept = BTreeMap::new();
        for (name, entry) in &current.entries {
            match listed.get(name) {
                None => removed.push(entry.clone()),
                Some(digest) if *digest != entry.content_digest => {
                    changed.insert(name.clone());
                }
                Some(_) => {
                    kept.insert(name.clone(), entry.clone());
                }
            }
        }
        report.unchanged = kept.len();

        self.rejected
            .lock()
            .retain(|name, digest| listed.get(name) == Some(digest));

        let mut planned = Vec::new();
        for (name, digest) in &listed {
            if kept.contains_key(name) {
                continue;
            }
            let rejected = self.rejected.lock().get(name) == Some(digest);
            if rejected {
                debug!(blob = %name, digest = %digest, "Skipping previously rejected blob");
                report.failed.push(name.clone());
                continue;
            }
            planned.push(self.plan_blob(name, digest).await?);
        }

        // ---- apply ----
        let mut next = kept;

        for entry in &removed {
            self.uninstall(entry);
            remove_scratch_file(&entry.local_path);
            info!(blob = %entry.blob_name, "Policy blob removed");
            report.removed.push(entry.blob_name.clone());
        }

        for name in &changed {
            if let Some(entry) = current.entries.get(name) {
                self.uninstall(entry);
            }
        }

        for blob in planned {
            let was_cached = changed.contains(&blob.name);
            match self.install(blob) {
                Ok(entry) => {
                    let name = entry.blob_name.clone();
                    if was_cached {
                        info!(blob = %name, policies = entry.policies.len(), "Policy blob updated");
                        report.updated.push(name.clone());
                    } else {
                        info!(blob = %name, policies = entry.policies.len(), "Policy blob added");
                        report.added.push(name.clone());
                    }
                    next.insert(name, Arc::new(entry));
                }
                Err(name) => {
                    if was_cached {
                        if let Some(old) = current.entries.get(&name) {
                            remove_scratch_file(&old.local_path);
                        }
                        report.removed.push(name.clone());
                    }
                    report.failed.push(name);
                }
            }
        }

        let snapshot = Arc::new(PolicySnapshot { entries: next });
        metrics::record_policy_count(snapshot.policy_count());
        *self.entries.lock() = snapshot.clone();

        report.subscription_synced = self.sync_subscription(&snapshot).await;

        if report.has_changes() || !report.failed.is_empty() {
            info!(
                added = report.added.len(),
                updated = report.updated.len(),
                removed = report.removed.len(),
                unchanged = report.unchanged,
                failed = report.failed.len(),
                "Policy reconcile complete"
            );
        } else {
            debug!(unchanged = report.unchanged, "Policies unchanged");
        }

        Ok(report)
    }

    async fn plan_blob(&self, name: &str, digest: &str) -> Result<PlannedBlob, HostError> {
        let path = match scratch_path(&self.scratch_dir, name) {
            Ok(path) => path,
            Err(e) => {
                return Ok(PlannedBlob {
                    name: name.to_string(),
                    digest: digest.to_string(),
                    path: PathBuf::new(),
                    content: Vec::new(),
                    document: Err(e),
                })
            }
        };

        let content = self.blob_store.fetch(name).await?;
        let document = self.loader.load_bytes(name, &path, &content);

        Ok(PlannedBlob {
            name: name.to_string(),
            digest: digest.to_string(),
            path,
            content,
            document,
        })
    }

    /// Write the scratch copy and install periodic jobs; returns the blob
    /// name on failure
    fn install(&self, blob: PlannedBlob) -> Result<PolicyEntry, String> {
        let document = match blob.document {
            Ok(document) => document,
            Err(e) => {
                error!(blob = %blob.name, error = %e, "Failed to parse policy blob");
                self.rejected.lock().insert(blob.name.clone(), blob.digest);
                return Err(blob.name);
            }
        };

        for e in &document.errors {
            error!(blob = %blob.name, error = %e, "Dropping invalid policy");
        }

        if let Err(e) = write_scratch_file(&blob.path, &blob.content) {
            error!(blob = %blob.name, path = %blob.path.display(), error = %e, "Failed to write policy scratch file");
            return Err(blob.name);
        }

        let policies: BTreeMap<String, Arc<Policy>> = document
            .policies
            .into_iter()
            .map(|p| (p.name.clone(), Arc::new(p)))
            .collect();

        let periodic: Vec<&Arc<Policy>> = policies.values().filter(|p| p.mode.is_periodic()).collect();
        let mut job_ids = Vec::with_capacity(periodic.len());

        for policy in &periodic {
            let PolicyMode::Periodic { schedule } = &policy.mode else {
                continue;
            };
            let job_id = if periodic.len() == 1 {
                blob.name.clone()
            } else {
                format!("{}/{}", blob.name, policy.name)
            };

            let trigger = Trigger::Cron(schedule.clone());
            let options = JobOptions::default()
                .with_misfire_grace(trigger.period().unwrap_or(DEFAULT_MISFIRE_GRACE))
                .in_group(blob.name.clone());
            let action = Arc::new(RunPolicyJob::periodic(self.runner.clone(), Arc::clone(policy)));

            match self.scheduler.add_recurring(job_id.clone(), trigger, action, options) {
                Ok(()) => {
                    debug!(blob = %blob.name, policy = %policy.name, job_id = %job_id, schedule = %schedule, "Periodic policy scheduled");
                    job_ids.push(job_id);
                }
                Err(e) => {
                    error!(blob = %blob.name, policy = %policy.name, error = %e, "Failed to schedule periodic policy");
                }
            }
        }

        Ok(PolicyEntry {
            blob_name: blob.name,
            content_digest: blob.digest,
            policies,
            job_ids,
            local_path: blob.path,
        })
    }

    /// Cancel every job the entry owns, queued event dispatches included
    fn uninstall(&self, entry: &PolicyEntry) {
        let removed = self.scheduler.remove_group(&entry.blob_name);
        debug!(blob = %entry.blob_name, jobs = removed, "Policy blob jobs removed");
    }

    async fn sync_subscription(&self, snapshot: &PolicySnapshot) -> bool {
        let operations = snapshot.operation_strings();
        let unchanged = self.last_synced.lock().as_ref() == Some(&operations);
        if unchanged {
            return true;
        }

        match self.subscription.sync(&operations).await {
            Ok(outcome) => {
                match outcome {
                    SyncOutcome::Unchanged => debug!("Event subscription already up to date"),
                    SyncOutcome::Updated => info!(operations = operations.len(), "Event subscription updated"),
                    SyncOutcome::Removed => info!("Event subscription removed"),
                }
                *self.last_synced.lock() = Some(operations);
                true
            }
            Err(e) => {
                warn!(error = %e, "Event subscription sync failed, retrying next tick");
                false
            }
        }
    }
}

/// `.yml` / `.yaml`, suffix compared case-insensitively
pub fn is_policy_blob(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".yml") || lower.ends_with(".yaml")
}

fn write_scratch_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}

fn remove_scratch_file(path: &Path) {
    if path.as_os_str().is_empty() {
        return;
    }
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to delete policy scratch file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_blob_suffix_is_case_insensitive() {
        assert!(is_policy_blob("blob1.yml"));
        assert!(is_policy_blob("blob2.YAML"));
        assert!(is_policy_blob("team/a.Yml"));
        assert!(!is_policy_blob("blob3.md"));
        assert!(!is_policy_blob("yml"));
        assert!(!is_policy_blob("archive.yml.bak"));
    }

    #[test]
    fn test_report_has_changes() {
        let mut report = ReconcileReport {
            unchanged: 4,
            ..Default::default()
        };
        assert!(!report.has_changes());
        report.removed.push("a.yml".to_string());
        assert!(report.has_changes());
    }
}
