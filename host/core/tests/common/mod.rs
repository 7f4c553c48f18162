// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the policy host integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use policy_host_core::application::{PolicyCache, QueuePoller, Scheduler};
use policy_host_core::event::{Event, MessageHandle, QueueMessage};
use policy_host_core::infrastructure::policy_loader::builtin_aliases;
use policy_host_core::infrastructure::{InMemoryBlobStore, InMemoryEventSubscription, PolicyLoader};
use policy_host_core::policy::Policy;
use policy_host_core::queue::{EventQueue, QueueError};
use policy_host_core::runner::{PolicyRunner, RunnerError};
use policy_host_core::storage::{BlobItem, BlobStore, StorageError};

pub const POISON_THRESHOLD: u32 = 3;

/// One runner invocation: policy name and event id, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCall {
    pub policy: String,
    pub event_id: Option<String>,
}

#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<RunnerCall>>,
    fail: AtomicBool,
}

impl RecordingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<RunnerCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn fail_runs(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PolicyRunner for RecordingRunner {
    async fn run(&self, policy: &Policy, event: Option<&Event>) -> Result<(), RunnerError> {
        self.calls.lock().push(RunnerCall {
            policy: policy.name.clone(),
            event_id: event.map(|e| e.event_id.clone()),
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(RunnerError::Failed {
                policy: policy.name.clone(),
                code: Some(1),
                stderr: "boom".to_string(),
            });
        }
        Ok(())
    }
}

/// Runner whose runs never finish on their own
#[derive(Default)]
pub struct HangingRunner {
    started: AtomicUsize,
}

impl HangingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicyRunner for HangingRunner {
    async fn run(&self, _policy: &Policy, _event: Option<&Event>) -> Result<(), RunnerError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Queue that hands out preset batches in order, then empty batches
#[derive(Default)]
pub struct ScriptedQueue {
    batches: Mutex<VecDeque<Vec<QueueMessage>>>,
    deleted: Mutex<Vec<MessageHandle>>,
    receives: Mutex<usize>,
}

impl ScriptedQueue {
    pub fn new(batches: Vec<Vec<QueueMessage>>) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(batches.into()),
            ..Default::default()
        })
    }

    pub fn push_batch(&self, batch: Vec<QueueMessage>) {
        self.batches.lock().push_back(batch);
    }

    pub fn deleted(&self) -> Vec<MessageHandle> {
        self.deleted.lock().clone()
    }

    pub fn receive_calls(&self) -> usize {
        *self.receives.lock()
    }
}

#[async_trait]
impl EventQueue for ScriptedQueue {
    async fn receive(&self, _max_messages: usize) -> Result<Vec<QueueMessage>, QueueError> {
        *self.receives.lock() += 1;
        Ok(self.batches.lock().pop_front().unwrap_or_default())
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<(), QueueError> {
        self.deleted.lock().push(handle.clone());
        Ok(())
    }
}

/// Blob store that can be switched into failing every request
pub struct FlakyBlobStore {
    inner: Arc<InMemoryBlobStore>,
    down: AtomicBool,
}

impl FlakyBlobStore {
    pub fn new(inner: Arc<InMemoryBlobStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            down: AtomicBool::new(false),
        })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn list(&self) -> Result<Vec<BlobItem>, StorageError> {
        // Suspend like a network call would
        tokio::task::yield_now().await;
        if self.down.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("connection reset".to_string()));
        }
        self.inner.list().await
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("connection reset".to_string()));
        }
        self.inner.fetch(name).await
    }
}

/// Cache, scheduler and poller wired to in-memory collaborators
pub struct Harness {
    pub store: Arc<InMemoryBlobStore>,
    pub flaky: Arc<FlakyBlobStore>,
    pub subscription: Arc<InMemoryEventSubscription>,
    pub runner: Arc<RecordingRunner>,
    pub scheduler: Scheduler,
    pub cache: Arc<PolicyCache>,
    pub scratch: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryBlobStore::new());
        let flaky = FlakyBlobStore::new(store.clone());
        let subscription = Arc::new(InMemoryEventSubscription::new());
        let runner = RecordingRunner::new();
        let scheduler = Scheduler::new();
        let scratch = tempfile::tempdir().unwrap();

        let cache = Arc::new(PolicyCache::new(
            flaky.clone(),
            subscription.clone(),
            PolicyLoader::new(Arc::new(builtin_aliases())),
            scheduler.clone(),
            runner.clone(),
            scratch.path().to_path_buf(),
        ));

        Self {
            store,
            flaky,
            subscription,
            runner,
            scheduler,
            cache,
            scratch,
        }
    }

    pub fn poller(&self, queue: Arc<dyn EventQueue>) -> QueuePoller {
        QueuePoller::new(
            queue,
            self.cache.clone(),
            self.scheduler.clone(),
            self.runner.clone(),
            POISON_THRESHOLD,
            16,
        )
    }

    /// Ids of queued jobs, sorted
    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.scheduler.list().into_iter().map(|j| j.id).collect();
        ids.sort();
        ids
    }
}

/// A document with one periodic policy per name
pub fn periodic_doc(names: &[&str]) -> String {
    let mut doc = String::from("policies:\n");
    for name in names {
        doc.push_str(&format!(
            "  - name: {}\n    resource: azure.vm\n    mode:\n      type: container-periodic\n      schedule: \"*/5 * * * *\"\n",
            name
        ));
    }
    doc
}

/// A document with one event policy per `(name, events)` pair; events are
/// YAML flow sequence items, e.g. `"ResourceGroupWrite"`
pub fn event_doc(policies: &[(&str, &[&str])]) -> String {
    let mut doc = String::from("policies:\n");
    for (name, events) in policies {
        doc.push_str(&format!(
            "  - name: {}\n    resource: azure.resourcegroup\n    mode:\n      type: container-event\n      events: [{}]\n",
            name,
            events.join(", ")
        ));
    }
    doc
}

pub const RG_WRITE: &str = "Microsoft.Resources/subscriptions/resourceGroups/write";
pub const VNET_WRITE: &str = "Microsoft.Network/virtualNetworks/write";
pub const KEYVAULT_WRITE: &str = "Microsoft.KeyVault/vaults/write";

pub fn event_json(event_id: &str, operation_name: &str) -> String {
    let provider = operation_name.split('/').next().unwrap_or_default();
    serde_json::json!({
        "subject": "/subscriptions/0000/resourceGroups/test_rg",
        "eventType": "Microsoft.Resources.ResourceWriteSuccess",
        "eventTime": "2026-05-01T10:00:00Z",
        "id": event_id,
        "data": {
            "correlationId": "7dd5a476-e052-40e2-99e4-bb9852dc1f86",
            "resourceProvider": provider,
            "resourceUri": "/subscriptions/0000/resourceGroups/test_rg",
            "operationName": operation_name,
            "status": "Succeeded"
        },
        "topic": "/subscriptions/0000"
    })
    .to_string()
}

pub fn message(message_id: &str, dequeue_count: u32, event_id: &str, operation_name: &str) -> QueueMessage {
    QueueMessage::encode(
        MessageHandle {
            message_id: message_id.to_string(),
            pop_receipt: format!("receipt-{}", message_id),
        },
        dequeue_count,
        &event_json(event_id, operation_name),
    )
}
