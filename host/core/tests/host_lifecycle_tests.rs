// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Host boot and shutdown with in-memory collaborators.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use policy_host_core::application::host::{POLL_JOB_ID, RECONCILE_JOB_ID};
use policy_host_core::application::{Host, HostComponents};
use policy_host_core::config::HostConfig;
use policy_host_core::infrastructure::policy_loader::builtin_aliases;
use policy_host_core::infrastructure::{InMemoryBlobStore, InMemoryEventQueue, InMemoryEventSubscription};

fn config() -> HostConfig {
    HostConfig::from_lookup(|key| match key {
        "POLICY_STORAGE" => Some("memory://".to_string()),
        "EVENT_QUEUE_NAME" => Some("policy-events".to_string()),
        "EVENT_QUEUE_ID" => Some(
            "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.Storage/storageAccounts/acct"
                .to_string(),
        ),
        "RECONCILE_INTERVAL_SECONDS" => Some("1".to_string()),
        "POLL_INTERVAL_SECONDS" => Some("1".to_string()),
        _ => None,
    })
    .unwrap()
}

struct Fixture {
    store: Arc<InMemoryBlobStore>,
    queue: Arc<InMemoryEventQueue>,
    subscription: Arc<InMemoryEventSubscription>,
    runner: Arc<RecordingRunner>,
    host: Host,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryBlobStore::new());
    let queue = Arc::new(InMemoryEventQueue::default());
    let subscription = Arc::new(InMemoryEventSubscription::new());
    let runner = RecordingRunner::new();

    let host = Host::new(
        config(),
        HostComponents {
            blob_store: store.clone(),
            queue: queue.clone(),
            subscription: subscription.clone(),
            runner: runner.clone(),
            aliases: builtin_aliases(),
        },
    )
    .unwrap();

    Fixture {
        store,
        queue,
        subscription,
        runner,
        host,
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_install_jobs_registers_reconcile_and_poll() {
    let f = fixture();

    f.host.install_jobs().unwrap();

    let scheduler = f.host.scheduler();
    assert!(scheduler.contains(RECONCILE_JOB_ID));
    assert!(scheduler.contains(POLL_JOB_ID));
    assert_eq!(scheduler.len(), 2);

    // Reinstalling replaces rather than duplicates
    f.host.install_jobs().unwrap();
    assert_eq!(scheduler.len(), 2);
}

#[tokio::test]
async fn test_scratch_dir_is_private_to_host() {
    let a = fixture();
    let b = fixture();

    assert!(a.host.scratch_dir().is_dir());
    assert_ne!(a.host.scratch_dir(), b.host.scratch_dir());
    assert_eq!(a.host.cache().scratch_dir(), a.host.scratch_dir());
}

#[tokio::test]
async fn test_run_loads_dispatches_and_cleans_up_on_shutdown() {
    let f = fixture();
    f.store.put_with_digest(
        "events.yml",
        "e1",
        event_doc(&[("one", &["ResourceGroupWrite"])]),
    );

    let scratch = f.host.scratch_dir().to_path_buf();
    let cache = f.host.cache().clone();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(f.host.run(shutdown.clone()));

    assert!(wait_for(|| cache.snapshot().len() == 1).await);
    assert!(scratch.join("events.yml").exists());
    assert_eq!(
        f.subscription.filter(),
        Some([RG_WRITE.to_string()].into_iter().collect())
    );

    f.queue
        .push_json(&event_json("619d2674-b396-4356-9619-6c5a52fe4e88", RG_WRITE));
    let runner = f.runner.clone();
    assert!(wait_for(|| runner.call_count() == 1).await);
    assert!(wait_for(|| f.queue.is_empty()).await);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("host did not stop")
        .unwrap()
        .unwrap();

    assert!(!scratch.exists());
}

#[tokio::test]
async fn test_cancelled_before_start_exits_cleanly() {
    let f = fixture();
    let scratch = f.host.scratch_dir().to_path_buf();
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(5), f.host.run(shutdown))
        .await
        .expect("host did not stop")
        .unwrap();

    assert!(!scratch.exists());
    assert_eq!(f.runner.call_count(), 0);
}

#[tokio::test]
async fn test_shutdown_abandons_a_run_that_never_finishes() {
    let store = Arc::new(InMemoryBlobStore::new());
    let queue = Arc::new(InMemoryEventQueue::default());
    let runner = HangingRunner::new();
    store.put_with_digest(
        "events.yml",
        "e1",
        event_doc(&[("one", &["ResourceGroupWrite"])]),
    );

    let host = Host::new(
        config(),
        HostComponents {
            blob_store: store,
            queue: queue.clone(),
            subscription: Arc::new(InMemoryEventSubscription::new()),
            runner: runner.clone(),
            aliases: builtin_aliases(),
        },
    )
    .unwrap();
    let scratch = host.scratch_dir().to_path_buf();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(host.run(shutdown.clone()));

    queue.push_json(&event_json("619d2674-b396-4356-9619-6c5a52fe4e88", RG_WRITE));
    let started = runner.clone();
    assert!(wait_for(|| started.started() == 1).await);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("host did not stop while a run was in flight")
        .unwrap()
        .unwrap();

    assert!(!scratch.exists());
}
