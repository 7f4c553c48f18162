// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory event subscription
//!
//! Records the filter it was asked to apply. Used by tests and by local runs
//! where no event grid exists.

use crate::domain::subscription::{EventGridError, EventSubscription, SyncOutcome};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct InMemoryEventSubscription {
    filter: Mutex<Option<BTreeSet<String>>>,
    calls: AtomicUsize,
    updates: AtomicUsize,
    fail_next: AtomicBool,
}

impl InMemoryEventSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operation strings currently admitted; `None` when no subscription exists
    pub fn filter(&self) -> Option<BTreeSet<String>> {
        self.filter.lock().clone()
    }

    /// Every `sync` call, including no-ops
    pub fn sync_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that changed the filter
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Make the next `sync` fail with a transient error
    pub fn fail_next_sync(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventSubscription for InMemoryEventSubscription {
    async fn sync(&self, operations: &BTreeSet<String>) -> Result<SyncOutcome, EventGridError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(EventGridError::Request("simulated outage".to_string()));
        }

        let mut filter = self.filter.lock();
        if operations.is_empty() {
            return Ok(match filter.take() {
                Some(_) => {
                    self.updates.fetch_add(1, Ordering::SeqCst);
                    SyncOutcome::Removed
                }
                None => SyncOutcome::Unchanged,
            });
        }
        if filter.as_ref() == Some(operations) {
            return Ok(SyncOutcome::Unchanged);
        }

        *filter = Some(operations.clone());
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(SyncOutcome::Updated)
    }
}
