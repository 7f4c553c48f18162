// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod azure_queue;
pub mod command_runner;
pub mod credentials;
pub mod event_grid;
pub mod in_memory_queue;
pub mod in_memory_subscription;
pub mod policy_loader;
pub mod storage;

pub use azure_queue::AzureQueueClient;
pub use command_runner::CommandPolicyRunner;
pub use credentials::{ManagedIdentityTokenProvider, StaticTokenProvider};
pub use event_grid::EventGridSubscription;
pub use in_memory_queue::InMemoryEventQueue;
pub use in_memory_subscription::InMemoryEventSubscription;
pub use policy_loader::{PolicyLoader, PolicyParseError};
pub use storage::{create_blob_store, InMemoryBlobStore, OpendalBlobStore};
