// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application
//!
//! Services that compose the domain: the cooperative scheduler, the policy
//! cache and its reconcile loop, event matching, queue polling and the host
//! that wires them together.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrates domain objects and infrastructure seams

pub mod event_matcher;
pub mod host;
pub mod jobs;
pub mod metrics;
pub mod policy_cache;
pub mod queue_poller;
pub mod scheduler;

pub use event_matcher::EventMatcher;
pub use host::{Host, HostComponents, HostError};
pub use policy_cache::{PolicyCache, PolicySnapshot, ReconcileReport};
pub use queue_poller::{PollReport, QueuePoller};
pub use scheduler::{JobAction, JobContext, JobOptions, Scheduler, SchedulerError, Trigger};
