// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Policy Container Host
//!
//! Long-running host that keeps an in-memory schedule of cloud policies in
//! step with a remote blob container, and dispatches event-mode policies in
//! response to audit events arriving on a storage queue.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, application services and infrastructure adapters

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
