// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Value types and collaborator contracts for the policy host.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and traits shared by application services and adapters

pub mod config;
pub mod credentials;
pub mod event;
pub mod policy;
pub mod queue;
pub mod runner;
pub mod schedule;
pub mod storage;
pub mod subscription;
