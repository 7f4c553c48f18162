// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the policy host CLI

pub mod config;
pub mod run;
pub mod validate;
