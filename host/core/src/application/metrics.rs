// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Host metrics.
//!
//! Counters complement the structured logs. Nothing is exported unless the
//! embedding binary installs a recorder.

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Reconcile runs, labelled by `outcome`.
pub const RECONCILE_TOTAL: &str = "policy_host_reconcile_total";

/// Policies currently cached.
pub const POLICIES: &str = "policy_host_policies";

/// Queue messages handled, labelled by `outcome`.
pub const MESSAGES_TOTAL: &str = "policy_host_messages_total";

/// One-shot dispatch requests, labelled by `outcome`.
pub const DISPATCH_TOTAL: &str = "policy_host_dispatch_total";

/// Policy runner invocations, labelled by `outcome`.
pub const POLICY_RUNS_TOTAL: &str = "policy_host_policy_runs_total";

/// Registers all host metric descriptions.
pub fn register_metrics() {
    describe_counter!(RECONCILE_TOTAL, "Total policy reconcile runs");
    describe_gauge!(POLICIES, "Number of policies in the cache");
    describe_counter!(MESSAGES_TOTAL, "Total queue messages handled");
    describe_counter!(DISPATCH_TOTAL, "Total one-shot policy dispatch requests");
    describe_counter!(POLICY_RUNS_TOTAL, "Total policy runner invocations");
}

pub fn record_reconcile(outcome: &'static str) {
    counter!(RECONCILE_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_policy_count(count: usize) {
    gauge!(POLICIES).set(count as f64);
}

pub fn record_message(outcome: &'static str) {
    counter!(MESSAGES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_dispatch(outcome: &'static str) {
    counter!(DISPATCH_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_policy_run(outcome: &'static str) {
    counter!(POLICY_RUNS_TOTAL, "outcome" => outcome).increment(1);
}
