// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Event → policy matching

use crate::application::policy_cache::PolicySnapshot;
use crate::domain::event::Event;
use crate::domain::policy::Policy;
use std::sync::Arc;

/// Selects the event-mode policies an audit event should trigger.
///
/// The event's `data.operationName` is already provider-qualified
/// (`Microsoft.Network/virtualNetworks/write`), so it is compared verbatim
/// with each policy's `"{resource_provider}/{operation}"` strings. There are
/// no wildcards.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventMatcher;

impl EventMatcher {
    pub fn select(event: &Event, snapshot: &PolicySnapshot) -> Vec<Arc<Policy>> {
        let operation = event.data.operation_name.as_str();
        snapshot
            .event_policies()
            .filter(|policy| policy.subscribes_to(operation))
            .cloned()
            .collect()
    }
}
