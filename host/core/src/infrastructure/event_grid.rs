// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Event Grid Subscription Adapter
//!
//! Maintains a subscription-scoped Event Grid event subscription that routes
//! resource write/delete/action audit events into the host's storage queue.
//! The subscription is named after the queue.
//!
//! # API Endpoints
//!
//! `{management}/subscriptions/{sub}/providers/Microsoft.EventGrid/eventSubscriptions/{queue}?api-version=2022-06-15`
//!
//! - `GET` - read the current filter
//! - `PUT` - create or replace
//! - `DELETE` - remove (when no event-mode policies remain)
//!
//! The only filter dimension managed here is a `StringIn` advanced filter on
//! `data.operationName`.

use crate::domain::config::StorageAccountId;
use crate::domain::credentials::{AccessTokenProvider, MANAGEMENT_RESOURCE};
use crate::domain::subscription::{EventGridError, EventSubscription, SyncOutcome};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

pub const MANAGEMENT_URL: &str = "https://management.azure.com";
const EVENT_GRID_API_VERSION: &str = "2022-06-15";
const OPERATION_NAME_KEY: &str = "data.operationName";

/// Event Grid accepts at most this many values in one `StringIn` filter
pub const MAX_FILTER_VALUES: usize = 25;

pub const INCLUDED_EVENT_TYPES: [&str; 3] = [
    "Microsoft.Resources.ResourceWriteSuccess",
    "Microsoft.Resources.ResourceDeleteSuccess",
    "Microsoft.Resources.ResourceActionSuccess",
];

// ============================================================================
// ARM Schema
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct EventSubscriptionResource {
    properties: EventSubscriptionProperties,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventSubscriptionProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    destination: Option<Destination>,
    #[serde(default)]
    filter: Filter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_delivery_schema: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Destination {
    endpoint_type: String,
    #[serde(default)]
    properties: DestinationProperties,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DestinationProperties {
    #[serde(default)]
    resource_id: Option<String>,
    #[serde(default)]
    queue_name: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Filter {
    #[serde(default)]
    included_event_types: Vec<String>,
    #[serde(default)]
    advanced_filters: Vec<AdvancedFilter>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvancedFilter {
    operator_type: String,
    key: String,
    #[serde(default)]
    values: Vec<String>,
}

impl EventSubscriptionResource {
    fn operation_names(&self) -> BTreeSet<String> {
        self.properties
            .filter
            .advanced_filters
            .iter()
            .filter(|f| f.operator_type == "StringIn" && f.key.eq_ignore_ascii_case(OPERATION_NAME_KEY))
            .flat_map(|f| f.values.iter().cloned())
            .collect()
    }

    fn queue_name(&self) -> Option<&str> {
        self.properties
            .destination
            .as_ref()
            .and_then(|d| d.properties.queue_name.as_deref())
    }
}

// ============================================================================
// Adapter
// ============================================================================

pub struct EventGridSubscription {
    client: Client,
    management_url: String,
    credentials: Arc<dyn AccessTokenProvider>,
    storage_account: StorageAccountId,
    queue_name: String,
}

impl EventGridSubscription {
    pub fn new(
        storage_account: StorageAccountId,
        queue_name: impl Into<String>,
        credentials: Arc<dyn AccessTokenProvider>,
    ) -> Result<Self, EventGridError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EventGridError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            client,
            management_url: MANAGEMENT_URL.to_string(),
            credentials,
            storage_account,
            queue_name: queue_name.into(),
        })
    }

    /// Point at a different ARM endpoint (sovereign clouds, tests)
    pub fn with_management_url(mut self, url: impl Into<String>) -> Self {
        self.management_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn resource_url(&self) -> String {
        format!(
            "{}/subscriptions/{}/providers/Microsoft.EventGrid/eventSubscriptions/{}",
            self.management_url, self.storage_account.subscription_id, self.queue_name
        )
    }

    fn desired(&self, operations: &BTreeSet<String>) -> EventSubscriptionResource {
        EventSubscriptionResource {
            properties: EventSubscriptionProperties {
                destination: Some(Destination {
                    endpoint_type: "StorageQueue".to_string(),
                    properties: DestinationProperties {
                        resource_id: Some(self.storage_account.resource_id.clone()),
                        queue_name: Some(self.queue_name.clone()),
                    },
                }),
                filter: Filter {
                    included_event_types: INCLUDED_EVENT_TYPES.iter().map(|t| t.to_string()).collect(),
                    advanced_filters: vec![AdvancedFilter {
                        operator_type: "StringIn".to_string(),
                        key: OPERATION_NAME_KEY.to_string(),
                        values: operations.iter().cloned().collect(),
                    }],
                },
                event_delivery_schema: Some("EventGridSchema".to_string()),
            },
        }
    }

    async fn fetch_current(&self, token: &str) -> Result<Option<EventSubscriptionResource>, EventGridError> {
        let response = self
            .client
            .get(self.resource_url())
            .query(&[("api-version", EVENT_GRID_API_VERSION)])
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(status_error(status, response).await),
        }
    }

    async fn delete(&self, token: &str) -> Result<SyncOutcome, EventGridError> {
        let response = self
            .client
            .delete(self.resource_url())
            .query(&[("api-version", EVENT_GRID_API_VERSION)])
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => Ok(SyncOutcome::Removed),
            StatusCode::NOT_FOUND => Ok(SyncOutcome::Unchanged),
            status => Err(status_error(status, response).await),
        }
    }
}

#[async_trait]
impl EventSubscription for EventGridSubscription {
    async fn sync(&self, operations: &BTreeSet<String>) -> Result<SyncOutcome, EventGridError> {
        let token = self.credentials.token(MANAGEMENT_RESOURCE).await?;

        if operations.is_empty() {
            return self.delete(&token).await;
        }

        if operations.len() > MAX_FILTER_VALUES {
            error!(
                operations = operations.len(),
                limit = MAX_FILTER_VALUES,
                "Operation filter exceeds the event grid value limit"
            );
            return Err(EventGridError::InvalidConfig(format!(
                "{} operations exceed the {} value limit of a StringIn filter",
                operations.len(),
                MAX_FILTER_VALUES
            )));
        }

        if let Some(current) = self.fetch_current(&token).await? {
            if current.operation_names() == *operations
                && current.queue_name() == Some(self.queue_name.as_str())
            {
                debug!(subscription = %self.queue_name, "Event subscription filter already matches");
                return Ok(SyncOutcome::Unchanged);
            }
        }

        let response = self
            .client
            .put(self.resource_url())
            .query(&[("api-version", EVENT_GRID_API_VERSION)])
            .bearer_auth(&token)
            .json(&self.desired(operations))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(SyncOutcome::Updated),
            status => Err(status_error(status, response).await),
        }
    }
}

async fn status_error(status: StatusCode, response: reqwest::Response) -> EventGridError {
    EventGridError::Status {
        status: status.as_u16(),
        body: response.text().await.unwrap_or_default(),
    }
}
