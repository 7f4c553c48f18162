// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Azure Queue Storage Client
//!
//! Implements [`EventQueue`] over the Queue Storage REST API.
//!
//! # API Endpoints
//!
//! - `GET {queue}/messages?numofmessages=N&visibilitytimeout=S` - Receive
//! - `DELETE {queue}/messages/{id}?popreceipt=R` - Delete
//!
//! A SAS token in the queue URL is kept on every request. Otherwise each
//! request carries a bearer token for the storage audience.

use crate::domain::config::StorageAccountId;
use crate::domain::credentials::{AccessTokenProvider, STORAGE_RESOURCE};
use crate::domain::event::{MessageHandle, QueueMessage};
use crate::domain::queue::{EventQueue, QueueError};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

const STORAGE_API_VERSION: &str = "2020-10-02";

/// Upper bound imposed by the service on `numofmessages`
pub const MAX_MESSAGES_PER_REQUEST: usize = 32;

/// Bound on each receive call
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a received message stays hidden from other consumers
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Deserialize)]
struct QueueMessagesList {
    #[serde(rename = "QueueMessage", default)]
    messages: Vec<QueueMessageXml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueueMessageXml {
    message_id: String,
    pop_receipt: String,
    dequeue_count: u32,
    #[serde(default)]
    message_text: String,
}

pub struct AzureQueueClient {
    client: Client,
    /// `{endpoint}/{queue}`, SAS query included
    queue_url: Url,
    credentials: Option<Arc<dyn AccessTokenProvider>>,
    visibility_timeout: Duration,
    fetch_timeout: Duration,
}

impl AzureQueueClient {
    /// Client for `queue_name` under a queue service endpoint such as
    /// `https://acct.queue.core.windows.net` or `http://127.0.0.1:10001/devstoreaccount1`
    pub fn new(
        endpoint: &str,
        queue_name: &str,
        credentials: Option<Arc<dyn AccessTokenProvider>>,
    ) -> Result<Self, QueueError> {
        let mut queue_url = Url::parse(endpoint)
            .map_err(|e| QueueError::InvalidConfig(format!("{}: {}", endpoint, e)))?;
        queue_url
            .path_segments_mut()
            .map_err(|_| QueueError::InvalidConfig(format!("{}: not a base URL", endpoint)))?
            .pop_if_empty()
            .push(queue_name);

        if queue_url.query().is_none() && credentials.is_none() {
            return Err(QueueError::InvalidConfig(
                "queue URL carries no SAS token and no credentials were supplied".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| QueueError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            client,
            queue_url,
            credentials,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            fetch_timeout: FETCH_TIMEOUT,
        })
    }

    /// Client for a queue in the given storage account
    pub fn from_storage_account(
        account: &StorageAccountId,
        queue_name: &str,
        credentials: Arc<dyn AccessTokenProvider>,
    ) -> Result<Self, QueueError> {
        let endpoint = format!("https://{}.queue.core.windows.net", account.account_name);
        Self::new(&endpoint, queue_name, Some(credentials))
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn queue_url(&self) -> &Url {
        &self.queue_url
    }

    fn messages_url(&self) -> Url {
        let mut url = self.queue_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push("messages");
        }
        url
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, QueueError> {
        let request = request
            .header("x-ms-version", STORAGE_API_VERSION)
            .header(
                "x-ms-date",
                Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            );

        match &self.credentials {
            Some(credentials) if self.queue_url.query().is_none() => {
                let token = credentials.token(STORAGE_RESOURCE).await?;
                Ok(request.bearer_auth(token))
            }
            _ => Ok(request),
        }
    }
}

#[async_trait]
impl EventQueue for AzureQueueClient {
    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let count = max_messages.clamp(1, MAX_MESSAGES_PER_REQUEST);
        let mut url = self.messages_url();
        url.query_pairs_mut()
            .append_pair("numofmessages", &count.to_string())
            .append_pair(
                "visibilitytimeout",
                &self.visibility_timeout.as_secs().to_string(),
            );

        let request = self
            .authorize(self.client.get(url).timeout(self.fetch_timeout))
            .await?;
        let response = request.send().await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.text().await?;
                let list: QueueMessagesList = quick_xml::de::from_str(&body)
                    .map_err(|e| QueueError::Decode(e.to_string()))?;
                debug!(count = list.messages.len(), "Received queue messages");

                Ok(list
                    .messages
                    .into_iter()
                    .map(|m| QueueMessage {
                        handle: MessageHandle {
                            message_id: m.message_id,
                            pop_receipt: m.pop_receipt,
                        },
                        dequeue_count: m.dequeue_count,
                        body: m.message_text,
                    })
                    .collect())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(QueueError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<(), QueueError> {
        let mut url = self.messages_url();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(&handle.message_id);
        }
        url.query_pairs_mut()
            .append_pair("popreceipt", &handle.pop_receipt);

        let request = self.authorize(self.client.delete(url)).await?;
        let response = request.send().await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            // already gone (deleted by us earlier or expired)
            StatusCode::NOT_FOUND => {
                debug!(message_id = %handle.message_id, "Queue message already deleted");
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(QueueError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::credentials::StaticTokenProvider;
    use mockito::Matcher;

    const TWO_MESSAGES: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<QueueMessagesList>
  <QueueMessage>
    <MessageId>id-1</MessageId>
    <InsertionTime>Fri, 01 May 2026 10:00:00 GMT</InsertionTime>
    <ExpirationTime>Fri, 08 May 2026 10:00:00 GMT</ExpirationTime>
    <PopReceipt>pr-1</PopReceipt>
    <TimeNextVisible>Fri, 01 May 2026 10:05:00 GMT</TimeNextVisible>
    <DequeueCount>1</DequeueCount>
    <MessageText>eyJhIjoxfQ==</MessageText>
  </QueueMessage>
  <QueueMessage>
    <MessageId>id-2</MessageId>
    <PopReceipt>pr-2</PopReceipt>
    <DequeueCount>4</DequeueCount>
    <MessageText>e30=</MessageText>
  </QueueMessage>
</QueueMessagesList>"#;

    fn client(server: &mockito::Server) -> AzureQueueClient {
        let credentials: Arc<dyn AccessTokenProvider> = Arc::new(StaticTokenProvider::new("tok"));
        AzureQueueClient::new(&server.url(), "events", Some(credentials)).unwrap()
    }

    #[tokio::test]
    async fn test_receive_parses_message_list() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/events/messages")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("numofmessages".into(), "16".into()),
                Matcher::UrlEncoded("visibilitytimeout".into(), "300".into()),
            ]))
            .match_header("authorization", "Bearer tok")
            .match_header("x-ms-version", STORAGE_API_VERSION)
            .with_status(200)
            .with_body(TWO_MESSAGES)
            .create_async()
            .await;

        let messages = client(&server).receive(16).await.unwrap();
        mock.assert_async().await;

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].handle.message_id, "id-1");
        assert_eq!(messages[0].handle.pop_receipt, "pr-1");
        assert_eq!(messages[0].dequeue_count, 1);
        assert_eq!(messages[0].body, "eyJhIjoxfQ==");
        assert_eq!(messages[1].dequeue_count, 4);
    }

    #[tokio::test]
    async fn test_receive_empty_queue() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/events/messages")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"<?xml version="1.0" encoding="utf-8"?><QueueMessagesList />"#)
            .create_async()
            .await;

        assert!(client(&server).receive(16).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_receive_caps_batch_size() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/events/messages")
            .match_query(Matcher::UrlEncoded("numofmessages".into(), "32".into()))
            .with_status(200)
            .with_body("<QueueMessagesList></QueueMessagesList>")
            .create_async()
            .await;

        client(&server).receive(100).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_receive_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/events/messages")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body("AuthorizationFailure")
            .create_async()
            .await;

        assert!(matches!(
            client(&server).receive(1).await,
            Err(QueueError::Status { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_message() {
        let mut server = mockito::Server::new_async().await;
        let deleted = server
            .mock("DELETE", "/events/messages/id-1")
            .match_query(Matcher::UrlEncoded("popreceipt".into(), "pr-1".into()))
            .with_status(204)
            .create_async()
            .await;
        server
            .mock("DELETE", "/events/messages/id-2")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let client = client(&server);
        client
            .delete(&MessageHandle {
                message_id: "id-1".to_string(),
                pop_receipt: "pr-1".to_string(),
            })
            .await
            .unwrap();
        client
            .delete(&MessageHandle {
                message_id: "id-2".to_string(),
                pop_receipt: "pr-2".to_string(),
            })
            .await
            .unwrap();
        deleted.assert_async().await;
    }

    #[tokio::test]
    async fn test_sas_url_skips_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/events/messages")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("sig".into(), "abc".into()),
                Matcher::UrlEncoded("numofmessages".into(), "1".into()),
            ]))
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_body("<QueueMessagesList />")
            .create_async()
            .await;

        let client =
            AzureQueueClient::new(&format!("{}/?sig=abc", server.url()), "events", None).unwrap();
        client.receive(1).await.unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn test_requires_sas_or_credentials() {
        assert!(matches!(
            AzureQueueClient::new("https://acct.queue.core.windows.net", "events", None),
            Err(QueueError::InvalidConfig(_))
        ));
    }
}
