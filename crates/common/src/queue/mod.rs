//! Work queue for crawl items
//!
//! Provides:
//! - The versioned `WorkItem` payload shared by producers and consumers
//! - The `WorkQueue` transport abstraction
//! - SQS client wrapper (consumer-group semantics via visibility timeouts)
//! - In-memory queue for tests and local runs
//! - `Producer` with bounded exponential backoff

mod memory;
mod producer;

pub use memory::MemoryQueue;
pub use producer::{Producer, PublishPolicy};

use crate::config::QueueConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_sqs::error::SdkError;
use aws_sdk_sqs::types::QueueAttributeName;
use aws_sdk_sqs::Client as SqsClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Payload version written by this build
pub const WORK_ITEM_VERSION: u32 = 1;

/// SQS ceiling on a message's visibility timeout (12 hours)
pub const MAX_VISIBILITY_SECS: u64 = 43_200;

fn legacy_version() -> u32 {
    1
}

/// A title to fetch plus its traversal depth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Payload schema version; absent on messages from older producers
    #[serde(default = "legacy_version")]
    pub v: u32,
    pub title: String,
    pub depth: u32,
}

impl WorkItem {
    pub fn new(title: impl Into<String>, depth: u32) -> Self {
        Self {
            v: WORK_ITEM_VERSION,
            title: title.into(),
            depth,
        }
    }

    /// Item for a reference discovered while processing this one
    pub fn child(&self, title: impl Into<String>) -> Self {
        Self::new(title, self.depth + 1)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Into::into)
    }

    /// Parse a message body, rejecting payloads from newer producers
    pub fn from_json(body: &str) -> Result<Self> {
        let item: WorkItem = serde_json::from_str(body).map_err(|e| AppError::QueueError {
            message: format!("Failed to parse work item: {}", e),
        })?;

        if item.v > WORK_ITEM_VERSION {
            return Err(AppError::UnsupportedVersion {
                version: item.v,
                supported: WORK_ITEM_VERSION,
            });
        }

        Ok(item)
    }
}

/// A received message awaiting acknowledgement
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Handle used to acknowledge the message
    pub receipt: String,
    /// Raw message body
    pub body: String,
}

impl Delivery {
    pub fn work_item(&self) -> Result<WorkItem> {
        WorkItem::from_json(&self.body)
    }
}

/// Message transport carrying work items
///
/// Every consumer of one queue shares it: each message goes to one consumer
/// and is redelivered only if it is not acknowledged in time.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Topic this queue consumes from
    fn topic(&self) -> &str;

    /// Single send attempt; retries live in `Producer`
    async fn send(&self, topic: &str, body: &str) -> Result<()>;

    /// Receive up to `max` messages, waiting for the configured poll window
    async fn receive(&self, max: usize) -> Result<Vec<Delivery>>;

    /// Acknowledge a handled message so it is not redelivered
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Keep a message hidden from other consumers for another `timeout`
    async fn extend_visibility(&self, delivery: &Delivery, timeout: Duration) -> Result<()>;

    /// Check broker connectivity
    async fn ping(&self) -> Result<()>;

    /// Flush and release the client
    async fn close(&self) -> Result<()>;
}

/// Map an SDK failure onto the error taxonomy
fn broker_error<E, R>(context: &str, err: SdkError<E, R>) -> AppError
where
    SdkError<E, R>: std::fmt::Display,
{
    let message = format!("{}: {}", context, err);
    match err {
        SdkError::ConstructionFailure(_) => AppError::QueueError { message },
        _ => AppError::BrokerUnavailable { message },
    }
}

/// SQS queue client wrapper
pub struct SqsQueue {
    client: SqsClient,
    url: String,
    config: QueueConfig,
}

impl SqsQueue {
    /// Create a new queue client from the ambient AWS configuration
    pub async fn new(config: QueueConfig) -> Result<Self> {
        let url = config.topic_url.clone().ok_or_else(|| AppError::Configuration {
            message: "queue.topic_url is not set".to_string(),
        })?;

        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SqsClient::new(&aws_config);

        Ok(Self { client, url, config })
    }

    /// Create with an existing SQS client
    pub fn with_client(client: SqsClient, url: String, config: QueueConfig) -> Self {
        Self { client, url, config }
    }

    /// Ping until the broker answers or the startup budget is spent
    pub async fn connect(config: QueueConfig) -> Result<Self> {
        let queue = Self::new(config).await?;
        let attempts = queue.config.connect_attempts.max(1);
        let interval = Duration::from_secs(queue.config.connect_interval_secs);

        for attempt in 1..=attempts {
            match queue.ping().await {
                Ok(()) => {
                    info!(url = %queue.url, attempt, "Connected to queue");
                    return Ok(queue);
                }
                Err(e) if attempt < attempts => {
                    warn!(error = %e, attempt, attempts, "Queue not reachable yet, waiting");
                    tokio::time::sleep(interval).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::BrokerUnavailable {
            message: format!("queue {} unreachable after {} attempts", queue.url, attempts),
        })
    }
}

#[async_trait]
impl WorkQueue for SqsQueue {
    fn topic(&self) -> &str {
        &self.url
    }

    async fn send(&self, topic: &str, body: &str) -> Result<()> {
        let result = self
            .client
            .send_message()
            .queue_url(topic)
            .message_body(body)
            .send()
            .await
            .map_err(|e| broker_error("Failed to send message", e))?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, "Message sent to queue");

        Ok(())
    }

    async fn receive(&self, max: usize) -> Result<Vec<Delivery>> {
        let max = max.clamp(1, self.config.batch_size.clamp(1, 10) as usize);

        let result = self
            .client
            .receive_message()
            .queue_url(&self.url)
            .max_number_of_messages(max as i32)
            .visibility_timeout(self.config.visibility_timeout_secs as i32)
            .wait_time_seconds(self.config.poll_timeout_secs.min(20) as i32)
            .send()
            .await
            .map_err(|e| broker_error("Failed to receive messages", e))?;

        let deliveries: Vec<Delivery> = result
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|message| {
                let receipt = message.receipt_handle?;
                Some(Delivery {
                    receipt,
                    body: message.body.unwrap_or_default(),
                })
            })
            .collect();

        debug!(count = deliveries.len(), "Received messages from queue");
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.url)
            .receipt_handle(&delivery.receipt)
            .send()
            .await
            .map_err(|e| broker_error("Failed to delete message", e))?;

        debug!("Message deleted from queue");
        Ok(())
    }

    async fn extend_visibility(&self, delivery: &Delivery, timeout: Duration) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.url)
            .receipt_handle(&delivery.receipt)
            .visibility_timeout(timeout.as_secs().min(MAX_VISIBILITY_SECS) as i32)
            .send()
            .await
            .map_err(|e| broker_error("Failed to extend message visibility", e))?;

        debug!(secs = timeout.as_secs(), "Message visibility extended");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .get_queue_attributes()
            .queue_url(&self.url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| broker_error("Queue ping failed", e))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Sends are confirmed synchronously, nothing is buffered client-side
        info!(url = %self.url, "Queue client closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_carries_version() {
        let item = WorkItem::new("graph neural networks", 0);
        let json = item.to_json().unwrap();
        assert!(json.contains("\"v\":1"));
        assert_eq!(WorkItem::from_json(&json).unwrap(), item);
    }

    #[test]
    fn test_unversioned_payload_reads_as_v1() {
        let item = WorkItem::from_json(r#"{"title": "node2vec", "depth": 2}"#).unwrap();
        assert_eq!(item.v, 1);
        assert_eq!(item.depth, 2);
    }

    #[test]
    fn test_newer_payload_rejected() {
        let err = WorkItem::from_json(r#"{"v": 2, "title": "node2vec", "depth": 0}"#).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedVersion { version: 2, .. }));
    }

    #[test]
    fn test_negative_depth_rejected() {
        assert!(WorkItem::from_json(r#"{"title": "x", "depth": -1}"#).is_err());
    }

    #[test]
    fn test_child_increments_depth() {
        let parent = WorkItem::new("a", 1);
        let child = parent.child("b");
        assert_eq!(child.depth, 2);
        assert_eq!(child.v, WORK_ITEM_VERSION);
    }
}
