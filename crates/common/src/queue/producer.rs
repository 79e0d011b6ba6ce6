//! Producer side of the work queue with bounded exponential backoff

use super::{WorkItem, WorkQueue};
use crate::config::QueueConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Retry schedule for publishes: 2s, 4s, 8s, ... capped, for a fixed
/// number of attempts
#[derive(Debug, Clone)]
pub struct PublishPolicy {
    /// Total send attempts, including the first
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl PublishPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            attempts: config.publish_attempts.max(1),
            max_backoff: Duration::from_secs(config.publish_max_backoff_secs),
            ..Default::default()
        }
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Publishes work items, retrying transient broker failures
#[derive(Clone)]
pub struct Producer {
    queue: Arc<dyn WorkQueue>,
    policy: PublishPolicy,
}

impl Producer {
    pub fn new(queue: Arc<dyn WorkQueue>, policy: PublishPolicy) -> Self {
        Self { queue, policy }
    }

    /// The queue's own topic, where discovered work is sent by default
    pub fn default_topic(&self) -> &str {
        self.queue.topic()
    }

    /// Publish one item. An `Err` means the item is not on the queue.
    #[instrument(skip(self, item), fields(title = %item.title, depth = item.depth))]
    pub async fn publish(&self, topic: &str, item: &WorkItem) -> Result<()> {
        let body = item.to_json()?;
        let mut schedule = self.policy.schedule();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.queue.send(topic, &body).await {
                Ok(()) => {
                    metrics::record_publish(true);
                    debug!(attempt, "Work item published");
                    return Ok(());
                }
                Err(e) => e,
            };

            if !err.is_transient() {
                metrics::record_publish(false);
                error!(error = %err, "Publish rejected; work item dropped (potential data loss)");
                return Err(err);
            }

            if attempt >= self.policy.attempts {
                metrics::record_publish(false);
                error!(
                    error = %err,
                    attempts = attempt,
                    "Publish failed after retries; work item dropped (potential data loss)"
                );
                return Err(AppError::BrokerUnavailable {
                    message: format!("publish failed after {} attempts: {}", attempt, err),
                });
            }

            let wait = schedule.next_backoff().unwrap_or(self.policy.max_backoff);
            warn!(
                error = %err,
                attempt,
                wait_secs = wait.as_secs(),
                "Publish failed, backing off"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Flush and close the underlying queue client
    pub async fn close(&self) -> Result<()> {
        self.queue.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Delivery, MemoryQueue};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Fails the first `failures` sends with the given error kind
    struct FlakyQueue {
        inner: MemoryQueue,
        failures: u32,
        transient: bool,
        calls: AtomicU32,
    }

    impl FlakyQueue {
        fn new(failures: u32, transient: bool) -> Self {
            Self {
                inner: MemoryQueue::new("crawl"),
                failures,
                transient,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl WorkQueue for FlakyQueue {
        fn topic(&self) -> &str {
            self.inner.topic()
        }

        async fn send(&self, topic: &str, body: &str) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(if self.transient {
                    AppError::BrokerUnavailable { message: "no brokers".into() }
                } else {
                    AppError::QueueError { message: "message too large".into() }
                });
            }
            self.inner.send(topic, body).await
        }

        async fn receive(&self, max: usize) -> Result<Vec<Delivery>> {
            self.inner.receive(max).await
        }

        async fn ack(&self, delivery: &Delivery) -> Result<()> {
            self.inner.ack(delivery).await
        }

        async fn extend_visibility(&self, delivery: &Delivery, timeout: Duration) -> Result<()> {
            self.inner.extend_visibility(delivery, timeout).await
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.inner.close().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_back_off_then_succeed() {
        let queue = Arc::new(FlakyQueue::new(3, true));
        let producer = Producer::new(queue.clone(), PublishPolicy::default());

        let start = Instant::now();
        producer.publish("crawl", &WorkItem::new("node2vec", 1)).await.unwrap();

        // 2s + 4s + 8s between the four attempts
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(14) && elapsed < Duration::from_millis(14_100));
        assert_eq!(queue.calls.load(Ordering::SeqCst), 4);
        assert_eq!(queue.inner.ready_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempt_budget() {
        let queue = Arc::new(FlakyQueue::new(u32::MAX, true));
        let producer = Producer::new(queue.clone(), PublishPolicy::default());

        let err = producer.publish("crawl", &WorkItem::new("x", 0)).await.unwrap_err();
        assert!(matches!(err, AppError::BrokerUnavailable { .. }));
        assert_eq!(queue.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped() {
        let policy = PublishPolicy {
            attempts: 8,
            max_backoff: Duration::from_secs(10),
            ..Default::default()
        };
        let queue = Arc::new(FlakyQueue::new(u32::MAX, true));
        let producer = Producer::new(queue, policy);

        let start = Instant::now();
        let _ = producer.publish("crawl", &WorkItem::new("x", 0)).await;

        // 2 + 4 + 8 + 10 + 10 + 10 + 10
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(54) && elapsed < Duration::from_millis(54_100));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let queue = Arc::new(FlakyQueue::new(1, false));
        let producer = Producer::new(queue.clone(), PublishPolicy::default());

        assert!(producer.publish("crawl", &WorkItem::new("x", 0)).await.is_err());
        assert_eq!(queue.calls.load(Ordering::SeqCst), 1);
    }
}
