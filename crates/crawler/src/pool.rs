//! Worker pool: the consume loop over the shared work queue
//!
//! Each received message runs on its own task holding one in-flight permit.
//! The permit is dropped when the task ends, however it ends. While an item
//! is in flight its message's visibility is extended on a heartbeat.

use crate::errors::Result;
use crate::heartbeat::{self, Heartbeat};
use crate::stats::CrawlSummary;
use crate::worker::Worker;
use citecrawl_common::config::AppConfig;
use citecrawl_common::errors::AppError;
use citecrawl_common::metrics;
use citecrawl_common::queue::{Delivery, WorkQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_RECEIVE_FAILURES: u32 = 5;
const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);
const RECEIVE_ERROR_PAUSE: Duration = Duration::from_secs(5);
const IDLE_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Items held at once, received and not yet settled
    pub max_in_flight: usize,
    /// Messages requested per receive
    pub batch_size: usize,
    /// Window for in-flight items after a stop request
    pub shutdown_timeout: Duration,
    /// Return once the queue is empty and nothing is in flight
    pub exit_when_idle: bool,
    /// Visibility held on each in-flight message
    pub visibility_timeout: Duration,
}

impl PoolSettings {
    pub fn from_config(config: &AppConfig, exit_when_idle: bool) -> Self {
        Self {
            max_in_flight: config.crawler.max_in_flight,
            batch_size: config.queue.batch_size as usize,
            shutdown_timeout: config.shutdown_timeout(),
            exit_when_idle,
            visibility_timeout: Duration::from_secs(config.queue.visibility_timeout_secs),
        }
    }
}

pub struct WorkerPool {
    queue: Arc<dyn WorkQueue>,
    worker: Arc<Worker>,
    settings: PoolSettings,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn WorkQueue>, worker: Arc<Worker>, settings: PoolSettings) -> Self {
        Self { queue, worker, settings }
    }

    /// Consume until cancelled (or idle, if configured), then drain and
    /// close the queue client
    pub async fn run(&self, cancel: CancellationToken) -> Result<CrawlSummary> {
        let permits = Arc::new(Semaphore::new(self.settings.max_in_flight.max(1)));
        let batch_size = self.settings.batch_size.max(1);
        let mut tasks = JoinSet::new();
        let mut consecutive_failures = 0u32;

        info!(
            topic = %self.queue.topic(),
            max_in_flight = self.settings.max_in_flight,
            "Worker pool started"
        );

        loop {
            if consecutive_failures >= MAX_RECEIVE_FAILURES {
                warn!(failures = consecutive_failures, "Circuit breaker open, pausing...");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(CIRCUIT_BREAK_DURATION) => {}
                }
                consecutive_failures = 0;
                info!("Circuit breaker reset, resuming...");
            }

            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }

            let first = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => permit.map_err(|_| AppError::Internal {
                    message: "in-flight semaphore closed".to_string(),
                })?,
            };
            let mut batch = vec![first];
            while batch.len() < batch_size {
                match permits.clone().try_acquire_owned() {
                    Ok(permit) => batch.push(permit),
                    Err(_) => break,
                }
            }

            let busy = !tasks.is_empty();
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.queue.receive(batch.len()) => received,
            };

            match received {
                Err(e) => {
                    consecutive_failures += 1;
                    error!(error = %e, failures = consecutive_failures, "Failed to receive messages from queue");
                    drop(batch);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_PAUSE) => {}
                    }
                }
                Ok(deliveries) if deliveries.is_empty() => {
                    consecutive_failures = 0;
                    drop(batch);

                    if !tasks.is_empty() {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            joined = tasks.join_next() => {
                                if let Some(joined) = joined {
                                    log_join(joined);
                                }
                            }
                        }
                    } else if self.settings.exit_when_idle && !busy {
                        info!("Queue drained and nothing in flight");
                        break;
                    } else {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(IDLE_PAUSE) => {}
                        }
                    }
                }
                Ok(deliveries) => {
                    consecutive_failures = 0;
                    debug!(count = deliveries.len(), "Received batch");
                    for (delivery, permit) in deliveries.into_iter().zip(batch) {
                        self.spawn(&mut tasks, delivery, permit);
                    }
                }
            }
        }

        self.shutdown(&mut tasks).await?;

        let summary = self.worker.stats().summary(self.worker.fetch_retries());
        info!(
            completed = summary.completed,
            fetch_failed = summary.fetch_failed,
            published = summary.published,
            publish_failures = summary.publish_failures,
            "Worker pool stopped"
        );
        Ok(summary)
    }

    fn spawn(&self, tasks: &mut JoinSet<()>, delivery: Delivery, permit: OwnedSemaphorePermit) {
        let worker = self.worker.clone();
        let queue = self.queue.clone();
        let visibility = self.settings.visibility_timeout;
        tasks.spawn(async move {
            let _permit = permit;
            let _visibility = hold_visibility(queue.clone(), delivery.clone(), visibility);
            handle_delivery(&worker, queue.as_ref(), delivery).await;
        });
    }

    async fn shutdown(&self, tasks: &mut JoinSet<()>) -> Result<()> {
        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for in-flight items");
        }

        let drained = tokio::time::timeout(self.settings.shutdown_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                log_join(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(abandoned = tasks.len(), "Shutdown timeout reached, aborting in-flight items");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        self.queue.close().await?;
        Ok(())
    }
}

/// Keep a message hidden from other consumers until the guard drops
fn hold_visibility(queue: Arc<dyn WorkQueue>, delivery: Delivery, visibility: Duration) -> Heartbeat {
    Heartbeat::start(heartbeat::period_for(visibility), move || {
        let queue = queue.clone();
        let delivery = delivery.clone();
        async move {
            if let Err(e) = queue.extend_visibility(&delivery, visibility).await {
                warn!(error = %e, "Failed to extend message visibility");
            }
            true
        }
    })
}

async fn handle_delivery(worker: &Worker, queue: &dyn WorkQueue, delivery: Delivery) {
    worker.stats().record_received();
    metrics::record_item_received();

    let item = match delivery.work_item() {
        Ok(item) => item,
        Err(e) => {
            warn!(error = %e, "Dropping unreadable message");
            worker.stats().record_malformed();
            metrics::record_item_finished("malformed");
            ack(queue, &delivery).await;
            return;
        }
    };

    // An error leaves the message unacknowledged for redelivery
    if worker.process_one(&item).await.is_ok() {
        ack(queue, &delivery).await;
    }
}

async fn ack(queue: &dyn WorkQueue, delivery: &Delivery) {
    if let Err(e) = queue.ack(delivery).await {
        error!(error = %e, "Failed to delete message");
    }
}

fn log_join(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Item task panicked");
        }
    }
}
