//! In-process queue with the same delivery contract as SQS

use super::{Delivery, WorkItem, WorkQueue};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct State {
    topics: HashMap<String, VecDeque<String>>,
    in_flight: HashMap<String, (String, String)>,
    sent: usize,
    extensions: usize,
    closed: bool,
}

/// Queue held in memory, for tests and single-process runs
pub struct MemoryQueue {
    topic: String,
    state: Mutex<State>,
}

impl MemoryQueue {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| AppError::Internal {
            message: "memory queue lock poisoned".to_string(),
        })
    }

    /// Messages waiting on the consume topic
    pub fn ready_len(&self) -> usize {
        self.lock()
            .map(|s| s.topics.get(&self.topic).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    /// Messages received but not yet acknowledged
    pub fn in_flight_len(&self) -> usize {
        self.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Total successful sends over the queue's lifetime
    pub fn sent_count(&self) -> usize {
        self.lock().map(|s| s.sent).unwrap_or(0)
    }

    /// Visibility extensions granted to in-flight messages
    pub fn visibility_extensions(&self) -> usize {
        self.lock().map(|s| s.extensions).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|s| s.closed).unwrap_or(false)
    }

    /// Parsed items waiting on the consume topic, in order
    pub fn pending_items(&self) -> Vec<WorkItem> {
        self.lock()
            .map(|s| {
                s.topics
                    .get(&self.topic)
                    .map(|q| q.iter().filter_map(|b| WorkItem::from_json(b).ok()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Return every unacknowledged message to its topic, as a visibility
    /// timeout expiry would after a consumer crash
    pub fn redeliver_unacked(&self) -> usize {
        let Ok(mut state) = self.lock() else {
            return 0;
        };
        let stranded: Vec<(String, String)> = state.in_flight.drain().map(|(_, v)| v).collect();
        let count = stranded.len();
        for (topic, body) in stranded {
            state.topics.entry(topic).or_default().push_back(body);
        }
        count
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&self, topic: &str, body: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(AppError::QueueError {
                message: "queue is closed".to_string(),
            });
        }
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .push_back(body.to_string());
        state.sent += 1;
        Ok(())
    }

    async fn receive(&self, max: usize) -> Result<Vec<Delivery>> {
        let mut state = self.lock()?;
        let mut deliveries = Vec::new();

        for _ in 0..max.max(1) {
            let Some(body) = state.topics.get_mut(&self.topic).and_then(VecDeque::pop_front) else {
                break;
            };
            let receipt = Uuid::new_v4().to_string();
            state
                .in_flight
                .insert(receipt.clone(), (self.topic.clone(), body.clone()));
            deliveries.push(Delivery { receipt, body });
        }

        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.lock()?.in_flight.remove(&delivery.receipt);
        Ok(())
    }

    async fn extend_visibility(&self, delivery: &Delivery, _timeout: Duration) -> Result<()> {
        let mut state = self.lock()?;
        if !state.in_flight.contains_key(&delivery.receipt) {
            return Err(AppError::QueueError {
                message: "receipt is not in flight".to_string(),
            });
        }
        state.extensions += 1;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.lock()?.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_receive_then_ack() {
        let queue = MemoryQueue::new("crawl");
        queue.send("crawl", &WorkItem::new("a", 0).to_json().unwrap()).await.unwrap();
        queue.send("crawl", &WorkItem::new("b", 0).to_json().unwrap()).await.unwrap();

        let batch = assert_ok!(queue.receive(10).await);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].work_item().unwrap().title, "a");
        assert_eq!(queue.in_flight_len(), 2);

        queue.ack(&batch[0]).await.unwrap();
        assert_eq!(queue.in_flight_len(), 1);
    }

    #[tokio::test]
    async fn test_unacked_messages_are_redelivered() {
        let queue = MemoryQueue::new("crawl");
        queue.send("crawl", &WorkItem::new("a", 0).to_json().unwrap()).await.unwrap();

        let first = queue.receive(1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(queue.receive(1).await.unwrap().is_empty());

        assert_eq!(queue.redeliver_unacked(), 1);
        let again = queue.receive(1).await.unwrap();
        assert_eq!(again[0].body, first[0].body);
    }

    #[tokio::test]
    async fn test_visibility_extends_only_in_flight_messages() {
        let queue = MemoryQueue::new("crawl");
        queue.send("crawl", &WorkItem::new("a", 0).to_json().unwrap()).await.unwrap();

        let batch = queue.receive(1).await.unwrap();
        assert_ok!(queue.extend_visibility(&batch[0], Duration::from_secs(900)).await);
        assert_eq!(queue.visibility_extensions(), 1);

        queue.ack(&batch[0]).await.unwrap();
        assert!(queue.extend_visibility(&batch[0], Duration::from_secs(900)).await.is_err());
    }

    #[tokio::test]
    async fn test_other_topics_are_not_consumed() {
        let queue = MemoryQueue::new("crawl");
        queue.send("elsewhere", "{}").await.unwrap();
        assert!(queue.receive(5).await.unwrap().is_empty());
        assert_eq!(queue.sent_count(), 1);
    }
}
