//! In-process broker.
//!
//! One `tokio::sync::broadcast` channel per declared topic. Nothing survives
//! the process; it exists for local runs and for exercising the relay without
//! a NATS server.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::adapter::{BrokerAdapter, PayloadStream};
use crate::utils::RelayError;

/// Per-topic buffer before slow subscribers start lagging.
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct MemoryBroker {
    topics: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &str) -> Option<broadcast::Sender<Vec<u8>>> {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
    }

    /// Drop a topic, ending every live subscription on it.
    pub fn drop_topic(&self, topic: &str) -> bool {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic)
            .is_some()
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.sender(topic).map_or(0, |tx| tx.receiver_count())
    }
}

#[async_trait]
impl BrokerAdapter for MemoryBroker {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn declare(&self, topic: &str) -> Result<(), RelayError> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RelayError> {
        let tx = self
            .sender(topic)
            .ok_or_else(|| RelayError::PublishFailed(format!("topic '{topic}' not declared")))?;
        // A topic without consumers still accepts the message.
        if tx.send(payload).is_err() {
            debug!(topic, "published with no subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, RelayError> {
        let mut rx = self
            .sender(topic)
            .ok_or_else(|| RelayError::SubscribeFailed(format!("topic '{topic}' not declared")))?
            .subscribe();
        let topic = topic.to_string();

        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(payload) => yield Ok(payload),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(topic = %topic, skipped, "subscriber lagged, messages lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        yield Err(RelayError::SubscribeFailed(format!("topic '{topic}' closed")));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
