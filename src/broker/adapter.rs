//! Broker capability shared by every backend.
//!
//! The relay only ever needs three things from a broker: make sure the topic
//! exists, publish bytes to it, and stream bytes back out of it. Which
//! technology sits behind those calls is decided once, at construction.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::utils::RelayError;

/// Raw payloads delivered by a subscription.
///
/// An `Err` item, or the end of the stream, is terminal for that
/// subscription; the caller subscribes again.
pub type PayloadStream = BoxStream<'static, Result<Vec<u8>, RelayError>>;

#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Ensure `topic` exists. Idempotent; durable where the backend allows it.
    async fn declare(&self, topic: &str) -> Result<(), RelayError>;

    /// Hand `payload` to the broker and wait for it to be accepted.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RelayError>;

    /// Register a consumer on `topic`.
    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, RelayError>;

    /// Flush anything buffered toward the broker. Called once on shutdown.
    async fn close(&self) {}

    /// [`publish`](Self::publish) bounded by `deadline`.
    async fn publish_within(
        &self,
        topic: &str,
        payload: Vec<u8>,
        deadline: Duration,
    ) -> Result<(), RelayError> {
        match tokio::time::timeout(deadline, self.publish(topic, payload)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::PublishTimeout(deadline)),
        }
    }
}
