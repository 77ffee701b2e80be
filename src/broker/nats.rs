//! Core NATS backend: plain subjects, best-effort delivery.

use async_nats::Client;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::adapter::{BrokerAdapter, PayloadStream};
use crate::utils::RelayError;

/// Publishes and subscribes on NATS subjects.
///
/// `async_nats::Client` is a cheap handle onto one multiplexed connection and
/// is safe to share between tasks, so every session publishes through the
/// same clone.
#[derive(Debug, Clone)]
pub struct NatsBroker {
    client: Client,
}

impl NatsBroker {
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| RelayError::Connect(format!("{url}: {e}")))?;
        info!(url, "connected to NATS");
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BrokerAdapter for NatsBroker {
    fn backend(&self) -> &'static str {
        "nats"
    }

    async fn declare(&self, topic: &str) -> Result<(), RelayError> {
        // Subjects exist as soon as someone uses them.
        debug!(topic, "core NATS subjects need no declaration");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RelayError> {
        self.client
            .publish(topic.to_string(), payload.into())
            .await
            .map_err(|e| RelayError::PublishFailed(e.to_string()))?;
        // Flush so that returning means the server has the bytes.
        self.client
            .flush()
            .await
            .map_err(|e| RelayError::PublishFailed(e.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, RelayError> {
        let subscriber = self
            .client
            .subscribe(topic.to_string())
            .await
            .map_err(|e| RelayError::SubscribeFailed(e.to_string()))?;
        info!(topic, "subscribed to NATS subject");
        Ok(Box::pin(
            subscriber.map(|message| Ok(message.payload.to_vec())),
        ))
    }

    async fn close(&self) {
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "failed to flush NATS connection on shutdown");
        }
    }
}
