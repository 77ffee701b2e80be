//! # NATS JetStream backend
//!
//! Queue-style, durable delivery. The topic is bound to a file-backed stream
//! that is created on first declaration and reused afterwards, and
//! subscriptions go through a durable pull consumer so that a restarted relay
//! resumes where it stopped.

use async_nats::Client;
use async_nats::jetstream::{self, Context as JetStreamContext};
use async_nats::jetstream::consumer::pull::Config as PullConsumerConfig;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy};
use async_nats::jetstream::stream::{Config as StreamConfig, StorageType};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{error, info, warn};

use super::adapter::{BrokerAdapter, PayloadStream};
use crate::utils::RelayError;

#[derive(Debug, Clone)]
pub struct JetStreamBroker {
    client: Client,
    jetstream: JetStreamContext,
}

impl JetStreamBroker {
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| RelayError::Connect(format!("{url}: {e}")))?;
        info!(url, "connected to NATS JetStream");
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self { client, jetstream }
    }

    /// Stream backing `topic`: `messages` -> `MESSAGES`, `chat.room-1` -> `CHAT_ROOM_1`.
    pub fn stream_name(topic: &str) -> String {
        topic
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Durable consumer name for `topic`.
    pub fn consumer_name(topic: &str) -> String {
        format!("relay-{}", Self::stream_name(topic).to_lowercase())
    }
}

#[async_trait]
impl BrokerAdapter for JetStreamBroker {
    fn backend(&self) -> &'static str {
        "jetstream"
    }

    async fn declare(&self, topic: &str) -> Result<(), RelayError> {
        let name = Self::stream_name(topic);
        let config = StreamConfig {
            name: name.clone(),
            subjects: vec![topic.to_string()],
            description: Some(format!("Relay stream for '{topic}'")),
            storage: StorageType::File,
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| RelayError::Declare(format!("{name}: {e}")))?;
        info!(stream = %name, topic, "stream ready");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), RelayError> {
        let ack = self
            .jetstream
            .publish(topic.to_string(), payload.into())
            .await
            .map_err(|e| RelayError::PublishFailed(e.to_string()))?;

        // Wait for ack (confirms message was stored)
        ack.await
            .map_err(|e| RelayError::PublishFailed(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, RelayError> {
        let stream_name = Self::stream_name(topic);
        let durable = Self::consumer_name(topic);

        let stream = self
            .jetstream
            .get_stream(&stream_name)
            .await
            .map_err(|e| RelayError::SubscribeFailed(format!("{stream_name}: {e}")))?;

        let consumer = stream
            .get_or_create_consumer(
                &durable,
                PullConsumerConfig {
                    durable_name: Some(durable.clone()),
                    deliver_policy: DeliverPolicy::New,
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| RelayError::SubscribeFailed(format!("{durable}: {e}")))?;

        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| RelayError::SubscribeFailed(e.to_string()))?;
        info!(stream = %stream_name, consumer = %durable, "consuming");

        let stream = async_stream::stream! {
            while let Some(result) = messages.next().await {
                match result {
                    Ok(message) => {
                        // Acknowledged on receipt: the relay does not redeliver.
                        if let Err(e) = message.ack().await {
                            warn!(error = %e, "failed to ack message");
                        }
                        yield Ok(message.payload.to_vec());
                    }
                    Err(e) => {
                        error!(error = %e, "error receiving message");
                        yield Err(RelayError::SubscribeFailed(e.to_string()));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn close(&self) {
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "failed to flush NATS connection on shutdown");
        }
    }
}
