use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::{BrokerAdapter, JetStreamBroker, MemoryBroker, PayloadStream, connect};
use crate::config::{BrokerBackend, Settings};
use crate::utils::RelayError;

/// Never acknowledges a publish.
struct StallingBroker;

#[async_trait]
impl BrokerAdapter for StallingBroker {
    fn backend(&self) -> &'static str {
        "stalling"
    }

    async fn declare(&self, _topic: &str) -> Result<(), RelayError> {
        Ok(())
    }

    async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), RelayError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn subscribe(&self, _topic: &str) -> Result<PayloadStream, RelayError> {
        Ok(Box::pin(futures::stream::pending::<Result<Vec<u8>, RelayError>>()))
    }
}

#[tokio::test]
async fn test_memory_declare_is_idempotent() {
    let broker = MemoryBroker::new();
    broker.declare("messages").await.unwrap();
    let _sub = broker.subscribe("messages").await.unwrap();
    broker.declare("messages").await.unwrap();

    // Re-declaring must not replace the channel under a live subscriber.
    assert_eq!(broker.subscriber_count("messages"), 1);
}

#[tokio::test]
async fn test_memory_requires_declared_topic() {
    let broker = MemoryBroker::new();
    assert!(matches!(
        broker.publish("messages", b"x".to_vec()).await,
        Err(RelayError::PublishFailed(_))
    ));
    assert!(matches!(
        broker.subscribe("messages").await,
        Err(RelayError::SubscribeFailed(_))
    ));
}

#[tokio::test]
async fn test_memory_publish_without_subscribers_succeeds() {
    let broker = MemoryBroker::new();
    broker.declare("messages").await.unwrap();
    broker.publish("messages", b"lost".to_vec()).await.unwrap();
}

#[tokio::test]
async fn test_memory_delivers_to_every_subscription_in_order() {
    let broker = MemoryBroker::new();
    broker.declare("messages").await.unwrap();
    let mut first = broker.subscribe("messages").await.unwrap();
    let mut second = broker.subscribe("messages").await.unwrap();

    broker.publish("messages", b"one".to_vec()).await.unwrap();
    broker.publish("messages", b"two".to_vec()).await.unwrap();

    for sub in [&mut first, &mut second] {
        assert_eq!(sub.next().await.unwrap().unwrap(), b"one".to_vec());
        assert_eq!(sub.next().await.unwrap().unwrap(), b"two".to_vec());
    }
}

#[tokio::test]
async fn test_memory_dropped_topic_ends_subscription() {
    let broker = MemoryBroker::new();
    broker.declare("messages").await.unwrap();
    let mut sub = broker.subscribe("messages").await.unwrap();

    assert!(broker.drop_topic("messages"));
    assert!(matches!(
        sub.next().await,
        Some(Err(RelayError::SubscribeFailed(_)))
    ));
    assert!(sub.next().await.is_none());
}

#[tokio::test]
async fn test_memory_topics_are_isolated() {
    let broker = MemoryBroker::new();
    broker.declare("a").await.unwrap();
    broker.declare("b").await.unwrap();
    let mut sub_b = broker.subscribe("b").await.unwrap();

    broker.publish("a", b"for-a".to_vec()).await.unwrap();
    broker.publish("b", b"for-b".to_vec()).await.unwrap();

    assert_eq!(sub_b.next().await.unwrap().unwrap(), b"for-b".to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_publish_within_times_out() {
    let broker = StallingBroker;
    let deadline = Duration::from_secs(5);
    let result = broker
        .publish_within("messages", b"x".to_vec(), deadline)
        .await;
    assert!(matches!(result, Err(RelayError::PublishTimeout(d)) if d == deadline));
}

#[tokio::test]
async fn test_publish_within_passes_through_success() {
    let broker = MemoryBroker::new();
    broker.declare("messages").await.unwrap();
    broker
        .publish_within("messages", b"x".to_vec(), Duration::from_secs(1))
        .await
        .unwrap();
}

#[test]
fn test_jetstream_names() {
    assert_eq!(JetStreamBroker::stream_name("messages"), "MESSAGES");
    assert_eq!(JetStreamBroker::stream_name("chat.room-1"), "CHAT_ROOM_1");
    assert_eq!(JetStreamBroker::consumer_name("messages"), "relay-messages");
}

#[tokio::test]
async fn test_connect_memory_declares_topic() {
    let mut settings = Settings::default().broker;
    settings.backend = BrokerBackend::Memory;

    let adapter = connect(&settings).await.unwrap();
    assert_eq!(adapter.backend(), "memory");
    // Topic exists, so publishing works straight away.
    adapter
        .publish(&settings.topic, b"ready".to_vec())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_connect_unreachable_broker_is_fatal() {
    let mut settings = Settings::default().broker;
    settings.backend = BrokerBackend::Nats;
    settings.url = "nats://127.0.0.1:1".to_string();

    match connect(&settings).await {
        Err(err) => {
            assert!(matches!(err, RelayError::Connect(_)));
            assert!(err.is_fatal());
        }
        Ok(_) => panic!("connecting to a closed port must fail"),
    }
}

mod nats_server {
    //! Run with a local server: `nats-server -js`, then
    //! `cargo test -- --ignored`. `NATS_URL` overrides the address.

    use std::time::Duration;

    use futures::StreamExt;
    use uuid::Uuid;

    use crate::broker::{BrokerAdapter, JetStreamBroker, NatsBroker, PayloadStream};

    fn nats_url() -> String {
        std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string())
    }

    fn unique_topic() -> String {
        format!("relay_it_{}", Uuid::new_v4().simple())
    }

    async fn next_payload(stream: &mut PayloadStream) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("no delivery within 5s")
            .expect("subscription ended")
            .expect("subscription failed")
    }

    #[tokio::test]
    #[ignore = "Requires NATS server with JetStream"]
    async fn test_jetstream_publish_is_acked_and_consumer_resumes() {
        let url = nats_url();
        let topic = unique_topic();
        let broker = JetStreamBroker::connect(&url).await.unwrap();

        broker.declare(&topic).await.unwrap();
        broker.declare(&topic).await.unwrap();

        let mut stream = broker.subscribe(&topic).await.unwrap();
        broker.publish(&topic, b"one".to_vec()).await.unwrap();
        broker.publish(&topic, b"two".to_vec()).await.unwrap();
        assert_eq!(next_payload(&mut stream).await, b"one");
        assert_eq!(next_payload(&mut stream).await, b"two");
        drop(stream);

        // Stored while nobody consumes; the durable consumer picks it up.
        broker.publish(&topic, b"three".to_vec()).await.unwrap();
        let mut resumed = broker.subscribe(&topic).await.unwrap();
        assert_eq!(next_payload(&mut resumed).await, b"three");
        drop(resumed);

        broker.close().await;
        let client = async_nats::connect(&url).await.unwrap();
        async_nats::jetstream::new(client)
            .delete_stream(JetStreamBroker::stream_name(&topic))
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires NATS server"]
    async fn test_core_nats_publish_reaches_subscriber() {
        let topic = unique_topic();
        let broker = NatsBroker::connect(&nats_url()).await.unwrap();
        broker.declare(&topic).await.unwrap();

        let mut stream = broker.subscribe(&topic).await.unwrap();
        broker.publish(&topic, b"hello".to_vec()).await.unwrap();
        assert_eq!(next_payload(&mut stream).await, b"hello");

        broker.close().await;
    }
}
