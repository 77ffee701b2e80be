//! Background subscriber: the single long-lived consumer of the relay topic.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{error, info, warn};

use super::coordinator::Relay;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberExit {
    /// The relay is shutting down.
    Shutdown,
    /// Re-subscription gave up after this many consecutive failures; the
    /// relay keeps publishing without a consumer.
    Degraded { failures: u32 },
}

/// Consume the relay topic until shutdown.
///
/// A subscription that errors or ends is replaced after an exponential
/// backoff. The failure count resets whenever a message arrives, so only a
/// broker that keeps refusing leads to publish-only mode.
pub async fn run(relay: Arc<Relay>) -> SubscriberExit {
    let topic = relay.options().topic.clone();
    let policy = relay.options().resubscribe.clone();
    let shutdown = relay.shutdown_token().clone();
    let mut failures: u32 = 0;

    loop {
        if failures > 0 {
            if failures > policy.max_attempts {
                error!(
                    topic = %topic,
                    failures,
                    "subscription lost for good, continuing in publish-only mode"
                );
                relay.enter_publish_only();
                return SubscriberExit::Degraded { failures };
            }

            let delay = policy.backoff(failures);
            warn!(topic = %topic, attempt = failures, ?delay, "re-subscribing");
            tokio::select! {
                _ = shutdown.cancelled() => return SubscriberExit::Shutdown,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let subscribed = tokio::select! {
            _ = shutdown.cancelled() => return SubscriberExit::Shutdown,
            subscribed = relay.adapter().subscribe(&topic) => subscribed,
        };
        let mut stream = match subscribed {
            Ok(stream) => stream,
            Err(e) => {
                warn!(topic = %topic, error = %e, "subscribe failed");
                failures += 1;
                continue;
            }
        };
        info!(topic = %topic, backend = relay.adapter().backend(), "waiting for messages");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return SubscriberExit::Shutdown,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(payload)) => {
                    failures = 0;
                    relay.deliver(payload).await;
                }
                Some(Err(e)) => {
                    warn!(topic = %topic, error = %e, "subscription failed");
                    break;
                }
                None => {
                    warn!(topic = %topic, "subscription ended");
                    break;
                }
            }
        }
        failures += 1;
    }
}
