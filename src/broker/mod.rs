//! broker
//!
//! The adapter layer between the relay and the message broker. `BrokerAdapter`
//! is the only surface the relay sees; the implementations are:
//!
//! - `JetStreamBroker`: NATS JetStream, durable stream plus durable consumer.
//! - `NatsBroker`: core NATS subjects, fire-and-flush publish.
//! - `MemoryBroker`: in-process channels.
//!
//! `connect` picks one from configuration and returns it as a shared handle.

pub mod adapter;
pub mod jetstream;
pub mod memory;
pub mod nats;

use std::sync::Arc;

use tracing::info;

pub use adapter::{BrokerAdapter, PayloadStream};
pub use jetstream::JetStreamBroker;
pub use memory::MemoryBroker;
pub use nats::NatsBroker;

use crate::config::{BrokerBackend, BrokerSettings};
use crate::utils::RelayError;

/// Connect to the configured backend and declare the relay topic.
///
/// Any error here is fatal: the relay cannot run without its topic.
pub async fn connect(settings: &BrokerSettings) -> Result<Arc<dyn BrokerAdapter>, RelayError> {
    let adapter: Arc<dyn BrokerAdapter> = match settings.backend {
        BrokerBackend::Jetstream => Arc::new(JetStreamBroker::connect(&settings.url).await?),
        BrokerBackend::Nats => Arc::new(NatsBroker::connect(&settings.url).await?),
        BrokerBackend::Memory => Arc::new(MemoryBroker::new()),
    };

    adapter.declare(&settings.topic).await?;
    info!(
        backend = adapter.backend(),
        topic = %settings.topic,
        "broker adapter ready"
    );
    Ok(adapter)
}

#[cfg(test)]
mod tests;
