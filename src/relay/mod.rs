//! relay
//!
//! The coordinator between client sessions and the broker adapter: publishes
//! what sessions send, fans out what the broker delivers, and keeps the
//! background subscriber alive.

pub mod coordinator;
pub mod subscriber;

pub use coordinator::{
    Delivery, PublishOutcome, Relay, RelayOptions, RetryPolicy, StatsSnapshot,
};
pub use subscriber::SubscriberExit;
