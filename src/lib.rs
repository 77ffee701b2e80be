//! # broker-relay
//!
//! `broker-relay` bridges browser WebSocket sessions and a message broker.
//! Every data frame a client sends is published to one broker topic; every
//! message the broker delivers on that topic is fanned out to the connected
//! sessions, or only logged, depending on the configured fan-out policy.
//!
//! ## Core Modules
//!
//! - `broker`: The `BrokerAdapter` seam and its NATS JetStream, core NATS and in-memory backends.
//! - `config`: Loads settings from `config/default.toml` and `RELAY__*` environment variables.
//! - `relay`: The coordinator that forwards frames, fans out deliveries and owns shutdown.
//! - `session`: Per-connection handles and the registry of live sessions.
//! - `transport`: The WebSocket listener, origin check, health endpoint and wire message.
//! - `utils`: Shared error type and logging setup.

pub mod broker;
pub mod config;
pub mod relay;
pub mod session;
pub mod transport;
pub mod utils;
