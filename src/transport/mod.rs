//! The `transport` module is responsible for the client-facing side of the
//! relay: the axum listener, the WebSocket upgrade with its origin check, the
//! health endpoint, and the per-session read and write loops.
//!
//! It also defines the wire message clients exchange, which the relay only
//! decodes on a best-effort basis.

pub mod health;
pub mod message;
pub mod origin;
pub mod websocket;

#[cfg(test)]
mod websocket_tests;

pub use message::ChatMessage;
pub use origin::OriginPolicy;
pub use websocket::{admit, router, run_session, serve, start_websocket_server};
