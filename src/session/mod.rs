//! The `session` module defines the server-side representation of a client
//! connection and the registry that tracks every open one.

pub mod handle;
pub mod registry;

pub use handle::{Session, SessionId, SessionState};
pub use registry::{FanOut, SessionRegistry};
