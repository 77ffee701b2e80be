//! Error taxonomy for the relay.
//!
//! Only `Connect` and `Declare` are fatal, and only at startup. Everything
//! else is scoped to one session or one message and is logged by the caller.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The WebSocket upgrade was refused or could not complete.
    #[error("upgrade failed: {0}")]
    UpgradeFailed(String),

    /// Read or write attempted on a session that has been torn down.
    #[error("session closed")]
    SessionClosed,

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    /// The broker rejected the publish.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// The broker did not acknowledge within the publish deadline.
    #[error("publish not acknowledged within {0:?}")]
    PublishTimeout(Duration),

    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// Payload did not decode as a wire message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("cannot connect to broker: {0}")]
    Connect(String),

    #[error("cannot declare topic: {0}")]
    Declare(String),
}

impl RelayError {
    /// Startup failures end the process; everything else is recoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::Connect(_) | RelayError::Declare(_))
    }
}

impl From<tungstenite::Error> for RelayError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                RelayError::SessionClosed
            }
            other => RelayError::ReadFailed(other.to_string()),
        }
    }
}

impl From<axum::Error> for RelayError {
    fn from(err: axum::Error) -> Self {
        RelayError::ReadFailed(err.to_string())
    }
}
