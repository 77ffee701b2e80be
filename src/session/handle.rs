//! Session handle
//!
//! `Session` is the server-side view of one open stream. It holds the sending
//! side of the per-connection queue drained by the write loop, so any task may
//! write to the client without touching the socket. The lifecycle is tracked
//! as an atomic state and a cancellation token derived from the relay's root
//! token.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::utils::RelayError;

pub type SessionId = String;

/// `Open -> Forwarding -> Open`, with `Closed` reachable from both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Forwarding,
    Closed,
}

impl SessionState {
    const OPEN: u8 = 0;
    const FORWARDING: u8 = 1;
    const CLOSED: u8 = 2;

    fn from_u8(raw: u8) -> Self {
        match raw {
            Self::OPEN => SessionState::Open,
            Self::FORWARDING => SessionState::Forwarding,
            _ => SessionState::Closed,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    /// Origin the client declared during the upgrade.
    pub origin: String,
    sender: UnboundedSender<WsMessage>,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl Session {
    /// Create an open session. `cancel` should be a child of the relay's
    /// shutdown token so that closing it never reaches other sessions.
    pub fn new(
        origin: impl Into<String>,
        sender: UnboundedSender<WsMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: format!("session-{}", Uuid::new_v4()),
            origin: origin.into(),
            sender,
            state: AtomicU8::new(SessionState::OPEN),
            cancel,
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Queue a frame for the write loop.
    pub fn send(&self, msg: WsMessage) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::SessionClosed);
        }
        if let Err(e) = self.sender.send(msg) {
            self.close();
            return Err(RelayError::WriteFailed(e.to_string()));
        }
        Ok(())
    }

    /// Mark an inbound frame as in flight. Fails once the session is closed.
    pub fn begin_forwarding(&self) -> Result<(), RelayError> {
        self.state
            .compare_exchange(
                SessionState::OPEN,
                SessionState::FORWARDING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| RelayError::SessionClosed)
    }

    pub fn end_forwarding(&self) {
        // A close that raced the publish wins.
        let _ = self.state.compare_exchange(
            SessionState::FORWARDING,
            SessionState::OPEN,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Tear the session down and cancel its tasks. Returns `true` only for the
    /// call that actually closed it.
    pub fn close(&self) -> bool {
        let previous = self.state.swap(SessionState::CLOSED, Ordering::AcqRel);
        self.cancel.cancel();
        previous != SessionState::CLOSED
    }

    /// Resolves once the session, or the whole relay, is shutting down.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}
