//! Relay engine
//!
//! `Relay` owns everything shared between connections: the broker adapter,
//! the session registry, the shutdown token and the task tracker. It is
//! created once, wrapped in an `Arc`, and handed to the transport and to the
//! background subscriber.
//!
//! - Inbound: every data frame read from a session is published to the relay
//!   topic. A failed or timed-out publish is counted, logged and dropped; the
//!   session carries on. Frames are published one at a time per session, in
//!   the order they were read.
//! - Outbound: what happens to broker deliveries depends on the configured
//!   [`FanOutPolicy`]. `Broadcast` writes each one to every open session;
//!   `Echo` writes the inbound frame straight back to its sender and only
//!   logs broker deliveries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::BrokerAdapter;
use crate::config::{FanOutPolicy, Settings};
use crate::session::{Session, SessionRegistry};
use crate::transport::message::{ChatMessage, frame_payload, payload_frame};
use crate::utils::RelayError;

use super::subscriber::{self, SubscriberExit};

/// Re-subscription schedule for the background subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failed attempts tolerated before giving up.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

    /// Delay before the `attempt`-th retry (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub topic: String,
    pub publish_timeout: Duration,
    pub fan_out: FanOutPolicy,
    pub resubscribe: RetryPolicy,
    pub drain_timeout: Duration,
}

impl RelayOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            topic: settings.broker.topic.clone(),
            publish_timeout: settings.broker.publish_timeout(),
            fan_out: settings.relay.fan_out,
            resubscribe: RetryPolicy {
                max_attempts: settings.broker.resubscribe_attempts,
                initial_backoff: settings.broker.resubscribe_backoff(),
                max_backoff: RetryPolicy::MAX_BACKOFF,
            },
            drain_timeout: settings.relay.drain_timeout(),
        }
    }
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// What became of one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// The broker refused it or timed out; the frame is gone.
    Dropped,
    /// Control frame, nothing to publish.
    Ignored,
}

/// What became of one broker delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to this many sessions.
    Broadcast(usize),
    /// Echo mode: logged only.
    Logged,
    /// Did not decode as a chat message.
    Skipped,
}

#[derive(Debug, Default)]
struct RelayStats {
    published: AtomicU64,
    publish_failures: AtomicU64,
    publish_timeouts: AtomicU64,
    delivered: AtomicU64,
    malformed: AtomicU64,
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
}

/// Point-in-time copy of the relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub published: u64,
    pub publish_failures: u64,
    pub publish_timeouts: u64,
    /// Broker messages written to sessions, counted per recipient.
    pub delivered: u64,
    pub malformed: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

pub struct Relay {
    adapter: Arc<dyn BrokerAdapter>,
    registry: SessionRegistry,
    options: RelayOptions,
    stats: RelayStats,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    publish_only: AtomicBool,
}

impl Relay {
    pub fn new(adapter: Arc<dyn BrokerAdapter>, options: RelayOptions) -> Self {
        Self {
            adapter,
            registry: SessionRegistry::new(),
            options,
            stats: RelayStats::default(),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            publish_only: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    pub fn adapter(&self) -> &Arc<dyn BrokerAdapter> {
        &self.adapter
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Tracks every connection and subscriber task so shutdown can wait on them.
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// True once the subscriber has given up; sessions can still publish.
    pub fn is_publish_only(&self) -> bool {
        self.publish_only.load(Ordering::Acquire)
    }

    pub(crate) fn enter_publish_only(&self) {
        self.publish_only.store(true, Ordering::Release);
    }

    pub fn stats(&self) -> StatsSnapshot {
        let s = &self.stats;
        StatsSnapshot {
            published: s.published.load(Ordering::Relaxed),
            publish_failures: s.publish_failures.load(Ordering::Relaxed),
            publish_timeouts: s.publish_timeouts.load(Ordering::Relaxed),
            delivered: s.delivered.load(Ordering::Relaxed),
            malformed: s.malformed.load(Ordering::Relaxed),
            sessions_opened: s.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: s.sessions_closed.load(Ordering::Relaxed),
        }
    }

    /// Register a new session whose frames are drained from `sender`'s queue.
    pub async fn open_session(
        &self,
        origin: &str,
        sender: UnboundedSender<WsMessage>,
    ) -> Arc<Session> {
        let session = Arc::new(Session::new(origin, sender, self.shutdown.child_token()));
        self.registry.insert(session.clone()).await;
        bump(&self.stats.sessions_opened, 1);
        info!(session_id = %session.id, origin, "session opened");
        session
    }

    /// Close `session`, cancel its tasks and forget it. Safe to call twice.
    ///
    /// A session is counted as closed when it leaves the registry, whichever
    /// path closed it first: this call, a failed write, or broadcast pruning.
    pub async fn close_session(&self, session: &Session) {
        session.close();
        if self.registry.remove(&session.id).await.is_some() {
            bump(&self.stats.sessions_closed, 1);
            info!(session_id = %session.id, "session closed");
        }
    }

    /// Publish one frame read from `session`.
    ///
    /// Broker failures are absorbed here and reported through the outcome;
    /// only a closed session is an error.
    pub async fn handle_frame(
        &self,
        session: &Session,
        frame: WsMessage,
    ) -> Result<PublishOutcome, RelayError> {
        let Some(payload) = frame_payload(&frame) else {
            return Ok(PublishOutcome::Ignored);
        };

        session.begin_forwarding()?;

        match ChatMessage::decode(&payload) {
            Ok(msg) => debug!(
                session_id = %session.id,
                message_id = %msg.id,
                sender = %msg.sender,
                receiver = %msg.receiver,
                "forwarding chat message"
            ),
            Err(e) => debug!(
                session_id = %session.id,
                error = %e,
                bytes = payload.len(),
                "forwarding opaque frame"
            ),
        }

        let outcome = match self
            .adapter
            .publish_within(&self.options.topic, payload, self.options.publish_timeout)
            .await
        {
            Ok(()) => {
                bump(&self.stats.published, 1);
                PublishOutcome::Published
            }
            Err(e) => {
                if matches!(e, RelayError::PublishTimeout(_)) {
                    bump(&self.stats.publish_timeouts, 1);
                } else {
                    bump(&self.stats.publish_failures, 1);
                }
                warn!(
                    session_id = %session.id,
                    topic = %self.options.topic,
                    error = %e,
                    "publish failed, message dropped"
                );
                PublishOutcome::Dropped
            }
        };

        let echoed = match self.options.fan_out {
            FanOutPolicy::Echo => session.send(frame),
            FanOutPolicy::Broadcast => Ok(()),
        };
        session.end_forwarding();
        echoed?;

        Ok(outcome)
    }

    /// Route one payload delivered by the broker.
    pub async fn deliver(&self, payload: Vec<u8>) -> Delivery {
        let msg = match ChatMessage::decode(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                bump(&self.stats.malformed, 1);
                let preview: String = String::from_utf8_lossy(&payload).chars().take(100).collect();
                warn!(error = %e, preview = %preview, "skipping malformed broker message");
                return Delivery::Skipped;
            }
        };

        match self.options.fan_out {
            FanOutPolicy::Broadcast => {
                let fan_out = self.registry.broadcast(&payload_frame(payload)).await;
                let recipients = fan_out.delivered;
                bump(&self.stats.delivered, recipients as u64);
                if fan_out.pruned > 0 {
                    bump(&self.stats.sessions_closed, fan_out.pruned as u64);
                    info!(sessions = fan_out.pruned, "closed sessions pruned during broadcast");
                }
                debug!(message_id = %msg.id, recipients, "broker message broadcast");
                Delivery::Broadcast(recipients)
            }
            FanOutPolicy::Echo => {
                info!(
                    message_id = %msg.id,
                    sender = %msg.sender,
                    receiver = %msg.receiver,
                    timestamp = %msg.timestamp,
                    "received message"
                );
                Delivery::Logged
            }
        }
    }

    /// Start the background subscriber on the relay's task tracker.
    pub fn spawn_subscriber(self: &Arc<Self>) -> JoinHandle<SubscriberExit> {
        self.tasks.spawn(subscriber::run(self.clone()))
    }

    /// Stop accepting work, give in-flight publishes `drain_timeout` to
    /// finish, then close whatever is left.
    pub async fn shutdown(&self) {
        info!("relay shutting down");
        self.shutdown.cancel();
        self.tasks.close();

        if tokio::time::timeout(self.options.drain_timeout, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.tasks.len(),
                "drain timed out, abandoning in-flight work"
            );
        }

        let closed = self.registry.close_all().await;
        bump(&self.stats.sessions_closed, closed as u64);
        self.adapter.close().await;
        info!(sessions = closed, "relay stopped");
    }
}
