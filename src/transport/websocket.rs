//! WebSocket transport
//!
//! This file implements the relay's listener and the per-connection loops.
//! Responsibilities:
//! - Route `GET /health` and `GET /ws` on one axum listener
//! - Refuse the `/ws` upgrade unless the declared `Origin` is allowed
//! - Register a `Session` with the `Relay` for each upgraded connection
//! - Run one read loop (frames -> relay) and one write loop (queue -> socket)
//!   per session, and tear both down together

use std::fmt::Display;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{
    CloseFrame as AxumCloseFrame, Message as AxumMessage, WebSocket, WebSocketUpgrade,
};
use axum::http::header::ORIGIN;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::future;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::{CloseFrame, Message as WsMessage};

use crate::relay::Relay;
use crate::transport::health::{self, HEALTH_PATH};
use crate::transport::origin::OriginPolicy;
use crate::utils::RelayError;

pub const WS_PATH: &str = "/ws";

/// Shared state handed to the axum handlers.
#[derive(Clone)]
pub struct TransportState {
    relay: Arc<Relay>,
    origins: Arc<OriginPolicy>,
}

/// Build the router: `/health`, `/ws`, and 404 for everything else.
pub fn router(relay: Arc<Relay>, origins: OriginPolicy) -> Router {
    let state = TransportState {
        relay,
        origins: Arc::new(origins),
    };

    Router::new()
        .route(HEALTH_PATH, get(health::health_handler))
        .route(WS_PATH, get(ws_handler))
        .with_state(state)
}

/// Bind `addr` and serve until the relay shuts down.
pub async fn start_websocket_server(
    addr: &str,
    relay: Arc<Relay>,
    origins: OriginPolicy,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, relay, origins).await
}

/// Accept connections on `listener` until the relay's shutdown token fires.
///
/// Connections that have not upgraded yet belong to the HTTP server, not to
/// the relay's task tracker, so an idle client never holds up the drain.
pub async fn serve(
    listener: TcpListener,
    relay: Arc<Relay>,
    origins: OriginPolicy,
) -> std::io::Result<()> {
    let local = listener.local_addr()?;
    info!("relay listening on ws://{local}{WS_PATH}");
    info!(origins = ?origins.allowed(), "accepting connections from");

    let shutdown = relay.shutdown_token().clone();
    axum::serve(listener, router(relay, origins))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("listener stopped");
        })
        .await
}

/// Check the `Origin` header of an upgrade request. Returns the accepted origin.
pub fn admit(origins: &OriginPolicy, headers: &HeaderMap) -> Result<String, RelayError> {
    match headers.get(ORIGIN).and_then(|value| value.to_str().ok()) {
        Some(origin) if origins.allows(Some(origin)) => Ok(origin.to_string()),
        Some(origin) => Err(RelayError::UpgradeFailed(format!(
            "origin '{origin}' not allowed"
        ))),
        None => Err(RelayError::UpgradeFailed("missing origin".to_string())),
    }
}

/// GET /ws
async fn ws_handler(
    State(state): State<TransportState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = match admit(&state.origins, &headers) {
        Ok(origin) => origin,
        Err(e) => {
            warn!(error = %e, "rejected connection");
            return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
        }
    };

    let relay = state.relay;
    let tasks = relay.tasks().clone();
    ws.on_upgrade(move |socket| tasks.track_future(handle_socket(relay, socket, origin)))
}

async fn handle_socket(relay: Arc<Relay>, socket: WebSocket, origin: String) {
    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: WsMessage| future::ready(into_axum(frame)));
    let stream = stream.map(|frame| frame.map(from_axum));
    run_session(relay, sink, stream, origin).await;
}

pub(crate) fn from_axum(frame: AxumMessage) -> WsMessage {
    match frame {
        AxumMessage::Text(text) => WsMessage::text(text.as_str().to_owned()),
        AxumMessage::Binary(data) => WsMessage::Binary(data),
        AxumMessage::Ping(data) => WsMessage::Ping(data),
        AxumMessage::Pong(data) => WsMessage::Pong(data),
        AxumMessage::Close(frame) => WsMessage::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
    }
}

pub(crate) fn into_axum(frame: WsMessage) -> Result<AxumMessage, axum::Error> {
    Ok(match frame {
        WsMessage::Text(text) => AxumMessage::Text(text.as_str().to_owned().into()),
        WsMessage::Binary(data) => AxumMessage::Binary(data),
        WsMessage::Ping(data) => AxumMessage::Ping(data),
        WsMessage::Pong(data) => AxumMessage::Pong(data),
        WsMessage::Close(frame) => AxumMessage::Close(frame.map(|f| AxumCloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().to_owned().into(),
        })),
        WsMessage::Frame(_) => return Err(axum::Error::new("raw frames are not relayed")),
    })
}

/// Drive one session from open to closed.
///
/// The write loop is the only owner of the socket sink; everything else,
/// including the subscriber's broadcasts, goes through the session queue. A
/// failure on either side closes the session, which stops the other loop.
pub async fn run_session<W, R, E>(
    relay: Arc<Relay>,
    mut ws_sender: W,
    mut ws_receiver: R,
    origin: String,
) where
    W: Sink<WsMessage> + Unpin + Send + 'static,
    W::Error: Display + Send,
    R: Stream<Item = Result<WsMessage, E>> + Unpin + Send,
    E: Into<RelayError> + Send,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let session = relay.open_session(&origin, tx).await;

    let writer = {
        let session = session.clone();
        relay.tasks().spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = session.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };
                if let Err(e) = ws_sender.send(msg).await {
                    warn!(session_id = %session.id, error = %e, "write failed, closing session");
                    break;
                }
            }
            session.close();
            let _ = ws_sender.close().await;
            debug!(session_id = %session.id, "write loop closed");
        })
    };

    loop {
        let next = tokio::select! {
            _ = session.cancelled() => break,
            next = ws_receiver.next() => next,
        };

        match next {
            Some(Ok(msg)) if msg.is_close() => {
                debug!(session_id = %session.id, "client sent close");
                break;
            }
            Some(Ok(msg)) => {
                if let Err(e) = relay.handle_frame(&session, msg).await {
                    debug!(session_id = %session.id, error = %e, "stopping read loop");
                    break;
                }
            }
            Some(Err(e)) => {
                let e: RelayError = e.into();
                warn!(session_id = %session.id, error = %e, "read failed");
                break;
            }
            None => break,
        }
    }

    relay.close_session(&session).await;
    let _ = writer.await;
}
