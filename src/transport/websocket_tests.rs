use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::broker::{BrokerAdapter, MemoryBroker};
use crate::config::FanOutPolicy;
use crate::relay::{Relay, RelayOptions};
use crate::transport::origin::OriginPolicy;
use crate::transport::websocket::{WS_PATH, serve};

const TOPIC: &str = "messages";
const ALLOWED: &str = "http://localhost:5173";
const CHAT: &str = r#"{"id":"1","content":"hi","sender":"a","receiver":"b","timestamp":"2024-01-01T00:00:00Z"}"#;
const CHAT_2: &str = r#"{"id":"2","content":"yo","sender":"b","receiver":"a","timestamp":"2024-01-01T00:00:05Z"}"#;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    relay: Arc<Relay>,
    broker: Arc<MemoryBroker>,
    server: JoinHandle<std::io::Result<()>>,
}

async fn start_server(fan_out: FanOutPolicy) -> TestServer {
    let broker = Arc::new(MemoryBroker::new());
    broker.declare(TOPIC).await.unwrap();

    let options = RelayOptions {
        topic: TOPIC.to_string(),
        fan_out,
        drain_timeout: Duration::from_secs(2),
        ..RelayOptions::default()
    };
    let relay = Arc::new(Relay::new(broker.clone(), options));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let origins = OriginPolicy::new([ALLOWED, "http://localhost:5000"]);
    let server = tokio::spawn(serve(listener, relay.clone(), origins));

    TestServer {
        addr,
        relay,
        broker,
        server,
    }
}

async fn connect(addr: SocketAddr, path: &str, origin: Option<&str>) -> Result<Client, WsError> {
    let mut request = format!("ws://{addr}{path}").into_client_request()?;
    if let Some(origin) = origin {
        request
            .headers_mut()
            .insert(ORIGIN, HeaderValue::from_str(origin).unwrap());
    }
    let (ws, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(ws)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn next_text(client: &mut Client) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .expect("read failed");
    frame.into_text().unwrap().as_str().to_string()
}

fn expect_rejection(result: Result<Client, WsError>, status: StatusCode) {
    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status(), status),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("handshake should have been refused"),
    }
}

#[tokio::test]
async fn test_allowed_origin_publishes_exact_payload() {
    let server = start_server(FanOutPolicy::Broadcast).await;
    let mut published = server.broker.subscribe(TOPIC).await.unwrap();

    let mut client = connect(server.addr, WS_PATH, Some(ALLOWED)).await.unwrap();
    client.send(WsMessage::text(CHAT)).await.unwrap();

    let payload = tokio::time::timeout(Duration::from_secs(2), published.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(payload, CHAT.as_bytes());
    assert_eq!(server.relay.session_count(), 1);
    assert_eq!(server.relay.stats().published, 1);
}

#[tokio::test]
async fn test_disallowed_origin_is_refused() {
    let server = start_server(FanOutPolicy::Broadcast).await;

    expect_rejection(
        connect(server.addr, WS_PATH, Some("http://evil.example")).await,
        StatusCode::FORBIDDEN,
    );
    assert_eq!(server.relay.session_count(), 0);
    assert_eq!(server.relay.stats().sessions_opened, 0);
}

#[tokio::test]
async fn test_missing_origin_is_refused() {
    let server = start_server(FanOutPolicy::Broadcast).await;

    expect_rejection(
        connect(server.addr, WS_PATH, None).await,
        StatusCode::FORBIDDEN,
    );
    assert_eq!(server.relay.session_count(), 0);
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let server = start_server(FanOutPolicy::Broadcast).await;

    expect_rejection(
        connect(server.addr, "/chat", Some(ALLOWED)).await,
        StatusCode::NOT_FOUND,
    );
    assert_eq!(server.relay.session_count(), 0);
}

#[tokio::test]
async fn test_echo_mode_returns_frame_to_sender() {
    let server = start_server(FanOutPolicy::Echo).await;

    let mut client = connect(server.addr, WS_PATH, Some(ALLOWED)).await.unwrap();
    client.send(WsMessage::text(CHAT)).await.unwrap();

    assert_eq!(next_text(&mut client).await, CHAT);
}

#[tokio::test]
async fn test_broadcast_reaches_every_session_once() {
    let server = start_server(FanOutPolicy::Broadcast).await;
    server.relay.spawn_subscriber();
    eventually(|| server.broker.subscriber_count(TOPIC) == 1).await;

    let mut a = connect(server.addr, WS_PATH, Some(ALLOWED)).await.unwrap();
    let mut b = connect(server.addr, WS_PATH, Some(ALLOWED)).await.unwrap();
    let mut c = connect(server.addr, WS_PATH, Some(ALLOWED)).await.unwrap();
    eventually(|| server.relay.session_count() == 3).await;

    a.send(WsMessage::text(CHAT)).await.unwrap();

    assert_eq!(next_text(&mut a).await, CHAT);
    assert_eq!(next_text(&mut b).await, CHAT);
    assert_eq!(next_text(&mut c).await, CHAT);

    let again = tokio::time::timeout(Duration::from_millis(200), b.next()).await;
    assert!(again.is_err(), "b received a second copy");
}

#[tokio::test]
async fn test_closing_one_session_leaves_others_working() {
    let server = start_server(FanOutPolicy::Broadcast).await;
    server.relay.spawn_subscriber();
    eventually(|| server.broker.subscriber_count(TOPIC) == 1).await;

    let mut a = connect(server.addr, WS_PATH, Some(ALLOWED)).await.unwrap();
    let mut b = connect(server.addr, WS_PATH, Some(ALLOWED)).await.unwrap();
    let mut c = connect(server.addr, WS_PATH, Some(ALLOWED)).await.unwrap();
    eventually(|| server.relay.session_count() == 3).await;

    a.close(None).await.unwrap();
    eventually(|| server.relay.session_count() == 2).await;

    b.send(WsMessage::text(CHAT_2)).await.unwrap();
    assert_eq!(next_text(&mut b).await, CHAT_2);
    assert_eq!(next_text(&mut c).await, CHAT_2);
    assert_eq!(server.relay.stats().sessions_closed, 1);
}

async fn read_health(mut stream: TcpStream) -> String {
    let mut raw = String::new();
    tokio::time::timeout(Duration::from_secs(2), stream.read_to_string(&mut raw))
        .await
        .expect("no health response")
        .unwrap();
    raw
}

fn assert_health_ok(raw: &str) {
    assert!(raw.starts_with("HTTP/1.1 200 OK"), "unexpected response: {raw}");
    let body = raw.split("\r\n\r\n").nth(1).unwrap();
    let value: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["service"], "broker-service");
}

#[tokio::test]
async fn test_health_endpoint_shares_listener() {
    let server = start_server(FanOutPolicy::Broadcast).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    assert_health_ok(&read_health(stream).await);
    assert_eq!(server.relay.session_count(), 0);
}

#[tokio::test]
async fn test_health_request_split_across_writes() {
    let server = start_server(FanOutPolicy::Broadcast).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"GET /hea").await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream
        .write_all(b"lth HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    assert_health_ok(&read_health(stream).await);
}

#[tokio::test]
async fn test_idle_connection_does_not_delay_shutdown() {
    let server = start_server(FanOutPolicy::Broadcast).await;
    let _idle = TcpStream::connect(server.addr).await.unwrap();
    let mut half = TcpStream::connect(server.addr).await.unwrap();
    half.write_all(b"GET /ws HTTP/1.1\r\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Well under the two second drain timeout.
    tokio::time::timeout(Duration::from_millis(500), server.relay.shutdown())
        .await
        .expect("shutdown waited on a connection that never upgraded");
}

#[tokio::test]
async fn test_shutdown_closes_sessions_and_listener() {
    let server = start_server(FanOutPolicy::Broadcast).await;
    let mut client = connect(server.addr, WS_PATH, Some(ALLOWED)).await.unwrap();
    eventually(|| server.relay.session_count() == 1).await;

    server.relay.shutdown().await;

    tokio::time::timeout(Duration::from_secs(2), server.server)
        .await
        .expect("listener did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(server.relay.session_count(), 0);

    let last = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("client was not disconnected");
    assert!(!matches!(last, Some(Ok(WsMessage::Text(_)))));
    assert!(TcpStream::connect(server.addr).await.is_err());
}
