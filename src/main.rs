//! CLI for broker-relay
//!
//! Subcommands:
//! - `server`: run the relay
//! - `client`: connect, send one chat message and print what comes back (useful for smoke tests)

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use broker_relay::broker;
use broker_relay::config::load_config;
use broker_relay::relay::{Relay, RelayOptions};
use broker_relay::transport::{OriginPolicy, start_websocket_server};
use broker_relay::utils::logging;
use clap::Parser;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "broker-relay")]
enum Command {
    /// Start the relay
    Server,
    /// Send one chat message through a running relay
    Client {
        /// Relay URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:5003/ws")]
        url: String,
        /// Origin header to present
        #[arg(long, default_value = "http://localhost:5173")]
        origin: String,
        /// Message content
        #[arg(long, default_value = "Hello from broker-relay")]
        content: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    match Command::parse() {
        Command::Server => match run_server().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Relay failed: {}", e);
                ExitCode::FAILURE
            }
        },
        Command::Client {
            url,
            origin,
            content,
        } => {
            logging::init("info");
            if let Err(e) = run_client(&url, &origin, &content).await {
                error!("Client failed: {}", e);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            return Err(e.into());
        }
    };
    logging::init(&config.log.level);

    let adapter = broker::connect(&config.broker).await?;
    let relay = Arc::new(Relay::new(adapter, RelayOptions::from_settings(&config)));
    relay.spawn_subscriber();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let origins = OriginPolicy::new(&config.server.allowed_origins);

    tokio::select! {
        result = start_websocket_server(&addr, relay.clone(), origins) => {
            if let Err(e) = result {
                relay.shutdown().await;
                return Err(e.into());
            }
            error!("Listener exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Draining sessions.");
        }
    }

    relay.shutdown().await;
    Ok(())
}

async fn run_client(url: &str, origin: &str, content: &str) -> Result<(), Box<dyn std::error::Error>> {
    use broker_relay::transport::ChatMessage;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::HeaderValue;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let mut request = url.into_client_request()?;
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_str(origin)?);
    let (mut ws_stream, _response) = connect_async(request).await?;

    let message = ChatMessage {
        id: uuid::Uuid::new_v4().to_string(),
        content: content.to_string(),
        sender: "cli".to_string(),
        receiver: "all".to_string(),
        timestamp: chrono::Utc::now(),
    };
    ws_stream
        .send(WsMessage::binary(message.encode()?))
        .await?;
    println!("Sent: {}", message.id);

    // Broadcast mode sends our own message back; echo mode returns the frame.
    match tokio::time::timeout(Duration::from_secs(5), ws_stream.next()).await {
        Ok(Some(Ok(incoming))) if incoming.is_text() || incoming.is_binary() => {
            println!("Incoming: {}", String::from_utf8_lossy(&incoming.into_data()));
        }
        Ok(Some(Err(e))) => return Err(e.into()),
        _ => println!("No reply within 5s"),
    }

    ws_stream.close(None).await?;
    Ok(())
}
