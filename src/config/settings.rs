use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the relay.
///
/// Includes settings for the listening server, the broker backend, the
/// relay fan-out policy and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub relay: RelaySettings,
    pub log: LogSettings,
}

/// Configuration settings for the server.
///
/// Defines the bind address and the origins allowed to open a stream.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

/// Which broker technology backs the adapter.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    /// NATS JetStream: durable, acknowledged, queue-style.
    Jetstream,
    /// Core NATS subjects: best-effort pub/sub.
    Nats,
    /// In-process channels, for local runs and tests.
    Memory,
}

/// Configuration settings for the broker connection.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub backend: BrokerBackend,
    pub url: String,
    pub topic: String,
    pub publish_timeout_ms: u64,
    pub resubscribe_attempts: u32,
    pub resubscribe_backoff_ms: u64,
}

impl BrokerSettings {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn resubscribe_backoff(&self) -> Duration {
        Duration::from_millis(self.resubscribe_backoff_ms)
    }
}

/// Where broker-delivered messages go.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FanOutPolicy {
    /// Every broker delivery is written once to every open session.
    Broadcast,
    /// Each inbound frame is written straight back to its own session; broker
    /// deliveries are only logged.
    Echo,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelaySettings {
    pub fan_out: FanOutPolicy,
    pub drain_timeout_ms: u64,
}

impl RelaySettings {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub relay: Option<PartialRelaySettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub backend: Option<BrokerBackend>,
    pub url: Option<String>,
    pub topic: Option<String>,
    pub publish_timeout_ms: Option<u64>,
    pub resubscribe_attempts: Option<u32>,
    pub resubscribe_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialRelaySettings {
    pub fan_out: Option<FanOutPolicy>,
    pub drain_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Matches the deployment the relay grew up in: a frontend on 5173, the
/// user service on 5001 and the API gateway on 5000.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 5003,
                allowed_origins: vec![
                    "http://localhost:5173".to_string(),
                    "http://localhost:5001".to_string(),
                    "http://localhost:5000".to_string(),
                ],
            },
            broker: BrokerSettings {
                backend: BrokerBackend::Jetstream,
                url: "nats://localhost:4222".to_string(),
                topic: "messages".to_string(),
                publish_timeout_ms: 5000,
                resubscribe_attempts: 5,
                resubscribe_backoff_ms: 500,
            },
            relay: RelaySettings {
                fan_out: FanOutPolicy::Broadcast,
                drain_timeout_ms: 5000,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
