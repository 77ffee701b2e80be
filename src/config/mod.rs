//! Configuration loading.
//!
//! Settings are read once at startup from `config/default.toml` (optional) and
//! `RELAY__`-prefixed environment variables, then handed to the relay. Nothing
//! below this layer reads the environment.

mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerBackend, BrokerSettings, FanOutPolicy, LogSettings, RelaySettings, ServerSettings,
    Settings,
};

/// Default location of the optional settings file, without extension.
pub const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

/// Same as [`load_config`] but reads the settings file at `path`.
///
/// Environment variables use `__` between segments so that field names keep
/// their underscores: `RELAY__BROKER__PUBLISH_TIMEOUT_MS=2000`. The origin
/// list accepts a comma separated value.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.allowed_origins")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();
    let server = partial.server;
    let broker = partial.broker;
    let relay = partial.relay;
    let log = partial.log;

    let settings = Settings {
        server: ServerSettings {
            host: server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
            allowed_origins: server
                .as_ref()
                .and_then(|s| s.allowed_origins.clone())
                .unwrap_or(default.server.allowed_origins),
        },
        broker: BrokerSettings {
            backend: broker
                .as_ref()
                .and_then(|b| b.backend)
                .unwrap_or(default.broker.backend),
            url: broker
                .as_ref()
                .and_then(|b| b.url.clone())
                .unwrap_or(default.broker.url),
            topic: broker
                .as_ref()
                .and_then(|b| b.topic.clone())
                .unwrap_or(default.broker.topic),
            publish_timeout_ms: broker
                .as_ref()
                .and_then(|b| b.publish_timeout_ms)
                .unwrap_or(default.broker.publish_timeout_ms),
            resubscribe_attempts: broker
                .as_ref()
                .and_then(|b| b.resubscribe_attempts)
                .unwrap_or(default.broker.resubscribe_attempts),
            resubscribe_backoff_ms: broker
                .as_ref()
                .and_then(|b| b.resubscribe_backoff_ms)
                .unwrap_or(default.broker.resubscribe_backoff_ms),
        },
        relay: RelaySettings {
            fan_out: relay
                .as_ref()
                .and_then(|r| r.fan_out)
                .unwrap_or(default.relay.fan_out),
            drain_timeout_ms: relay
                .as_ref()
                .and_then(|r| r.drain_timeout_ms)
                .unwrap_or(default.relay.drain_timeout_ms),
        },
        log: LogSettings {
            level: log
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.log.level),
        },
    };

    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.server.allowed_origins.iter().all(|o| o.trim().is_empty()) {
        return Err(ConfigError::Message(
            "server.allowed_origins must name at least one origin".to_string(),
        ));
    }
    if settings.broker.topic.trim().is_empty() {
        return Err(ConfigError::Message("broker.topic must not be empty".to_string()));
    }
    if settings.broker.publish_timeout_ms == 0 {
        return Err(ConfigError::Message(
            "broker.publish_timeout_ms must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
