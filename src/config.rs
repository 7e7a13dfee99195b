//! # Controller Configuration
//!
//! Every tunable of the messaging layer lives in [`ControllerConfig`], a plain
//! value object handed to [`crate::reservoir::ReservoirController`] at
//! construction. Nothing here is a compile-time global: topics, QoS, retry
//! budget, back-off, freshness window and buffer sizes can all be overridden
//! from `~/.config/growstudio/controller.toml`.
//!
//! Missing files and missing keys fall back to defaults so a fresh install
//! connects with the reference behaviour (fixed 2.5 s back-off, 5 attempts,
//! 3 s error freshness, 100 samples of history).

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = ".config/growstudio";
const CONFIG_FILE: &str = "controller.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid QoS level {0}, expected 0, 1 or 2")]
    InvalidQos(u8),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Broker address and session options.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    /// Capacity of the rumqttc request channel.
    pub request_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "test.mosquitto.org".to_string(),
            port: 1883,
            client_id: "reservoir-controller".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 5,
            clean_session: false,
            request_capacity: 100,
        }
    }
}

/// The three fixed topics of the device contract.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Topics {
    pub telemetry: String,
    pub response: String,
    pub request: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            telemetry: "ReservoirController/telemetry".to_string(),
            response: "ReservoirController/rpc/response".to_string(),
            request: "ReservoirController/rpc/request".to_string(),
        }
    }
}

/// Delay applied before each reconnect attempt.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        #[serde(default)]
        jitter: bool,
    },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Fixed { delay_ms: 2500 }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub broker: BrokerConfig,
    pub topics: Topics,
    /// MQTT QoS level used for publish and subscribe (0, 1 or 2).
    pub qos: u8,
    /// Consecutive failed connection attempts before the session gives up.
    pub retry_limit: u32,
    pub backoff: BackoffConfig,
    pub freshness_window_ms: u64,
    pub history_capacity: usize,
    pub error_queue_capacity: usize,
    pub inbound_capacity: usize,
    /// `None` or `0` keeps pending handlers until a response arrives.
    pub request_timeout_ms: Option<u64>,
    pub doser_count_request_id: i64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            topics: Topics::default(),
            qos: 1,
            retry_limit: 5,
            backoff: BackoffConfig::default(),
            freshness_window_ms: 3000,
            history_capacity: 100,
            error_queue_capacity: 32,
            inbound_capacity: 1024,
            request_timeout_ms: Some(30_000),
            doser_count_request_id: 420,
        }
    }
}

impl ControllerConfig {
    pub fn qos(&self) -> Result<QoS, ConfigError> {
        qos_from_level(self.qos)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.freshness_window_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.broker.keep_alive_secs)
    }

    /// Rejects values the session cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        qos_from_level(self.qos)?;

        if self.retry_limit == 0 {
            return Err(ConfigError::Invalid(
                "retry_limit must be at least 1".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        if self.error_queue_capacity == 0 || self.inbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue capacities must be at least 1".to_string(),
            ));
        }
        // rumqttc refuses keep alive intervals below 5 seconds
        if self.broker.keep_alive_secs < 5 {
            return Err(ConfigError::Invalid(format!(
                "keep_alive_secs must be at least 5, got {}",
                self.broker.keep_alive_secs
            )));
        }
        if self.broker.client_id.is_empty() {
            return Err(ConfigError::Invalid("client_id must not be empty".to_string()));
        }
        if let BackoffConfig::Exponential {
            initial_ms, max_ms, ..
        } = self.backoff
        {
            if initial_ms == 0 || max_ms < initial_ms {
                return Err(ConfigError::Invalid(format!(
                    "exponential backoff needs 0 < initial_ms <= max_ms, got {}..{}",
                    initial_ms, max_ms
                )));
            }
        }
        let topics = [
            &self.topics.telemetry,
            &self.topics.response,
            &self.topics.request,
        ];
        if topics.iter().any(|t| t.is_empty()) {
            return Err(ConfigError::Invalid("topics must not be empty".to_string()));
        }
        if self.topics.telemetry == self.topics.response {
            return Err(ConfigError::Invalid(
                "telemetry and response topics must differ".to_string(),
            ));
        }

        Ok(())
    }

    /// Default location of the config file below the home directory.
    pub fn default_path() -> PathBuf {
        let mut path = get_home_dir();
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads and validates the config, falling back to defaults when the file is absent.
    pub async fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let config = if exists {
            let content =
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ConfigError::Read {
                        path: path.to_path_buf(),
                        source,
                    })?;
            let config: ControllerConfig =
                toml::from_str(&content).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            info!("Loaded controller config from {}", path.display());
            config
        } else {
            warn!(
                "Config file {} does not exist, using defaults",
                path.display()
            );
            ControllerConfig::default()
        };

        config.validate()?;
        debug!("Effective controller config: {:?}", config);
        Ok(config)
    }
}

pub fn qos_from_level(level: u8) -> Result<QoS, ConfigError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ConfigError::InvalidQos(other)),
    }
}

pub(crate) fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}
