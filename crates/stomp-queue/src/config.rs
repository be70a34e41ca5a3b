//! Queue configuration: one [`QueueSettings`] entry per named queue.
//!
//! Settings are read with the `config` crate from an optional file (format
//! inferred from its extension) and then from environment variables
//! prefixed `STOMP_QUEUE`, with `__` separating nested keys:
//!
//! ```text
//! STOMP_QUEUE__QUEUES__JOBS__DESTINATION=/queue/jobs-v2
//! ```

use crate::error::{ConfigurationError, ValidationError};
use crate::message::DestinationName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Prefix of environment variables overriding file configuration
pub const ENV_PREFIX: &str = "STOMP_QUEUE";

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

// ============================================================================
// BrokerAddress
// ============================================================================

/// `host:port` of a broker, optionally written with a `tcp://` or `stomp://` scheme
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerAddress {
    host: String,
    port: u16,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for BrokerAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = s
            .strip_prefix("tcp://")
            .or_else(|| s.strip_prefix("stomp://"))
            .unwrap_or(s)
            .trim_end_matches('/');

        let invalid = |message: &str| ValidationError::InvalidFormat {
            field: "brokers".to_string(),
            message: format!("'{}' {}", s, message),
        };

        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| invalid("must be host:port"))?;
        if host.is_empty() {
            return Err(invalid("has no host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("has an invalid port"))?;
        if port == 0 {
            return Err(invalid("has an invalid port"));
        }

        Ok(Self::new(host, port))
    }
}

// ============================================================================
// QueueSettings
// ============================================================================

/// Settings identifying one logical queue on a STOMP broker.
///
/// Fields are fixed once built; the builder methods consume and return the
/// settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    client_id: String,
    brokers: Vec<String>,
    destination: String,
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    passcode: Option<String>,
    #[serde(default)]
    heartbeat_ms: Option<u64>,
    #[serde(default = "default_connect_timeout_ms")]
    connect_timeout_ms: u64,
}

impl QueueSettings {
    pub fn new(
        client_id: impl Into<String>,
        brokers: Vec<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            brokers,
            destination: destination.into(),
            login: None,
            passcode: None,
            heartbeat_ms: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }

    pub fn with_credentials(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self.passcode = Some(passcode.into());
        self
    }

    /// Ask the broker to send heart-beats at this interval
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_ms = Some(interval.as_millis() as u64);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn login(&self) -> Option<&str> {
        self.login.as_deref()
    }

    pub fn passcode(&self) -> Option<&str> {
        self.passcode.as_deref()
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        self.heartbeat_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn destination_name(&self) -> Result<DestinationName, ValidationError> {
        DestinationName::new(self.destination.clone())
    }

    /// Parsed broker addresses in failover order
    pub fn broker_addresses(&self) -> Result<Vec<BrokerAddress>, ValidationError> {
        self.brokers.iter().map(|b| b.parse()).collect()
    }

    /// Check the settings of the queue called `name`
    pub fn validate(&self, name: &str) -> Result<(), ConfigurationError> {
        let invalid = |message: String| ConfigurationError::Queue {
            queue: name.to_string(),
            message,
        };

        if self.client_id.trim().is_empty() {
            return Err(invalid("client_id must not be empty".to_string()));
        }
        if self.brokers.is_empty() {
            return Err(invalid("at least one broker address is required".to_string()));
        }
        self.broker_addresses().map_err(|e| invalid(e.to_string()))?;
        self.destination_name().map_err(|e| invalid(e.to_string()))?;

        if self.passcode.is_some() && self.login.is_none() {
            return Err(invalid("passcode given without login".to_string()));
        }
        if self.heartbeat_ms == Some(0) {
            return Err(invalid("heartbeat_ms must be greater than zero".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(invalid("connect_timeout_ms must be greater than zero".to_string()));
        }

        Ok(())
    }
}

impl fmt::Debug for QueueSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSettings")
            .field("client_id", &self.client_id)
            .field("brokers", &self.brokers)
            .field("destination", &self.destination)
            .field("login", &self.login)
            .field("passcode", &self.passcode.as_ref().map(|_| "[REDACTED]"))
            .field("heartbeat_ms", &self.heartbeat_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

// ============================================================================
// QueuesConfig
// ============================================================================

/// Named list of queues, one adapter per entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueuesConfig {
    #[serde(default)]
    pub queues: BTreeMap<String, QueueSettings>,
}

impl QueuesConfig {
    /// Load configuration from `path` (if given) and the environment, then validate it
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::Missing {
                    key: path.display().to_string(),
                });
            }
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        let loaded: Self = settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Validate every queue entry
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.queues.is_empty() {
            return Err(ConfigurationError::Invalid {
                message: "no queues configured".to_string(),
            });
        }

        for (name, settings) in &self.queues {
            if name.trim().is_empty() {
                return Err(ConfigurationError::Invalid {
                    message: "queue names must not be empty".to_string(),
                });
            }
            settings.validate(name)?;
        }

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&QueueSettings> {
        self.queues.get(name)
    }
}
