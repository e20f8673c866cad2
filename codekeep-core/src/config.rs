//! Store configuration
//!
//! Configuration is loaded either from a deserialized [`RawStoreConfig`] or
//! from environment variables, and validated into a [`StoreConfig`] whose
//! topology is fixed for the lifetime of the client.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default bound on connection establishment.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default delay between reconnect attempts after a connection is lost.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(500);

/// Default delay between liveness pings on an idle connection.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

/// How the client reaches the store.
#[derive(Clone, PartialEq, Eq)]
pub enum Topology {
    /// A single endpoint, e.g. `redis://localhost:6379/0`.
    Direct { url: String },
    /// Primary discovery through sentinel monitors.
    Sentinel {
        /// Sentinel endpoints, e.g. `redis://sentinel-1:26379`.
        sentinels: Vec<String>,
        /// Name of the monitored group.
        group_name: String,
        /// Password for the data nodes.
        password: Option<String>,
    },
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { url } => f.debug_struct("Direct").field("url", url).finish(),
            Self::Sentinel {
                sentinels,
                group_name,
                password,
            } => f
                .debug_struct("Sentinel")
                .field("sentinels", sentinels)
                .field("group_name", group_name)
                .field("password", &password.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Validated store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub topology: Topology,
    /// Queue commands while disconnected instead of failing them.
    pub enable_offline_queue: bool,
    /// Prepended verbatim to every store key.
    pub key_prefix: String,
    pub connect_timeout: Duration,
    pub reconnect_interval: Duration,
    /// How often the live connection is pinged to notice a silent drop.
    pub heartbeat_interval: Duration,
}

impl StoreConfig {
    /// Direct topology with default options.
    pub fn direct(url: impl Into<String>) -> Self {
        Self::with_topology(Topology::Direct { url: url.into() })
    }

    /// Sentinel topology with default options.
    pub fn sentinel(
        sentinels: Vec<String>,
        group_name: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        Self::with_topology(Topology::Sentinel {
            sentinels,
            group_name: group_name.into(),
            password,
        })
    }

    fn with_topology(topology: Topology) -> Self {
        Self {
            topology,
            enable_offline_queue: true,
            key_prefix: String::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_offline_queue(mut self, enabled: bool) -> Self {
        self.enable_offline_queue = enabled;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CODEKEEP_REDIS_URL`: direct endpoint
    /// - `CODEKEEP_REDIS_SENTINELS`: comma-separated sentinel endpoints
    /// - `CODEKEEP_REDIS_SENTINEL_NAME`: monitored group name
    /// - `CODEKEEP_REDIS_PASSWORD`: data node password (sentinel mode)
    /// - `CODEKEEP_REDIS_OFFLINE_QUEUE`: "true" or "false" (default: true)
    /// - `CODEKEEP_REDIS_KEY_PREFIX`: key prefix (default: empty)
    /// - `CODEKEEP_REDIS_CONNECT_TIMEOUT_MS`: connect timeout (default: 1000)
    /// - `CODEKEEP_REDIS_RECONNECT_INTERVAL_MS`: reconnect delay (default: 500)
    /// - `CODEKEEP_REDIS_HEARTBEAT_INTERVAL_MS`: liveness ping delay (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sentinels = lookup("CODEKEEP_REDIS_SENTINELS").map(|s| {
            s.split(',')
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect::<Vec<_>>()
        });

        let raw = RawStoreConfig {
            url: lookup("CODEKEEP_REDIS_URL").filter(|s| !s.trim().is_empty()),
            sentinels,
            sentinel_name: lookup("CODEKEEP_REDIS_SENTINEL_NAME"),
            password: lookup("CODEKEEP_REDIS_PASSWORD"),
            enable_offline_queue: parse_var(&lookup, "CODEKEEP_REDIS_OFFLINE_QUEUE", parse_bool)?
                .unwrap_or(true),
            key_prefix: lookup("CODEKEEP_REDIS_KEY_PREFIX").unwrap_or_default(),
            connect_timeout_ms: parse_var(&lookup, "CODEKEEP_REDIS_CONNECT_TIMEOUT_MS", |s| {
                s.parse().ok()
            })?
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT.as_millis() as u64),
            reconnect_interval_ms: parse_var(
                &lookup,
                "CODEKEEP_REDIS_RECONNECT_INTERVAL_MS",
                |s| s.parse().ok(),
            )?
            .unwrap_or(DEFAULT_RECONNECT_INTERVAL.as_millis() as u64),
            heartbeat_interval_ms: parse_var(
                &lookup,
                "CODEKEEP_REDIS_HEARTBEAT_INTERVAL_MS",
                |s| s.parse().ok(),
            )?
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64),
        };

        raw.validate()
    }
}

fn parse_var<F, T>(
    lookup: &F,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => parse(value.trim())
            .map(Some)
            .ok_or(ConfigError::InvalidValue {
                field: name.to_string(),
                value,
            }),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Flat, unvalidated configuration as it appears in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawStoreConfig {
    pub url: Option<String>,
    pub sentinels: Option<Vec<String>>,
    pub sentinel_name: Option<String>,
    pub password: Option<String>,
    pub enable_offline_queue: bool,
    pub key_prefix: String,
    pub connect_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for RawStoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            sentinels: None,
            sentinel_name: None,
            password: None,
            enable_offline_queue: true,
            key_prefix: String::new(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL.as_millis() as u64,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64,
        }
    }
}

impl RawStoreConfig {
    /// Resolve the topology. Exactly one of `url` or `sentinels` must be set.
    pub fn validate(self) -> Result<StoreConfig, ConfigError> {
        let sentinels = self.sentinels.filter(|s| !s.is_empty());

        let topology = match (self.url, sentinels) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingEndpoints),
            (None, None) => return Err(ConfigError::MissingEndpoint),
            (Some(url), None) => Topology::Direct { url },
            (None, Some(sentinels)) => {
                let group_name = self
                    .sentinel_name
                    .filter(|n| !n.trim().is_empty())
                    .ok_or(ConfigError::MissingSentinelName)?;
                Topology::Sentinel {
                    sentinels,
                    group_name,
                    password: self.password,
                }
            }
        };

        for (field, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                });
            }
        }

        Ok(StoreConfig {
            topology,
            enable_offline_queue: self.enable_offline_queue,
            key_prefix: self.key_prefix,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
        })
    }
}
