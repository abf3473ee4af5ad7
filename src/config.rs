// Copyright (c) 2025 - Cowboy AI, Inc.
//! Backend configuration
//!
//! Every section has a `Default` and is read from the environment by
//! [`LockerConfig::from_env`]. Unset variables fall back to the defaults;
//! set but unparsable values are configuration errors.

use std::str::FromStr;
use std::time::Duration;

use crate::errors::{LockerError, LockerResult};

/// Configuration for the NATS connection
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URLs
    pub servers: Vec<String>,
    /// Client name
    pub name: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Request timeout
    pub request_timeout: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            name: "locker-backend".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl NatsConfig {
    pub fn from_env() -> LockerResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            servers: std::env::var("NATS_URL")
                .map(|urls| {
                    urls.split(',')
                        .map(|url| url.trim().to_string())
                        .filter(|url| !url.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.servers),
            name: std::env::var("NATS_CLIENT_NAME").unwrap_or(defaults.name),
            ..defaults
        })
    }
}

/// The two privileged transport principals
///
/// The service principal is the backend itself; the provisioning principal
/// only bridges registrations and replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalConfig {
    pub service_username: String,
    pub service_password: String,
    pub provisioning_username: String,
    pub provisioning_password: String,
}

impl Default for PrincipalConfig {
    fn default() -> Self {
        Self {
            service_username: "locker-service".to_string(),
            service_password: String::new(),
            provisioning_username: "locker-provisioning".to_string(),
            provisioning_password: String::new(),
        }
    }
}

impl PrincipalConfig {
    pub fn from_env() -> LockerResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            service_username: std::env::var("LOCKER_SERVICE_USER")
                .unwrap_or(defaults.service_username),
            service_password: std::env::var("LOCKER_SERVICE_PASSWORD")
                .unwrap_or(defaults.service_password),
            provisioning_username: std::env::var("LOCKER_PROVISIONING_USER")
                .unwrap_or(defaults.provisioning_username),
            provisioning_password: std::env::var("LOCKER_PROVISIONING_PASSWORD")
                .unwrap_or(defaults.provisioning_password),
        })
    }
}

/// Heartbeat defaults and sweep cadence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval given to banks registered without one
    pub default_interval_seconds: u32,
    /// Timeout given to banks registered without one
    pub default_timeout_seconds: u32,
    /// How often the offline sweep runs
    pub sweep_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            default_interval_seconds: 30,
            default_timeout_seconds: 90,
            sweep_interval: Duration::from_secs(15),
        }
    }
}

impl HeartbeatConfig {
    /// Timeout for a bank registered with `interval` and no timeout of its own
    ///
    /// Never less than three intervals, so a slow-beating bank is not
    /// rejected for a timeout it never asked for.
    pub fn default_timeout_for(&self, interval_seconds: u32) -> u32 {
        self.default_timeout_seconds
            .max(interval_seconds.saturating_mul(3))
    }

    pub fn from_env() -> LockerResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            default_interval_seconds: env_parse(
                "LOCKER_HEARTBEAT_INTERVAL_SECONDS",
                defaults.default_interval_seconds,
            )?,
            default_timeout_seconds: env_parse(
                "LOCKER_HEARTBEAT_TIMEOUT_SECONDS",
                defaults.default_timeout_seconds,
            )?,
            sweep_interval: Duration::from_secs(env_parse(
                "LOCKER_SWEEP_INTERVAL_SECONDS",
                defaults.sweep_interval.as_secs(),
            )?),
        })
    }
}

/// Reactor worker pool settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Events handled concurrently
    pub concurrency: usize,
    /// First retry delay
    pub min_delay: Duration,
    /// Retry delay cap
    pub max_delay: Duration,
    /// Retries before an event is dead-lettered
    pub max_retries: usize,
    /// How long the pool waits for new events before re-reading the log
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_retries: 8,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> LockerResult<Self> {
        let defaults = Self::default();
        let concurrency = env_parse("LOCKER_WORKER_CONCURRENCY", defaults.concurrency)?;
        if concurrency == 0 {
            return Err(LockerError::Configuration(
                "LOCKER_WORKER_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            concurrency,
            max_retries: env_parse("LOCKER_WORKER_MAX_RETRIES", defaults.max_retries)?,
            poll_interval: Duration::from_millis(env_parse(
                "LOCKER_WORKER_POLL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            ..defaults
        })
    }
}

/// JetStream names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Stream holding the event log
    pub stream_name: String,
    /// Subject prefix; one subject per aggregate below it
    pub subject_prefix: String,
    /// KV bucket backing the command inbox
    pub inbox_bucket: String,
    /// KV bucket indexing correlation keys of the event log
    pub key_bucket: String,
    /// Stream and bucket replicas
    pub replicas: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            stream_name: "LOCKER_EVENTS".to_string(),
            subject_prefix: "locker.events".to_string(),
            inbox_bucket: "LOCKER_INBOX".to_string(),
            key_bucket: "LOCKER_EVENT_KEYS".to_string(),
            replicas: 1,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> LockerResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            stream_name: std::env::var("LOCKER_STREAM").unwrap_or(defaults.stream_name),
            subject_prefix: std::env::var("LOCKER_SUBJECT_PREFIX")
                .unwrap_or(defaults.subject_prefix),
            inbox_bucket: std::env::var("LOCKER_INBOX_BUCKET").unwrap_or(defaults.inbox_bucket),
            key_bucket: std::env::var("LOCKER_KEY_BUCKET").unwrap_or(defaults.key_bucket),
            replicas: env_parse("LOCKER_REPLICAS", defaults.replicas)?,
        })
    }
}

/// Complete backend configuration
#[derive(Debug, Clone, Default)]
pub struct LockerConfig {
    pub nats: NatsConfig,
    pub principals: PrincipalConfig,
    pub heartbeat: HeartbeatConfig,
    pub workers: WorkerConfig,
    pub storage: StorageConfig,
}

impl LockerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> LockerResult<Self> {
        Ok(Self {
            nats: NatsConfig::from_env()?,
            principals: PrincipalConfig::from_env()?,
            heartbeat: HeartbeatConfig::from_env()?,
            workers: WorkerConfig::from_env()?,
            storage: StorageConfig::from_env()?,
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> LockerResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> LockerResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| LockerError::Configuration(format!("{}={:?}: {}", key, raw, e)))
}
