// Copyright (c) 2025 - Cowboy AI, Inc.

//! JetStream configuration and setup
//!
//! Three JetStream resources back the engine:
//! - **Event stream** (`LOCKER_EVENTS`, subjects `locker.events.>`): one subject
//!   per aggregate, one message per append batch
//! - **Key bucket** (`LOCKER_EVENT_KEYS`): one key per recorded correlation
//!   key, `{aggregate}.{event_type}.{hex(key)}`, so guard lookups never scan
//! - **Inbox bucket** (`LOCKER_INBOX`): key-value rows of the command-response
//!   inbox, keyed by `{device}.{transaction}`
//!
//! All are created on first use and reused afterwards.
//!
//! # Example
//!
//! ```rust,no_run
//! use locker_control::jetstream::{create_event_stream, JetStreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = async_nats::connect("nats://localhost:4222").await?;
//!     let jetstream = async_nats::jetstream::new(client);
//!
//!     let stream = create_event_stream(&jetstream, &JetStreamConfig::default()).await?;
//!
//!     Ok(())
//! }
//! ```

use async_nats::jetstream::{self, kv, stream::Stream};
use std::time::Duration;

use crate::config::StorageConfig;
use crate::errors::{LockerError, LockerResult};

/// Configuration for the event stream
#[derive(Debug, Clone)]
pub struct JetStreamConfig {
    /// Stream name
    pub stream_name: String,

    /// Subject prefix; aggregate subjects are `{prefix}.{aggregate_id}`
    pub subject_prefix: String,

    /// Maximum age of messages (default: unlimited, the log is the truth)
    pub max_age: Duration,

    /// Maximum bytes stored in stream (default: 10GB)
    pub max_bytes: i64,

    /// Storage type (File or Memory)
    pub storage: StorageType,

    /// Number of replicas (for clustered NATS)
    pub replicas: usize,

    /// KV bucket indexing the log's correlation keys
    pub key_bucket: String,
}

impl Default for JetStreamConfig {
    fn default() -> Self {
        Self {
            stream_name: "LOCKER_EVENTS".to_string(),
            subject_prefix: "locker.events".to_string(),
            max_age: Duration::ZERO,
            max_bytes: 10 * 1024 * 1024 * 1024, // 10 GB
            storage: StorageType::File,
            replicas: 1,
            key_bucket: "LOCKER_EVENT_KEYS".to_string(),
        }
    }
}

impl JetStreamConfig {
    /// Stream subjects captured by the event stream
    pub fn subjects(&self) -> Vec<String> {
        vec![format!("{}.>", self.subject_prefix)]
    }
}

impl From<&StorageConfig> for JetStreamConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            stream_name: config.stream_name.clone(),
            subject_prefix: config.subject_prefix.clone(),
            replicas: config.replicas,
            key_bucket: config.key_bucket.clone(),
            ..Default::default()
        }
    }
}

/// Configuration for the inbox key-value bucket
#[derive(Debug, Clone)]
pub struct InboxBucketConfig {
    pub bucket: String,

    /// How long inbox rows are kept (default: 30 days)
    pub max_age: Duration,

    pub storage: StorageType,

    pub replicas: usize,
}

impl Default for InboxBucketConfig {
    fn default() -> Self {
        Self {
            bucket: "LOCKER_INBOX".to_string(),
            max_age: Duration::from_secs(30 * 24 * 60 * 60), // 30 days
            storage: StorageType::File,
            replicas: 1,
        }
    }
}

impl From<&StorageConfig> for InboxBucketConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            bucket: config.inbox_bucket.clone(),
            replicas: config.replicas,
            ..Default::default()
        }
    }
}

/// Storage type for JetStream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// File-based storage (persistent across restarts)
    File,
    /// Memory-based storage (faster, but lost on restart)
    Memory,
}

impl From<StorageType> for jetstream::stream::StorageType {
    fn from(storage: StorageType) -> Self {
        match storage {
            StorageType::File => jetstream::stream::StorageType::File,
            StorageType::Memory => jetstream::stream::StorageType::Memory,
        }
    }
}

/// Create the event stream, or bind to it if it already exists
pub async fn create_event_stream(
    jetstream: &jetstream::Context,
    config: &JetStreamConfig,
) -> LockerResult<Stream> {
    let stream_config = jetstream::stream::Config {
        name: config.stream_name.clone(),
        subjects: config.subjects(),
        max_age: config.max_age,
        max_bytes: config.max_bytes,
        storage: config.storage.into(),
        num_replicas: config.replicas,
        retention: jetstream::stream::RetentionPolicy::Limits,
        ..Default::default()
    };

    jetstream
        .get_or_create_stream(stream_config)
        .await
        .map_err(|e| LockerError::Storage(e.to_string()))
}

/// Create the correlation-key bucket, or bind to it if it already exists
///
/// Keys live as long as the events they index.
pub async fn create_key_bucket(
    jetstream: &jetstream::Context,
    config: &JetStreamConfig,
) -> LockerResult<kv::Store> {
    if let Ok(store) = jetstream.get_key_value(config.key_bucket.clone()).await {
        return Ok(store);
    }

    jetstream
        .create_key_value(kv::Config {
            bucket: config.key_bucket.clone(),
            history: 1,
            max_age: config.max_age,
            storage: config.storage.into(),
            num_replicas: config.replicas,
            ..Default::default()
        })
        .await
        .map_err(|e| LockerError::Storage(e.to_string()))
}

/// Create the inbox bucket, or bind to it if it already exists
pub async fn create_inbox_bucket(
    jetstream: &jetstream::Context,
    config: &InboxBucketConfig,
) -> LockerResult<kv::Store> {
    if let Ok(store) = jetstream.get_key_value(config.bucket.clone()).await {
        return Ok(store);
    }

    jetstream
        .create_key_value(kv::Config {
            bucket: config.bucket.clone(),
            history: 1,
            max_age: config.max_age,
            storage: config.storage.into(),
            num_replicas: config.replicas,
            ..Default::default()
        })
        .await
        .map_err(|e| LockerError::Storage(e.to_string()))
}
