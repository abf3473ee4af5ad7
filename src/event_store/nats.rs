// Copyright (c) 2025 - Cowboy AI, Inc.
//! NATS JetStream Event Store Implementation
//!
//! Each aggregate owns one subject, `{prefix}.{aggregate_id}`, and each append
//! batch is one message on it. Optimistic concurrency rides on the
//! `Nats-Expected-Last-Subject-Sequence` header: the server refuses the
//! publish if anything landed on the subject after the sequence we folded
//! from, which makes append a compare-and-append without a lock.
//!
//! The last `(sequence, version)` seen per aggregate is cached. A stale entry
//! is harmless: the server rejects the publish and the caller reloads.
//!
//! Correlation keys are indexed in a KV bucket written right after each
//! append, so `exists` is a single key lookup. [`NatsEventStore::reindex`]
//! repairs keys lost between a publish and its index write.
//!
//! Log positions handed out by `read_after` are stream sequences.

use std::collections::HashMap;
use std::time::Duration;

use async_nats::jetstream::{self, consumer::DeliverPolicy, kv, stream::Stream};
use async_nats::HeaderMap;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{check_batch, stamp_batch, EventStore, LogSlice, StoredEvent, BROADCAST_CAPACITY};
use crate::errors::{LockerError, LockerResult};
use crate::events::DomainEvent;
use crate::jetstream::{create_event_stream, create_key_bucket, JetStreamConfig};

const EXPECTED_LAST_SUBJECT_SEQUENCE: &str = "Nats-Expected-Last-Subject-Sequence";

/// Messages fetched per pull
const BATCH_SIZE: usize = 10000;

/// How long a full read waits for the server to run dry
const LOAD_EXPIRY: Duration = Duration::from_secs(2);

/// How long a tail read waits for new messages
const TAIL_EXPIRY: Duration = Duration::from_millis(250);

/// NATS JetStream-backed event store
///
/// # Example
///
/// ```rust,no_run
/// use locker_control::event_store::NatsEventStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = NatsEventStore::connect("nats://localhost:4222").await?;
///     // Use store...
///     Ok(())
/// }
/// ```
pub struct NatsEventStore {
    jetstream: jetstream::Context,
    stream: Stream,
    keys: kv::Store,
    subject_prefix: String,
    /// Last `(stream_sequence, version)` seen per aggregate
    heads: Mutex<HashMap<Uuid, (u64, u64)>>,
    sender: broadcast::Sender<StoredEvent>,
}

/// A stream position and the batch stored there
struct Batch {
    stream_sequence: u64,
    events: Vec<StoredEvent>,
}

/// Which part of the stream a read covers
struct Pull {
    filter_subject: String,
    deliver_policy: DeliverPolicy,
    /// Stop after this many batches
    max_batches: Option<usize>,
    expires: Duration,
}

impl NatsEventStore {
    /// Connect to NATS and bind to the default event stream
    pub async fn connect(nats_url: &str) -> LockerResult<Self> {
        let client = async_nats::connect(nats_url)
            .await
            .map_err(|e| LockerError::Transport(e.to_string()))?;

        Self::new(client, JetStreamConfig::default()).await
    }

    /// Bind to the event stream and key bucket over an existing connection
    pub async fn new(client: async_nats::Client, config: JetStreamConfig) -> LockerResult<Self> {
        let jetstream = jetstream::new(client);
        let stream = create_event_stream(&jetstream, &config).await?;
        let keys = create_key_bucket(&jetstream, &config).await?;
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);

        info!(
            stream = %config.stream_name,
            key_bucket = %config.key_bucket,
            "Event store bound to JetStream"
        );

        Ok(Self {
            jetstream,
            stream,
            keys,
            subject_prefix: config.subject_prefix,
            heads: Mutex::new(HashMap::new()),
            sender,
        })
    }

    /// Format: {prefix}.<aggregate_id>
    fn aggregate_subject(&self, aggregate_id: Uuid) -> String {
        format!("{}.{}", self.subject_prefix, aggregate_id)
    }

    fn all_subjects(&self) -> String {
        format!("{}.>", self.subject_prefix)
    }

    /// Format: <aggregate_id>.<event_type>.<hex(correlation_key)>
    fn index_key(aggregate_id: Uuid, event_type: &str, correlation_key: &str) -> String {
        format!(
            "{}.{}.{}",
            aggregate_id,
            event_type,
            hex::encode(correlation_key)
        )
    }

    /// Record the correlation keys of freshly stored events
    async fn index(&self, events: &[StoredEvent]) -> LockerResult<usize> {
        let mut indexed = 0;
        for event in events {
            if let Some(key) = &event.correlation_key {
                let index_key = Self::index_key(event.aggregate_id, &event.event_type, key);
                self.keys
                    .put(index_key, event.event_id.to_string().into_bytes().into())
                    .await
                    .map_err(|e| LockerError::Storage(format!("Failed to index key: {}", e)))?;
                indexed += 1;
            }
        }
        Ok(indexed)
    }

    /// Re-index every correlation key in the log
    ///
    /// Run at startup; covers a crash between an append and its index write.
    pub async fn reindex(&self) -> LockerResult<usize> {
        let events = self.load_all().await?;
        let indexed = self.index(&events).await?;
        info!(events = events.len(), indexed, "Correlation keys reindexed");
        Ok(indexed)
    }

    /// Read the batches a [`Pull`] selects, in stream order
    async fn pull(&self, pull: Pull) -> LockerResult<Vec<Batch>> {
        let consumer = self
            .stream
            .create_consumer(jetstream::consumer::pull::Config {
                filter_subject: pull.filter_subject,
                deliver_policy: pull.deliver_policy,
                ..Default::default()
            })
            .await
            .map_err(|e| LockerError::Storage(e.to_string()))?;

        let mut batches = Vec::new();

        loop {
            let wanted = match pull.max_batches {
                Some(max) if batches.len() >= max => break,
                Some(max) => (max - batches.len()).min(BATCH_SIZE),
                None => BATCH_SIZE,
            };

            // An empty subject ends the fetch by expiry, not by error
            let messages_result = consumer
                .fetch()
                .max_messages(wanted)
                .expires(pull.expires)
                .messages()
                .await;

            let mut messages = match messages_result {
                Ok(msgs) => msgs,
                Err(e) => {
                    let err_msg = e.to_string().to_lowercase();
                    if err_msg.contains("timeout")
                        || err_msg.contains("timed out")
                        || err_msg.contains("no messages")
                    {
                        break;
                    }
                    return Err(LockerError::Storage(e.to_string()));
                }
            };

            let mut batch_count = 0;

            while let Some(message) = messages.next().await {
                let msg = message.map_err(|e| LockerError::Storage(e.to_string()))?;

                let stream_sequence = msg
                    .info()
                    .map_err(|e| LockerError::Storage(e.to_string()))?
                    .stream_sequence;
                let events: Vec<StoredEvent> = serde_json::from_slice(&msg.payload)?;

                batches.push(Batch {
                    stream_sequence,
                    events,
                });

                msg.ack()
                    .await
                    .map_err(|e| LockerError::Storage(e.to_string()))?;

                batch_count += 1;
            }

            if batch_count < wanted {
                break;
            }
        }

        batches.sort_by_key(|b| b.stream_sequence);

        Ok(batches)
    }

    /// Every batch of one aggregate; refreshes the cached head
    async fn fetch_aggregate(&self, aggregate_id: Uuid) -> LockerResult<Vec<Batch>> {
        let batches = self
            .pull(Pull {
                filter_subject: self.aggregate_subject(aggregate_id),
                deliver_policy: DeliverPolicy::All,
                max_batches: None,
                expires: LOAD_EXPIRY,
            })
            .await?;

        if let Some(last) = batches.last() {
            let version = last.events.last().map(|e| e.aggregate_version).unwrap_or(0);
            self.heads
                .lock()
                .await
                .insert(aggregate_id, (last.stream_sequence, version));
        }

        Ok(batches)
    }

    /// Last stream sequence on the aggregate subject and the aggregate version
    async fn head(&self, aggregate_id: Uuid) -> LockerResult<(u64, u64)> {
        let batches = self.fetch_aggregate(aggregate_id).await?;
        Ok(batches
            .last()
            .map(|b| {
                let version = b.events.last().map(|e| e.aggregate_version).unwrap_or(0);
                (b.stream_sequence, version)
            })
            .unwrap_or((0, 0)))
    }

    /// Stream sequence to expect on the subject when appending at `expected_version`
    async fn expected_sequence(&self, aggregate_id: Uuid, expected_version: u64) -> LockerResult<u64> {
        if expected_version == 0 {
            return Ok(0);
        }
        if let Some((sequence, version)) = self.heads.lock().await.get(&aggregate_id).copied() {
            if version == expected_version {
                return Ok(sequence);
            }
        }

        let (sequence, actual) = self.head(aggregate_id).await?;
        if actual != expected_version {
            return Err(LockerError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }
        Ok(sequence)
    }
}

#[async_trait]
impl EventStore for NatsEventStore {
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: u64,
        events: Vec<DomainEvent>,
    ) -> LockerResult<u64> {
        check_batch(aggregate_id, &events)?;

        if events.is_empty() {
            let actual = self.head(aggregate_id).await?.1;
            if actual != expected_version {
                return Err(LockerError::ConcurrencyConflict {
                    aggregate_id,
                    expected: expected_version,
                    actual,
                });
            }
            return Ok(actual);
        }

        let last_sequence = self.expected_sequence(aggregate_id, expected_version).await?;

        let stamped = stamp_batch(aggregate_id, expected_version, events);
        let new_version = expected_version + stamped.len() as u64;
        let payload = serde_json::to_vec(&stamped)?;

        let mut headers = HeaderMap::new();
        headers.insert(EXPECTED_LAST_SUBJECT_SEQUENCE, last_sequence.to_string().as_str());

        let ack = self
            .jetstream
            .publish_with_headers(self.aggregate_subject(aggregate_id), headers, payload.into())
            .await
            .map_err(|e| LockerError::Storage(e.to_string()))?
            .await;

        let ack = match ack {
            Ok(ack) => ack,
            Err(e) if e.to_string().to_lowercase().contains("wrong last sequence") => {
                // Another writer got in between our read and our publish
                let (_, actual) = self.head(aggregate_id).await?;
                return Err(LockerError::ConcurrencyConflict {
                    aggregate_id,
                    expected: expected_version,
                    actual,
                });
            }
            Err(e) => return Err(LockerError::Storage(e.to_string())),
        };

        self.heads
            .lock()
            .await
            .insert(aggregate_id, (ack.sequence, new_version));

        // The append stands; a missing key is restored by reindex
        if let Err(e) = self.index(&stamped).await {
            error!(%aggregate_id, error = %e, "Correlation keys not indexed; reindex to repair");
        }

        for event in stamped {
            debug!(
                aggregate_id = %aggregate_id,
                version = event.aggregate_version,
                event_type = %event.event_type,
                "Appended event"
            );
            let _ = self.sender.send(event);
        }

        Ok(new_version)
    }

    async fn load(&self, aggregate_id: Uuid) -> LockerResult<Vec<StoredEvent>> {
        let batches = self.fetch_aggregate(aggregate_id).await?;
        Ok(batches.into_iter().flat_map(|b| b.events).collect())
    }

    async fn load_all(&self) -> LockerResult<Vec<StoredEvent>> {
        let batches = self
            .pull(Pull {
                filter_subject: self.all_subjects(),
                deliver_policy: DeliverPolicy::All,
                max_batches: None,
                expires: LOAD_EXPIRY,
            })
            .await?;
        Ok(batches.into_iter().flat_map(|b| b.events).collect())
    }

    async fn read_after(&self, position: u64, limit: usize) -> LockerResult<LogSlice> {
        let batches = self
            .pull(Pull {
                filter_subject: self.all_subjects(),
                deliver_policy: DeliverPolicy::ByStartSequence {
                    start_sequence: position + 1,
                },
                max_batches: Some(limit.max(1)),
                expires: TAIL_EXPIRY,
            })
            .await?;

        let position = batches.last().map_or(position, |b| b.stream_sequence);
        Ok(LogSlice {
            events: batches.into_iter().flat_map(|b| b.events).collect(),
            position,
        })
    }

    async fn exists(
        &self,
        aggregate_id: Uuid,
        event_type: &str,
        correlation_key: &str,
    ) -> LockerResult<bool> {
        let entry = self
            .keys
            .get(Self::index_key(aggregate_id, event_type, correlation_key))
            .await
            .map_err(|e| LockerError::Storage(format!("Failed to read key index: {}", e)))?;
        Ok(entry.is_some())
    }

    async fn version(&self, aggregate_id: Uuid) -> LockerResult<u64> {
        Ok(self.head(aggregate_id).await?.1)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoredEvent> {
        self.sender.subscribe()
    }
}
