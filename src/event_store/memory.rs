// Copyright (c) 2025 - Cowboy AI, Inc.
//! In-memory event store
//!
//! Backs tests and single-process runs without a NATS server. Appends take
//! one write lock, so the version check, the write, the guard index update
//! and the broadcast happen as a unit.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::{check_batch, stamp_batch, EventStore, LogSlice, StoredEvent, BROADCAST_CAPACITY};
use crate::errors::{LockerError, LockerResult};
use crate::events::DomainEvent;

#[derive(Default)]
struct Log {
    streams: HashMap<Uuid, Vec<StoredEvent>>,
    /// Append order across aggregates
    all: Vec<StoredEvent>,
    /// `(aggregate_id, event_type, correlation_key)`
    keys: HashSet<(Uuid, String, String)>,
}

/// Event store holding the log in memory
pub struct InMemoryEventStore {
    log: RwLock<Log>,
    sender: broadcast::Sender<StoredEvent>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::with_capacity(BROADCAST_CAPACITY)
    }

    /// Create a store whose append broadcast buffers `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            log: RwLock::new(Log::default()),
            sender,
        }
    }

    /// Number of events across all aggregates
    pub async fn len(&self) -> usize {
        self.log.read().await.all.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: u64,
        events: Vec<DomainEvent>,
    ) -> LockerResult<u64> {
        check_batch(aggregate_id, &events)?;

        let mut log = self.log.write().await;
        let actual = log
            .streams
            .get(&aggregate_id)
            .map(|stream| stream.len() as u64)
            .unwrap_or(0);

        if actual != expected_version {
            return Err(LockerError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        let stamped = stamp_batch(aggregate_id, expected_version, events);
        let new_version = expected_version + stamped.len() as u64;

        for event in stamped {
            debug!(
                aggregate_id = %aggregate_id,
                version = event.aggregate_version,
                event_type = %event.event_type,
                "Appended event"
            );
            if let Some(key) = &event.correlation_key {
                log.keys
                    .insert((aggregate_id, event.event_type.clone(), key.clone()));
            }
            log.streams.entry(aggregate_id).or_default().push(event.clone());
            log.all.push(event.clone());
            // No receivers is fine
            let _ = self.sender.send(event);
        }

        Ok(new_version)
    }

    async fn load(&self, aggregate_id: Uuid) -> LockerResult<Vec<StoredEvent>> {
        Ok(self
            .log
            .read()
            .await
            .streams
            .get(&aggregate_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_all(&self) -> LockerResult<Vec<StoredEvent>> {
        Ok(self.log.read().await.all.clone())
    }

    /// Positions are indexes into the append order
    async fn read_after(&self, position: u64, limit: usize) -> LockerResult<LogSlice> {
        let log = self.log.read().await;
        let start = (position as usize).min(log.all.len());
        let end = start.saturating_add(limit).min(log.all.len());

        Ok(LogSlice {
            events: log.all[start..end].to_vec(),
            position: end as u64,
        })
    }

    async fn exists(
        &self,
        aggregate_id: Uuid,
        event_type: &str,
        correlation_key: &str,
    ) -> LockerResult<bool> {
        Ok(self.log.read().await.keys.contains(&(
            aggregate_id,
            event_type.to_string(),
            correlation_key.to_string(),
        )))
    }

    async fn version(&self, aggregate_id: Uuid) -> LockerResult<u64> {
        Ok(self
            .log
            .read()
            .await
            .streams
            .get(&aggregate_id)
            .map(|stream| stream.len() as u64)
            .unwrap_or(0))
    }

    fn subscribe(&self) -> broadcast::Receiver<StoredEvent> {
        self.sender.subscribe()
    }
}
