// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event Store Abstraction
//!
//! The event log is the single source of truth: aggregate state, read models
//! and reactor decisions are all derived from it.
//!
//! # Architecture
//!
//! ```text
//! Command → Handler → Events → EventStore::append ──> Persistent Storage
//!                                    │                        │
//!                                    └──> broadcast (wake) ──>│ read_after
//!                                                             v
//!                                                   Reactors / Projectors
//! ```
//!
//! The broadcast only tells consumers that something was appended. They
//! read the events themselves with `read_after` from a log position, so a
//! slow consumer or a restart never loses an event.
//!
//! # Event Store Requirements
//!
//! 1. **Append-Only**: events are never updated or deleted
//! 2. **Ordered**: `aggregate_version` starts at 1 and has no gaps
//! 3. **Optimistic concurrency**: `append` is a compare-and-append on version
//! 4. **Guard lookups**: `exists` answers "was this fact recorded?" by
//!    `(aggregate_id, event_type, correlation_key)`
//! 5. **Replay**: `load` and `load_all` reconstruct state and read models
//! 6. **Tailing**: `read_after` resumes reading the whole log from a position
//!
//! # Example
//!
//! ```rust,no_run
//! use locker_control::event_store::{EventStore, InMemoryEventStore};
//!
//! # async fn example(events: Vec<locker_control::events::DomainEvent>) -> locker_control::errors::LockerResult<()> {
//! let store = InMemoryEventStore::new();
//! let aggregate_id = uuid::Uuid::now_v7();
//!
//! let version = store.append(aggregate_id, 0, events).await?;
//! let history = store.load(aggregate_id).await?;
//! assert_eq!(history.len() as u64, version);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::errors::{LockerError, LockerResult};
use crate::events::DomainEvent;

pub mod memory;
pub mod nats;

pub use memory::InMemoryEventStore;
pub use nats::NatsEventStore;

/// Capacity of the append broadcast channel
pub const BROADCAST_CAPACITY: usize = 1024;

/// An event as recorded in the log
///
/// Serializes as `{eventId, aggregateId, aggregateVersion, type, payload,
/// occurredAt, correlationKey}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    /// Unique event ID (UUID v7 for time-ordering)
    pub event_id: Uuid,

    /// Aggregate this event belongs to
    pub aggregate_id: Uuid,

    /// Position within the aggregate stream, starting at 1
    pub aggregate_version: u64,

    /// Event type name
    #[serde(rename = "type")]
    pub event_type: String,

    /// The domain event
    pub payload: DomainEvent,

    /// When the fact occurred
    pub occurred_at: DateTime<Utc>,

    /// Idempotency key for guard lookups, if the fact has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
}

/// Events read from the log and the position to resume after them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSlice {
    pub events: Vec<StoredEvent>,
    pub position: u64,
}

impl StoredEvent {
    /// Wrap a domain event at its position in the aggregate stream
    pub fn new(aggregate_id: Uuid, aggregate_version: u64, payload: DomainEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_version,
            event_type: payload.event_type_name().to_string(),
            occurred_at: payload.timestamp(),
            correlation_key: payload.correlation_key(),
            payload,
        }
    }

    /// Whether this is the fact an idempotency guard is looking for
    pub fn matches_key(&self, event_type: &str, correlation_key: &str) -> bool {
        self.event_type == event_type && self.correlation_key.as_deref() == Some(correlation_key)
    }
}

/// Event Store trait for persisting and retrieving domain events
///
/// Implementations must make `append` atomic per call: either every event in
/// the batch is recorded at consecutive versions or none is.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append events to an aggregate's stream
    ///
    /// # Arguments
    ///
    /// * `aggregate_id` - The aggregate these events belong to
    /// * `expected_version` - Version the caller folded its state from (0 for a new aggregate)
    /// * `events` - Events to append, in order
    ///
    /// # Returns
    ///
    /// The new version after appending
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict` if the stored version is not `expected_version`
    /// - `Validation` if an event belongs to a different aggregate
    /// - `Storage` if writing to storage fails
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: u64,
        events: Vec<DomainEvent>,
    ) -> LockerResult<u64>;

    /// Read all events for an aggregate in version order
    async fn load(&self, aggregate_id: Uuid) -> LockerResult<Vec<StoredEvent>>;

    /// Read every event in the log, in append order
    ///
    /// Used to rebuild read models.
    async fn load_all(&self) -> LockerResult<Vec<StoredEvent>>;

    /// Whether a fact of `event_type` keyed by `correlation_key` was recorded
    /// for the aggregate
    async fn exists(
        &self,
        aggregate_id: Uuid,
        event_type: &str,
        correlation_key: &str,
    ) -> LockerResult<bool>;

    /// Read events appended after log `position`, in append order
    ///
    /// Positions are opaque: start from 0 and resume from the returned
    /// `position`, which equals the one passed in when nothing is new.
    /// At most `limit` append batches are read per call.
    async fn read_after(&self, position: u64, limit: usize) -> LockerResult<LogSlice>;

    /// Current version of an aggregate, 0 if it has no events
    async fn version(&self, aggregate_id: Uuid) -> LockerResult<u64> {
        Ok(self
            .load(aggregate_id)
            .await?
            .last()
            .map(|e| e.aggregate_version)
            .unwrap_or(0))
    }

    /// Receive every event appended through this store from now on
    ///
    /// Delivery is best effort; use it to wake up, then `read_after`.
    fn subscribe(&self) -> broadcast::Receiver<StoredEvent>;
}

/// Reject batches that mix aggregates
pub(crate) fn check_batch(aggregate_id: Uuid, events: &[DomainEvent]) -> LockerResult<()> {
    match events.iter().find(|e| e.aggregate_id() != aggregate_id) {
        Some(stray) => Err(LockerError::Validation(format!(
            "{} belongs to aggregate {}, not {}",
            stray.event_type_name(),
            stray.aggregate_id(),
            aggregate_id
        ))),
        None => Ok(()),
    }
}

/// Stamp a batch with consecutive versions after `expected_version`
pub(crate) fn stamp_batch(
    aggregate_id: Uuid,
    expected_version: u64,
    events: Vec<DomainEvent>,
) -> Vec<StoredEvent> {
    events
        .into_iter()
        .zip(expected_version + 1..)
        .map(|(event, version)| StoredEvent::new(aggregate_id, version, event))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BankId;
    use crate::events::{ConnectionEstablished, LockerBankEvent};

    fn established(bank_id: BankId) -> DomainEvent {
        LockerBankEvent::ConnectionEstablished(ConnectionEstablished {
            bank_id,
            timestamp: Utc::now(),
        })
        .into()
    }

    #[test]
    fn test_stored_event_shape() {
        let bank_id = BankId::new();
        let stored = StoredEvent::new(bank_id.as_uuid(), 1, established(bank_id));

        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["aggregateId"], bank_id.to_string());
        assert_eq!(json["aggregateVersion"], 1);
        assert_eq!(json["type"], "connection_established");
        assert!(json["payload"].is_object());
        assert!(json["occurredAt"].is_string());
        assert!(json.get("correlationKey").is_none());
    }

    #[test]
    fn test_stamp_batch_is_consecutive() {
        let bank_id = BankId::new();
        let stamped = stamp_batch(
            bank_id.as_uuid(),
            4,
            vec![established(bank_id), established(bank_id)],
        );
        let versions: Vec<u64> = stamped.iter().map(|e| e.aggregate_version).collect();
        assert_eq!(versions, vec![5, 6]);
    }

    #[test]
    fn test_check_batch_rejects_foreign_events() {
        let bank_id = BankId::new();
        let other = BankId::new();
        assert!(check_batch(bank_id.as_uuid(), &[established(bank_id)]).is_ok());
        assert!(matches!(
            check_batch(bank_id.as_uuid(), &[established(other)]),
            Err(LockerError::Validation(_))
        ));
    }
}
