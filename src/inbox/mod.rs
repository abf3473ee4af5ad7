// Copyright (c) 2025 - Cowboy AI, Inc.
//! Command-Response Inbox
//!
//! Devices publish responses with at-least-once delivery, so the same
//! `(device identity, transaction id)` pair can arrive any number of times.
//! The inbox turns that into at-most-once effect:
//!
//! ```text
//! response ──> record_if_first ──true──> CommandResponseReceived ──> derivation
//!                     │
//!                     └──false──> touch last_seen_at, stop
//! ```
//!
//! The existence of a row is the dedup signal; its content is diagnostic.
//! A duplicate is a normal outcome and never an error.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::LockerResult;
use crate::wire::{CommandResponse, CommandResult};

pub mod nats;

pub use nats::NatsInbox;

/// One inbox row per `(device_identity, transaction_id)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTransaction {
    pub device_identity: String,
    pub transaction_id: String,
    pub action: String,
    pub result: CommandResult,
    pub error_code: Option<String>,
    pub source_topic: String,
    /// SHA-256 of the first delivery, hex encoded
    pub payload_hash: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Deliveries seen, including the first
    pub deliveries: u32,
}

impl CommandTransaction {
    /// Row for a parsed response as first seen at `at`
    pub fn new(
        device_identity: &str,
        response: &CommandResponse,
        source_topic: &str,
        payload: &[u8],
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            device_identity: device_identity.to_string(),
            transaction_id: response.transaction_id.clone(),
            action: response.action.clone(),
            result: response.result,
            error_code: response.error_code.clone(),
            source_topic: source_topic.to_string(),
            payload_hash: payload_hash(payload),
            first_seen_at: at,
            last_seen_at: at,
            completed_at: None,
            deliveries: 1,
        }
    }

    /// Fold a later delivery of the same transaction into the row
    pub fn touch(&mut self, duplicate: &CommandTransaction) {
        if duplicate.payload_hash != self.payload_hash {
            warn!(
                device = %self.device_identity,
                transaction_id = %self.transaction_id,
                first = %self.payload_hash,
                redelivered = %duplicate.payload_hash,
                "Redelivered response differs from first delivery"
            );
        }
        self.last_seen_at = self.last_seen_at.max(duplicate.last_seen_at);
        self.deliveries += 1;
    }
}

/// Hex SHA-256 of a raw payload
pub fn payload_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

#[async_trait]
pub trait Inbox: Send + Sync {
    /// Insert the row unless `(device_identity, transaction_id)` exists
    ///
    /// Returns `true` for the first delivery. A duplicate only refreshes
    /// `last_seen_at` and returns `false`.
    async fn record_if_first(&self, transaction: CommandTransaction) -> LockerResult<bool>;

    /// Stamp the transaction as fully processed
    async fn mark_completed(
        &self,
        device_identity: &str,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> LockerResult<()>;

    async fn get(
        &self,
        device_identity: &str,
        transaction_id: &str,
    ) -> LockerResult<Option<CommandTransaction>>;
}

/// Inbox held in process memory
#[derive(Debug, Default)]
pub struct InMemoryInbox {
    rows: Mutex<HashMap<(String, String), CommandTransaction>>,
}

impl InMemoryInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl Inbox for InMemoryInbox {
    async fn record_if_first(&self, transaction: CommandTransaction) -> LockerResult<bool> {
        use std::collections::hash_map::Entry;

        let key = (
            transaction.device_identity.clone(),
            transaction.transaction_id.clone(),
        );

        let mut rows = self.rows.lock().await;
        match rows.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(transaction);
                Ok(true)
            }
            Entry::Occupied(mut row) => {
                row.get_mut().touch(&transaction);
                debug!(
                    device = %transaction.device_identity,
                    transaction_id = %transaction.transaction_id,
                    deliveries = row.get().deliveries,
                    "Duplicate delivery"
                );
                Ok(false)
            }
        }
    }

    async fn mark_completed(
        &self,
        device_identity: &str,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> LockerResult<()> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.get_mut(&(device_identity.to_string(), transaction_id.to_string()))
        {
            row.completed_at.get_or_insert(at);
        }
        Ok(())
    }

    async fn get(
        &self,
        device_identity: &str,
        transaction_id: &str,
    ) -> LockerResult<Option<CommandTransaction>> {
        Ok(self
            .rows
            .lock()
            .await
            .get(&(device_identity.to_string(), transaction_id.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::parse_command_response;
    use chrono::Duration;
    use std::sync::Arc;

    const PAYLOAD: &[u8] = br#"{"type":"command_response","action":"open_compartment","result":"success","transaction_id":"T-1"}"#;

    fn at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn transaction(payload: &[u8], seen: DateTime<Utc>) -> CommandTransaction {
        let response = parse_command_response(payload).unwrap();
        CommandTransaction::new("bank-1", &response, "device/bank-1/response", payload, seen)
    }

    #[tokio::test]
    async fn test_first_delivery_wins() {
        let inbox = InMemoryInbox::new();

        assert!(inbox.record_if_first(transaction(PAYLOAD, at())).await.unwrap());
        assert!(!inbox
            .record_if_first(transaction(PAYLOAD, at() + Duration::seconds(5)))
            .await
            .unwrap());

        let row = inbox.get("bank-1", "T-1").await.unwrap().unwrap();
        assert_eq!(row.deliveries, 2);
        assert_eq!(row.first_seen_at, at());
        assert_eq!(row.last_seen_at, at() + Duration::seconds(5));
        assert_eq!(inbox.len().await, 1);
    }

    #[tokio::test]
    async fn test_same_transaction_on_other_device_is_distinct() {
        let inbox = InMemoryInbox::new();
        let response = parse_command_response(PAYLOAD).unwrap();

        let a = CommandTransaction::new("bank-1", &response, "t", PAYLOAD, at());
        let b = CommandTransaction::new("bank-2", &response, "t", PAYLOAD, at());

        assert!(inbox.record_if_first(a).await.unwrap());
        assert!(inbox.record_if_first(b).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_single_insert() {
        let inbox = Arc::new(InMemoryInbox::new());

        let attempts = (0..16).map(|_| {
            let inbox = inbox.clone();
            tokio::spawn(async move { inbox.record_if_first(transaction(PAYLOAD, at())).await })
        });
        let results = futures::future::join_all(attempts).await;

        let firsts = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(true))))
            .count();
        assert_eq!(firsts, 1);

        let row = inbox.get("bank-1", "T-1").await.unwrap().unwrap();
        assert_eq!(row.deliveries, 16);
    }

    #[tokio::test]
    async fn test_mark_completed_keeps_first_stamp() {
        let inbox = InMemoryInbox::new();
        inbox.record_if_first(transaction(PAYLOAD, at())).await.unwrap();

        inbox.mark_completed("bank-1", "T-1", at()).await.unwrap();
        inbox
            .mark_completed("bank-1", "T-1", at() + Duration::minutes(1))
            .await
            .unwrap();

        let row = inbox.get("bank-1", "T-1").await.unwrap().unwrap();
        assert_eq!(row.completed_at, Some(at()));
    }

    #[test]
    fn test_payload_hash_is_stable() {
        assert_eq!(payload_hash(PAYLOAD), payload_hash(PAYLOAD));
        assert_ne!(payload_hash(PAYLOAD), payload_hash(b"{}"));
        assert_eq!(payload_hash(b"").len(), 64);
    }
}
