// Copyright (c) 2025 - Cowboy AI, Inc.
//! NATS KV backed inbox
//!
//! Insert-if-absent is an `update` expecting revision 0: the server refuses
//! it with a wrong-last-sequence error when the key holds any revision,
//! whoever wrote it. Keys are `{device}.{hex(transaction_id)}` so any
//! transaction id is a valid key.

use async_nats::jetstream::{self, kv::Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{CommandTransaction, Inbox};
use crate::errors::{LockerError, LockerResult};
use crate::jetstream::{create_inbox_bucket, InboxBucketConfig};

pub struct NatsInbox {
    kv: Store,
}

impl NatsInbox {
    pub async fn new(client: async_nats::Client, config: InboxBucketConfig) -> LockerResult<Self> {
        let jetstream = jetstream::new(client);
        let kv = create_inbox_bucket(&jetstream, &config).await?;
        Ok(Self { kv })
    }

    fn key(device_identity: &str, transaction_id: &str) -> String {
        format!("{}.{}", device_identity, hex::encode(transaction_id))
    }

    /// Whether a revision-0 update failed because the key already exists
    fn is_existing_key(error: &str) -> bool {
        let error = error.to_lowercase();
        error.contains("wrong last sequence") || error.contains("key exists")
    }

    async fn read(&self, key: &str) -> LockerResult<Option<(CommandTransaction, u64)>> {
        let entry = self
            .kv
            .entry(key)
            .await
            .map_err(|e| LockerError::Storage(format!("Failed to read inbox row: {}", e)))?;

        match entry {
            Some(entry) if !entry.value.is_empty() => {
                let row = serde_json::from_slice(&entry.value)?;
                Ok(Some((row, entry.revision)))
            }
            _ => Ok(None),
        }
    }

    /// Write `row` if the key is still at `revision`; a lost race is ignored
    async fn update(&self, key: &str, row: &CommandTransaction, revision: u64) -> LockerResult<()> {
        let value = serde_json::to_vec(row)?;
        if let Err(e) = self.kv.update(key, value.into(), revision).await {
            debug!(key, error = %e, "Inbox row changed concurrently, diagnostics not updated");
        }
        Ok(())
    }
}

#[async_trait]
impl Inbox for NatsInbox {
    async fn record_if_first(&self, transaction: CommandTransaction) -> LockerResult<bool> {
        let key = Self::key(&transaction.device_identity, &transaction.transaction_id);
        let value = serde_json::to_vec(&transaction)?;

        match self.kv.update(&key, value.into(), 0).await {
            Ok(_) => Ok(true),
            Err(e) if Self::is_existing_key(&e.to_string()) => {
                if let Some((mut row, revision)) = self.read(&key).await? {
                    row.touch(&transaction);
                    self.update(&key, &row, revision).await?;
                }
                debug!(
                    device = %transaction.device_identity,
                    transaction_id = %transaction.transaction_id,
                    "Duplicate delivery"
                );
                Ok(false)
            }
            Err(e) => Err(LockerError::Storage(format!(
                "Failed to create inbox row: {}",
                e
            ))),
        }
    }

    async fn mark_completed(
        &self,
        device_identity: &str,
        transaction_id: &str,
        at: DateTime<Utc>,
    ) -> LockerResult<()> {
        let key = Self::key(device_identity, transaction_id);
        if let Some((mut row, revision)) = self.read(&key).await? {
            if row.completed_at.is_none() {
                row.completed_at = Some(at);
                self.update(&key, &row, revision).await?;
            }
        }
        Ok(())
    }

    async fn get(
        &self,
        device_identity: &str,
        transaction_id: &str,
    ) -> LockerResult<Option<CommandTransaction>> {
        Ok(self
            .read(&Self::key(device_identity, transaction_id))
            .await?
            .map(|(row, _)| row))
    }
}
