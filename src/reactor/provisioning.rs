// Copyright (c) 2025 - Cowboy AI, Inc.
//! Provisioning reply reactor
//!
//! `BankProvisioned` → issue credentials → publish them to the reply target
//! → `ProvisioningReplySent`. A failed issuance or publish is recorded as
//! `ProvisioningReplyFailed` and re-raised so the worker pool retries.
//!
//! `ProvisioningFailed` → publish `{status: "error", message}`. No
//! credentials are ever issued for a rejected attempt.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info};

use super::Reactor;
use crate::aggregate::{handle_provisioning_reply, CommandError, ProvisioningReplyCommand};
use crate::credentials::CredentialStore;
use crate::domain::BankId;
use crate::errors::{LockerError, LockerResult};
use crate::event_store::{EventStore, StoredEvent};
use crate::events::event_types::{BANK_PROVISIONED, PROVISIONING_FAILED, PROVISIONING_REPLY_SENT};
use crate::events::{BankProvisioned, LockerBankEvent, ProvisioningFailed};
use crate::nats::Transport;
use crate::repository::{load_bank, update_bank};
use crate::wire::{Credentials, ProvisioningReply};

pub struct ProvisioningReplyReactor {
    store: Arc<dyn EventStore>,
    credentials: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
}

impl ProvisioningReplyReactor {
    pub fn new(
        store: Arc<dyn EventStore>,
        credentials: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            store,
            credentials,
            transport,
        }
    }

    async fn deliver_credentials(&self, attempt: u64, event: &BankProvisioned) -> LockerResult<()> {
        let bank_id = event.bank_id;

        if self
            .store
            .exists(bank_id.as_uuid(), PROVISIONING_REPLY_SENT, &attempt.to_string())
            .await?
        {
            debug!(%bank_id, attempt, "Credentials already delivered");
            return Ok(());
        }

        let state = load_bank(self.store.as_ref(), bank_id).await?;
        if state.provision_attempt != Some(attempt) {
            debug!(%bank_id, attempt, latest = ?state.provision_attempt, "Provisioning attempt superseded");
            return Ok(());
        }

        match self.issue_and_publish(bank_id, &event.reply_target).await {
            Ok(credentials) => {
                self.record(bank_id, ProvisioningReplyCommand::Sent {
                    attempt,
                    credential_user: credentials.credential_user,
                    timestamp: Utc::now(),
                })
                .await?;
                info!(%bank_id, attempt, reply_target = %event.reply_target, "Credentials delivered");
                Ok(())
            }
            Err(e) => {
                error!(%bank_id, attempt, error = %e, "Credential delivery failed");
                self.record(bank_id, ProvisioningReplyCommand::Failed {
                    attempt,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                })
                .await?;
                Err(LockerError::SideEffectFailure(format!(
                    "provisioning reply for bank {}: {}",
                    bank_id, e
                )))
            }
        }
    }

    async fn issue_and_publish(
        &self,
        bank_id: BankId,
        reply_target: &str,
    ) -> LockerResult<Credentials> {
        let credentials = self.credentials.issue(bank_id).await?;
        let reply = ProvisioningReply::Success {
            data: credentials.clone(),
        };
        self.transport
            .publish(reply_target, &serde_json::to_value(&reply)?)
            .await?;
        Ok(credentials)
    }

    async fn reject(&self, event: &ProvisioningFailed) -> LockerResult<()> {
        let reply = ProvisioningReply::Error {
            message: event.reason.clone(),
        };

        if let Err(e) = self
            .transport
            .publish(&event.reply_target, &serde_json::to_value(&reply)?)
            .await
        {
            error!(bank_id = %event.bank_id, error = %e, "Provisioning rejection publish failed");
            return Err(LockerError::SideEffectFailure(e.to_string()));
        }

        info!(
            bank_id = %event.bank_id,
            client_id = %event.client_id,
            reason = %event.reason,
            "Provisioning rejected"
        );
        Ok(())
    }

    /// Append the reply outcome; an outcome already in the log is success
    async fn record(&self, bank_id: BankId, command: ProvisioningReplyCommand) -> LockerResult<()> {
        let result = update_bank(self.store.as_ref(), bank_id, |state| {
            handle_provisioning_reply(state, command.clone()).map(|e| vec![e])
        })
        .await;

        match result {
            Ok(_) | Err(LockerError::Command(CommandError::AlreadyRecorded(_))) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Reactor for ProvisioningReplyReactor {
    fn name(&self) -> &str {
        "provisioning_reply"
    }

    fn interested(&self, event: &StoredEvent) -> bool {
        event.event_type == BANK_PROVISIONED || event.event_type == PROVISIONING_FAILED
    }

    /// Rejections are not recorded, so only deliveries are recovered
    fn recoverable(&self, event: &StoredEvent) -> bool {
        event.event_type == BANK_PROVISIONED
    }

    async fn react(&self, event: &StoredEvent) -> LockerResult<()> {
        match event.payload.as_locker_bank() {
            Some(LockerBankEvent::BankProvisioned(e)) => {
                self.deliver_credentials(event.aggregate_version, e).await
            }
            Some(LockerBankEvent::ProvisioningFailed(e)) => self.reject(e).await,
            _ => Ok(()),
        }
    }
}
