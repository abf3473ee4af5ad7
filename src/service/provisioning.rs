// Copyright (c) 2025 - Cowboy AI, Inc.
//! Provisioning Service
//!
//! Registers banks with their provisioning token and turns a device's
//! `device/register/{token}` message into a provisioning decision. The
//! credentials themselves are delivered by the provisioning reply reactor.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::aggregate::{
    handle_provision, handle_register_bank, ProvisionBankCommand, RegisterBankCommand,
};
use crate::config::HeartbeatConfig;
use crate::domain::{BankId, ProvisioningToken};
use crate::errors::{LockerError, LockerResult};
use crate::event_store::EventStore;
use crate::events::{BankRegistered, LockerBankEvent};
use crate::read_model::BankRegistry;
use crate::repository::update_bank;
use crate::topics::{self, DeviceTopic};

/// A bank to register; unset heartbeat settings take the configured defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankRegistration {
    pub bank_id: BankId,
    pub provisioning_token: ProvisioningToken,
    pub heartbeat_interval_seconds: Option<u32>,
    pub heartbeat_timeout_seconds: Option<u32>,
}

impl BankRegistration {
    pub fn new(bank_id: BankId, provisioning_token: ProvisioningToken) -> Self {
        Self {
            bank_id,
            provisioning_token,
            heartbeat_interval_seconds: None,
            heartbeat_timeout_seconds: None,
        }
    }
}

#[async_trait]
pub trait ProvisioningService: Send + Sync {
    /// Register a bank
    ///
    /// Without an explicit timeout the bank gets the configured default,
    /// raised to three intervals for slow-beating banks.
    ///
    /// # Errors
    /// - `Validation` if the token already belongs to another bank
    /// - `Command(AlreadyInitialized)` if the bank exists
    async fn register_bank(&self, registration: BankRegistration) -> LockerResult<BankRegistered>;

    /// Handle a device registration on `device/register/{token}`
    ///
    /// Returns `BankProvisioned`, or `ProvisioningFailed` when the bank is
    /// already provisioned; both are normal outcomes.
    ///
    /// # Errors
    /// - `Validation` for an unknown token or a client id that cannot name
    ///   a reply topic
    async fn provision(&self, token: &str, client_id: &str) -> LockerResult<LockerBankEvent>;
}

pub struct EventSourcedProvisioningService {
    store: Arc<dyn EventStore>,
    registry: Arc<BankRegistry>,
    heartbeat: HeartbeatConfig,
}

impl EventSourcedProvisioningService {
    pub fn new(
        store: Arc<dyn EventStore>,
        registry: Arc<BankRegistry>,
        heartbeat: HeartbeatConfig,
    ) -> Self {
        Self {
            store,
            registry,
            heartbeat,
        }
    }
}

#[async_trait]
impl ProvisioningService for EventSourcedProvisioningService {
    #[instrument(skip(self, registration), fields(bank_id = %registration.bank_id))]
    async fn register_bank(&self, registration: BankRegistration) -> LockerResult<BankRegistered> {
        let bank_id = registration.bank_id;
        let token = registration.provisioning_token.as_str().to_string();

        // Claimed before the append so concurrent registrations of one
        // token cannot both pass while the registry catches up
        if let Err(owner) = self.registry.claim_token(&token, bank_id).await {
            return Err(LockerError::Validation(format!(
                "provisioning token already assigned to bank {}",
                owner
            )));
        }

        let interval = registration
            .heartbeat_interval_seconds
            .unwrap_or(self.heartbeat.default_interval_seconds);
        let timeout = registration
            .heartbeat_timeout_seconds
            .unwrap_or_else(|| self.heartbeat.default_timeout_for(interval));

        let command = RegisterBankCommand {
            bank_id,
            provisioning_token: registration.provisioning_token,
            heartbeat_interval_seconds: interval,
            heartbeat_timeout_seconds: Some(timeout),
            timestamp: Utc::now(),
        };

        let result = update_bank(self.store.as_ref(), bank_id, |state| {
            handle_register_bank(state, command.clone())
                .map(|e| vec![LockerBankEvent::BankRegistered(e)])
        })
        .await;

        let events = match result {
            Ok(events) => events,
            Err(e) => {
                if matches!(self.store.version(bank_id.as_uuid()).await, Ok(0)) {
                    self.registry.release_token(&token, bank_id).await;
                }
                return Err(e);
            }
        };

        match events.into_iter().next() {
            Some(LockerBankEvent::BankRegistered(registered)) => {
                info!(
                    interval = registered.heartbeat_interval_seconds,
                    timeout = ?registered.heartbeat_timeout_seconds,
                    "Bank registered"
                );
                Ok(registered)
            }
            _ => Err(LockerError::Storage("registration appended no event".to_string())),
        }
    }

    #[instrument(skip(self, token))]
    async fn provision(&self, token: &str, client_id: &str) -> LockerResult<LockerBankEvent> {
        let bank_id = match self.registry.find_by_token(token).await {
            Some(bank_id) => bank_id,
            None => {
                warn!("Registration with unknown provisioning token");
                return Err(LockerError::Validation(
                    "unknown provisioning token".to_string(),
                ));
            }
        };

        let reply_target = topics::provisioning_reply(client_id);
        if DeviceTopic::parse(&reply_target).is_none() {
            return Err(LockerError::Validation(format!(
                "client id {:?} cannot name a reply topic",
                client_id
            )));
        }

        let command = ProvisionBankCommand {
            client_id: client_id.to_string(),
            reply_target,
            timestamp: Utc::now(),
        };

        let events = update_bank(self.store.as_ref(), bank_id, |state| {
            handle_provision(state, command.clone()).map(|e| vec![e])
        })
        .await?;

        let event = events.into_iter().next().ok_or_else(|| {
            LockerError::Storage("provisioning appended no event".to_string())
        })?;

        match &event {
            LockerBankEvent::BankProvisioned(_) => info!(%bank_id, "Bank provisioned"),
            LockerBankEvent::ProvisioningFailed(e) => {
                info!(%bank_id, reason = %e.reason, "Provisioning refused")
            }
            _ => {}
        }
        Ok(event)
    }
}
