// Copyright (c) 2025 - Cowboy AI, Inc.
//! Response-derivation reactor
//!
//! Turns a recorded `CommandResponseReceived` into the domain fact it
//! reports:
//!
//! | action | result | derived event | aggregate |
//! |---|---|---|---|
//! | `open_compartment` | success | `CompartmentOpened` | open request |
//! | `open_compartment` | error | `CompartmentOpeningFailed` | open request |
//! | `apply_config` | success | `ConfigApplied` (needs `data.config_hash`) | bank |
//! | `apply_config` | error | `ConfigApplyFailed` | bank |
//!
//! Every derivation first asks the event log whether the derived fact is
//! already recorded for the transaction id, independently of the inbox.
//! The wire response carries no compartment; it is recovered from the open
//! request the transaction id names. Orphan responses are logged and
//! dropped.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::Reactor;
use crate::aggregate::{
    handle_config_outcome, handle_open_outcome, CommandError, RecordConfigOutcomeCommand,
    RecordOpenOutcomeCommand,
};
use crate::domain::CorrelationId;
use crate::errors::{LockerError, LockerResult};
use crate::event_store::{EventStore, StoredEvent};
use crate::events::event_types::{
    COMMAND_RESPONSE_RECEIVED, COMPARTMENT_OPENED, COMPARTMENT_OPENING_FAILED, CONFIG_APPLIED,
    CONFIG_APPLY_FAILED,
};
use crate::events::{CommandResponseReceived, LockerBankEvent};
use crate::inbox::Inbox;
use crate::repository::{load_open_request, update_bank_unless_recorded, update_open_request};
use crate::wire::{CommandAction, CommandResult};

pub struct ResponseDerivationReactor {
    store: Arc<dyn EventStore>,
    inbox: Arc<dyn Inbox>,
}

impl ResponseDerivationReactor {
    pub fn new(store: Arc<dyn EventStore>, inbox: Arc<dyn Inbox>) -> Self {
        Self { store, inbox }
    }

    async fn derive_open_outcome(&self, response: &CommandResponseReceived) -> LockerResult<()> {
        let correlation_id: CorrelationId = match response.transaction_id.parse() {
            Ok(id) => id,
            Err(_) => {
                warn!(
                    bank_id = %response.bank_id,
                    transaction_id = %response.transaction_id,
                    "Orphan response: transaction id is not a correlation id"
                );
                return Ok(());
            }
        };

        let key = correlation_id.to_string();
        for event_type in [COMPARTMENT_OPENED, COMPARTMENT_OPENING_FAILED] {
            if self
                .store
                .exists(correlation_id.as_uuid(), event_type, &key)
                .await?
            {
                debug!(%correlation_id, event_type, "Outcome already derived");
                return Ok(());
            }
        }

        let state = load_open_request(self.store.as_ref(), correlation_id).await?;
        if !state.is_initialized() {
            let orphan = LockerError::UnknownCorrelation(key);
            warn!(
                error = %orphan,
                bank_id = %response.bank_id,
                "Orphan response dropped"
            );
            return Ok(());
        }

        let command = RecordOpenOutcomeCommand {
            responding_bank: response.bank_id,
            result: response.result,
            error_code: response.error_code.clone(),
            message: response.message.clone(),
            timestamp: response.timestamp,
        };

        let result = update_open_request(self.store.as_ref(), correlation_id, |state| {
            handle_open_outcome(state, command.clone()).map(|e| vec![e])
        })
        .await;

        match result {
            Ok(_) => {
                info!(%correlation_id, result = %response.result, "Open outcome recorded");
                Ok(())
            }
            Err(LockerError::Command(CommandError::AlreadyRecorded(what))) => {
                debug!(%correlation_id, %what, "Outcome already derived");
                Ok(())
            }
            Err(LockerError::Command(CommandError::BankMismatch { expected, actual })) => {
                warn!(
                    %correlation_id,
                    %expected,
                    %actual,
                    "Response from a bank the request was not dispatched to; dropped"
                );
                Ok(())
            }
            Err(LockerError::Command(e)) => {
                warn!(
                    %correlation_id,
                    error = %e,
                    status = ?state.status,
                    "Response does not fit the request; dropped"
                );
                Ok(())
            }
            // OutOfOrder (OpeningSent not landed yet) and infrastructure errors retry
            Err(e) => Err(e),
        }
    }

    async fn derive_config_outcome(&self, response: &CommandResponseReceived) -> LockerResult<()> {
        let config_hash = response
            .data
            .as_ref()
            .and_then(|data| data.get("config_hash"))
            .and_then(Value::as_str)
            .filter(|hash| !hash.is_empty())
            .map(str::to_string);

        if response.result == CommandResult::Success && config_hash.is_none() {
            warn!(
                bank_id = %response.bank_id,
                transaction_id = %response.transaction_id,
                "apply_config success without config_hash; dropped"
            );
            return Ok(());
        }

        let command = RecordConfigOutcomeCommand {
            transaction_id: response.transaction_id.clone(),
            result: response.result,
            config_hash,
            error_code: response.error_code.clone(),
            message: response.message.clone(),
            timestamp: response.timestamp,
        };

        let derived = update_bank_unless_recorded(
            self.store.as_ref(),
            response.bank_id,
            &[CONFIG_APPLIED, CONFIG_APPLY_FAILED],
            &response.transaction_id,
            |state| handle_config_outcome(state, command.clone()).map(|e| vec![e]),
        )
        .await?;

        if !derived.is_empty() {
            info!(
                bank_id = %response.bank_id,
                transaction_id = %response.transaction_id,
                result = %response.result,
                "Config outcome recorded"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Reactor for ResponseDerivationReactor {
    fn name(&self) -> &str {
        "response_derivation"
    }

    fn interested(&self, event: &StoredEvent) -> bool {
        event.event_type == COMMAND_RESPONSE_RECEIVED
    }

    async fn react(&self, event: &StoredEvent) -> LockerResult<()> {
        let response = match event.payload.as_locker_bank() {
            Some(LockerBankEvent::CommandResponseReceived(response)) => response,
            _ => return Ok(()),
        };

        match CommandAction::parse(&response.action) {
            CommandAction::OpenCompartment => self.derive_open_outcome(response).await?,
            CommandAction::ApplyConfig => self.derive_config_outcome(response).await?,
            CommandAction::Other(action) => {
                info!(
                    bank_id = %response.bank_id,
                    transaction_id = %response.transaction_id,
                    %action,
                    "No derivation for action"
                );
            }
        }

        self.inbox
            .mark_completed(
                &response.bank_id.to_string(),
                &response.transaction_id,
                Utc::now(),
            )
            .await
    }
}
