// Copyright (c) 2025 - Cowboy AI, Inc.
//! LockerBank Aggregate
//!
//! Provisioning and connectivity state of one bank, folded from its events.
//!
//! ```text
//! Events → apply_event() → LockerBankState
//! ```

use chrono::{DateTime, Utc};

use crate::domain::{BankId, ConnectionStatus, ProvisioningToken};
use crate::events::LockerBankEvent;
use crate::state_machine::provisioning::{ProvisioningInput, ProvisioningStatus};
use crate::state_machine::StateMachine;

/// Immutable LockerBank state
///
/// ```rust,ignore
/// let state = LockerBankState::from_events(bank_id, &events);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockerBankState {
    pub id: BankId,

    pub provisioning_token: Option<ProvisioningToken>,

    pub provisioning_status: ProvisioningStatus,

    pub heartbeat_interval_seconds: u32,

    pub heartbeat_timeout_seconds: Option<u32>,

    /// Client id of the latest accepted registration
    pub client_id: Option<String>,

    pub reply_target: Option<String>,

    /// Version of the latest `BankProvisioned` event
    pub provision_attempt: Option<u64>,

    /// Attempts whose credentials were delivered
    pub replied_attempts: Vec<u64>,

    pub connection_status: ConnectionStatus,

    pub last_connection_change_at: Option<DateTime<Utc>>,

    /// Number of events folded
    pub version: u64,

    pub created_at: Option<DateTime<Utc>>,

    pub updated_at: Option<DateTime<Utc>>,
}

impl LockerBankState {
    /// Initial state for folding
    pub fn empty(id: BankId) -> Self {
        Self {
            id,
            provisioning_token: None,
            provisioning_status: ProvisioningStatus::Unprovisioned,
            heartbeat_interval_seconds: 0,
            heartbeat_timeout_seconds: None,
            client_id: None,
            reply_target: None,
            provision_attempt: None,
            replied_attempts: Vec::new(),
            connection_status: ConnectionStatus::Unknown,
            last_connection_change_at: None,
            version: 0,
            created_at: None,
            updated_at: None,
        }
    }

    /// Reconstruct state from the bank's events in version order
    pub fn from_events<'a>(id: BankId, events: impl IntoIterator<Item = &'a LockerBankEvent>) -> Self {
        events.into_iter().fold(Self::empty(id), apply_event)
    }

    pub fn is_initialized(&self) -> bool {
        self.created_at.is_some()
    }

    pub fn is_provisioned(&self) -> bool {
        self.provisioning_status == ProvisioningStatus::Provisioned
    }
}

/// Move the provisioning status along the FSM; a fact the table does not
/// know leaves the status unchanged.
fn advance(status: ProvisioningStatus, input: ProvisioningInput) -> ProvisioningStatus {
    status
        .transition(&input)
        .map(|(next, _)| next)
        .unwrap_or(status)
}

/// Apply event to state (pure function)
///
/// Never fails: events are facts that already happened.
pub fn apply_event(state: LockerBankState, event: &LockerBankEvent) -> LockerBankState {
    use LockerBankEvent::*;

    let version = state.version + 1;
    let updated_at = Some(event.timestamp());

    match event {
        BankRegistered(e) => LockerBankState {
            id: e.bank_id,
            provisioning_token: Some(e.provisioning_token.clone()),
            heartbeat_interval_seconds: e.heartbeat_interval_seconds,
            heartbeat_timeout_seconds: e.heartbeat_timeout_seconds,
            created_at: Some(e.timestamp),
            version,
            updated_at,
            ..state
        },

        BankProvisioned(e) => LockerBankState {
            provisioning_status: advance(state.provisioning_status, ProvisioningInput::Provision),
            client_id: Some(e.client_id.clone()),
            reply_target: Some(e.reply_target.clone()),
            provision_attempt: Some(version),
            version,
            updated_at,
            ..state
        },

        // Rejected attempt; the bank keeps whatever status it had
        ProvisioningFailed(_) => LockerBankState {
            version,
            updated_at,
            ..state
        },

        ProvisioningReplySent(e) => {
            let mut replied_attempts = state.replied_attempts.clone();
            replied_attempts.push(e.attempt);
            LockerBankState {
                provisioning_status: advance(
                    state.provisioning_status,
                    ProvisioningInput::ReplySent,
                ),
                replied_attempts,
                version,
                updated_at,
                ..state
            }
        }

        ProvisioningReplyFailed(_) => LockerBankState {
            provisioning_status: advance(state.provisioning_status, ProvisioningInput::ReplyFailed),
            version,
            updated_at,
            ..state
        },

        ConnectionEstablished(e) => LockerBankState {
            connection_status: ConnectionStatus::Online,
            last_connection_change_at: Some(e.timestamp),
            version,
            updated_at,
            ..state
        },

        ConnectionLost(e) => LockerBankState {
            connection_status: ConnectionStatus::Offline,
            last_connection_change_at: Some(e.timestamp),
            version,
            updated_at,
            ..state
        },

        CommandResponseReceived(_) | ConfigApplied(_) | ConfigApplyFailed(_) => LockerBankState {
            version,
            updated_at,
            ..state
        },
    }
}
