// Copyright (c) 2025 - Cowboy AI, Inc.
//! Pure Functional Command Handlers
//!
//! ```text
//! handle_command(&State, Command) → Result<Event, CommandError>
//! ```
//!
//! All handlers are **pure functions**:
//! - No side effects (no I/O, no Utc::now(), no mutations)
//! - Deterministic (same inputs → same output)
//!
//! Business outcomes are events, not errors: an open request without an
//! active grant yields `OpenDenied`, a second registration of a provisioned
//! bank yields `ProvisioningFailed`. `CommandError` is reserved for commands
//! the current state cannot accept at all.

use crate::aggregate::commands::*;
use crate::aggregate::compartment_open::CompartmentOpenState;
use crate::aggregate::locker_bank::LockerBankState;
use crate::domain::{Actor, BankId, ConnectionStatus};
use crate::events::*;
use crate::state_machine::open_request::{OpenInput, OpenRequestStatus};
use crate::state_machine::provisioning::ProvisioningInput;
use crate::state_machine::{StateMachine, TransitionError};
use crate::wire::CommandResult;

/// Command validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Aggregate has no events yet
    #[error("Aggregate not initialized")]
    NotInitialized,

    /// Aggregate already exists
    #[error("Aggregate already initialized")]
    AlreadyInitialized,

    /// The fact this command would record is already in the log
    #[error("Already recorded: {0}")]
    AlreadyRecorded(String),

    /// The command depends on a fact that has not been recorded yet
    #[error("Awaiting {0}")]
    Awaiting(String),

    /// Response came from a bank other than the one the request targets
    #[error("Response from bank {actual}, request targets bank {expected}")]
    BankMismatch { expected: BankId, actual: BankId },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Business rule violation
    #[error("Business rule violation: {0}")]
    BusinessRuleViolation(String),
}

pub const ALREADY_PROVISIONED: &str = "already provisioned";

// ============================================================================
// LockerBank
// ============================================================================

/// Handle RegisterBank command
///
/// # Business Rules
/// - Bank must not already exist
/// - Heartbeat interval must be positive
/// - A timeout, when set, must be at least one interval
pub fn handle_register_bank(
    state: &LockerBankState,
    command: RegisterBankCommand,
) -> Result<BankRegistered, CommandError> {
    if state.is_initialized() {
        return Err(CommandError::AlreadyInitialized);
    }

    if command.heartbeat_interval_seconds == 0 {
        return Err(CommandError::BusinessRuleViolation(
            "heartbeat interval must be positive".to_string(),
        ));
    }

    if let Some(timeout) = command.heartbeat_timeout_seconds {
        if timeout < command.heartbeat_interval_seconds {
            return Err(CommandError::BusinessRuleViolation(format!(
                "heartbeat timeout {}s is shorter than interval {}s",
                timeout, command.heartbeat_interval_seconds
            )));
        }
    }

    Ok(BankRegistered {
        bank_id: command.bank_id,
        provisioning_token: command.provisioning_token,
        heartbeat_interval_seconds: command.heartbeat_interval_seconds,
        heartbeat_timeout_seconds: command.heartbeat_timeout_seconds,
        timestamp: command.timestamp,
    })
}

/// Handle ProvisionBank command
///
/// An already provisioned bank yields `ProvisioningFailed("already
/// provisioned")`: the caller sees a normal outcome and no credentials are
/// issued for it.
pub fn handle_provision(
    state: &LockerBankState,
    command: ProvisionBankCommand,
) -> Result<LockerBankEvent, CommandError> {
    if !state.is_initialized() {
        return Err(CommandError::NotInitialized);
    }

    if command.client_id.trim().is_empty() {
        return Err(CommandError::BusinessRuleViolation(
            "client id is empty".to_string(),
        ));
    }

    match state
        .provisioning_status
        .transition(&ProvisioningInput::Provision)
    {
        Ok(_) => Ok(LockerBankEvent::BankProvisioned(BankProvisioned {
            bank_id: state.id,
            client_id: command.client_id,
            reply_target: command.reply_target,
            timestamp: command.timestamp,
        })),
        Err(_) => Ok(LockerBankEvent::ProvisioningFailed(ProvisioningFailed {
            bank_id: state.id,
            client_id: command.client_id,
            reply_target: command.reply_target,
            reason: ALREADY_PROVISIONED.to_string(),
            timestamp: command.timestamp,
        })),
    }
}

/// Handle the outcome of a provisioning reply
///
/// # Business Rules
/// - `attempt` must be a recorded `BankProvisioned` version
/// - A delivered attempt cannot be recorded again
pub fn handle_provisioning_reply(
    state: &LockerBankState,
    command: ProvisioningReplyCommand,
) -> Result<LockerBankEvent, CommandError> {
    if !state.is_initialized() {
        return Err(CommandError::NotInitialized);
    }

    let attempt = match &command {
        ProvisioningReplyCommand::Sent { attempt, .. } => *attempt,
        ProvisioningReplyCommand::Failed { attempt, .. } => *attempt,
    };

    match state.provision_attempt {
        Some(latest) if attempt <= latest => {}
        _ => {
            return Err(CommandError::BusinessRuleViolation(format!(
                "no provisioning attempt at version {}",
                attempt
            )))
        }
    }

    if state.replied_attempts.contains(&attempt) {
        return Err(CommandError::AlreadyRecorded(format!(
            "provisioning reply for attempt {}",
            attempt
        )));
    }

    match command {
        ProvisioningReplyCommand::Sent {
            attempt,
            credential_user,
            timestamp,
        } => {
            state
                .provisioning_status
                .transition(&ProvisioningInput::ReplySent)?;
            Ok(LockerBankEvent::ProvisioningReplySent(ProvisioningReplySent {
                bank_id: state.id,
                attempt,
                credential_user,
                timestamp,
            }))
        }
        ProvisioningReplyCommand::Failed {
            attempt,
            reason,
            timestamp,
        } => {
            state
                .provisioning_status
                .transition(&ProvisioningInput::ReplyFailed)?;
            Ok(LockerBankEvent::ProvisioningReplyFailed(ProvisioningReplyFailed {
                bank_id: state.id,
                attempt,
                reason,
                timestamp,
            }))
        }
    }
}

/// Handle a connectivity edge
///
/// Repeating the current status is rejected so an edge is recorded once.
pub fn handle_connection(
    state: &LockerBankState,
    command: ConnectionCommand,
) -> Result<LockerBankEvent, CommandError> {
    if !state.is_initialized() {
        return Err(CommandError::NotInitialized);
    }

    match command {
        ConnectionCommand::Established { timestamp } => {
            if state.connection_status == ConnectionStatus::Online {
                return Err(CommandError::AlreadyRecorded("bank online".to_string()));
            }
            Ok(LockerBankEvent::ConnectionEstablished(ConnectionEstablished {
                bank_id: state.id,
                timestamp,
            }))
        }
        ConnectionCommand::Lost {
            reason,
            last_heartbeat_at,
            timestamp,
        } => {
            if state.connection_status == ConnectionStatus::Offline {
                return Err(CommandError::AlreadyRecorded("bank offline".to_string()));
            }
            Ok(LockerBankEvent::ConnectionLost(ConnectionLost {
                bank_id: state.id,
                reason,
                last_heartbeat_at,
                timestamp,
            }))
        }
    }
}

/// Handle RecordCommandResponse command
pub fn handle_record_command_response(
    state: &LockerBankState,
    command: RecordCommandResponseCommand,
) -> Result<CommandResponseReceived, CommandError> {
    if !state.is_initialized() {
        return Err(CommandError::NotInitialized);
    }

    Ok(CommandResponseReceived {
        bank_id: state.id,
        transaction_id: command.transaction_id,
        action: command.action,
        result: command.result,
        error_code: command.error_code,
        message: command.message,
        data: command.data,
        source_topic: command.source_topic,
        timestamp: command.timestamp,
    })
}

/// Handle RecordConfigOutcome command
///
/// # Business Rules
/// - A successful apply must report the hash of the applied configuration
pub fn handle_config_outcome(
    state: &LockerBankState,
    command: RecordConfigOutcomeCommand,
) -> Result<LockerBankEvent, CommandError> {
    if !state.is_initialized() {
        return Err(CommandError::NotInitialized);
    }

    match command.result {
        CommandResult::Success => {
            let config_hash = command.config_hash.ok_or_else(|| {
                CommandError::BusinessRuleViolation(
                    "apply_config success without config_hash".to_string(),
                )
            })?;
            Ok(LockerBankEvent::ConfigApplied(ConfigApplied {
                bank_id: state.id,
                transaction_id: command.transaction_id,
                config_hash,
                timestamp: command.timestamp,
            }))
        }
        CommandResult::Error => Ok(LockerBankEvent::ConfigApplyFailed(ConfigApplyFailed {
            bank_id: state.id,
            transaction_id: command.transaction_id,
            error_code: command.error_code,
            message: command.message,
            timestamp: command.timestamp,
        })),
    }
}

// ============================================================================
// CompartmentOpen
// ============================================================================

/// Authorization decision for an open request
///
/// Admins always pass with `admin_override`; everyone else needs an active
/// grant for the compartment.
pub fn authorize(actor: &Actor, has_active_grant: bool) -> Result<AuthorizationType, DenialReason> {
    if actor.is_admin() {
        Ok(AuthorizationType::AdminOverride)
    } else if has_active_grant {
        Ok(AuthorizationType::GrantedAccess)
    } else {
        Err(DenialReason::MissingActiveAccess)
    }
}

/// Handle RequestOpen command
///
/// Returns `OpenRequested` followed by the authorization decision; both are
/// appended together so no request is ever observed undecided.
pub fn handle_request_open(
    state: &CompartmentOpenState,
    command: RequestOpenCommand,
) -> Result<Vec<CompartmentOpenEvent>, CommandError> {
    if state.is_initialized() {
        return Err(CommandError::AlreadyInitialized);
    }

    let requested = CompartmentOpenEvent::OpenRequested(OpenRequested {
        correlation_id: command.correlation_id,
        actor: command.actor,
        compartment: command.compartment,
        timestamp: command.timestamp,
    });

    let decision = match authorize(&command.actor, command.has_active_grant) {
        Ok(authorization) => CompartmentOpenEvent::OpenAuthorized(OpenAuthorized {
            correlation_id: command.correlation_id,
            authorization,
            timestamp: command.timestamp,
        }),
        Err(reason) => CompartmentOpenEvent::OpenDenied(OpenDenied {
            correlation_id: command.correlation_id,
            reason,
            timestamp: command.timestamp,
        }),
    };

    Ok(vec![requested, decision])
}

/// Handle the result of publishing the open command
///
/// # Business Rules
/// - Only an authorized request can be dispatched
/// - `OpeningSent` is recorded once
pub fn handle_dispatch(
    state: &CompartmentOpenState,
    command: DispatchCommand,
) -> Result<CompartmentOpenEvent, CommandError> {
    let (status, compartment) = match (state.status, state.compartment) {
        (Some(status), Some(compartment)) => (status, compartment),
        _ => return Err(CommandError::NotInitialized),
    };

    if matches!(
        status,
        OpenRequestStatus::Sent | OpenRequestStatus::Opened | OpenRequestStatus::Failed
    ) {
        return Err(CommandError::AlreadyRecorded("opening sent".to_string()));
    }

    status.transition(&OpenInput::MarkSent)?;

    Ok(match command {
        DispatchCommand::Sent { timestamp } => {
            CompartmentOpenEvent::OpeningSent(OpeningSent {
                correlation_id: state.correlation_id,
                compartment,
                timestamp,
            })
        }
        DispatchCommand::Failed { reason, timestamp } => {
            CompartmentOpenEvent::OpeningDispatchFailed(OpeningDispatchFailed {
                correlation_id: state.correlation_id,
                reason,
                timestamp,
            })
        }
    })
}

/// Handle the hardware outcome of an open request
///
/// # Business Rules
/// - The response must come from the bank that drives the compartment
/// - An outcome before `OpeningSent` is recorded is premature, not invalid
/// - A terminal request accepts no further outcome
pub fn handle_open_outcome(
    state: &CompartmentOpenState,
    command: RecordOpenOutcomeCommand,
) -> Result<CompartmentOpenEvent, CommandError> {
    let (status, compartment) = match (state.status, state.compartment) {
        (Some(status), Some(compartment)) => (status, compartment),
        _ => return Err(CommandError::NotInitialized),
    };

    if compartment.bank_id != command.responding_bank {
        return Err(CommandError::BankMismatch {
            expected: compartment.bank_id,
            actual: command.responding_bank,
        });
    }

    if status == OpenRequestStatus::Authorized {
        return Err(CommandError::Awaiting("opening sent".to_string()));
    }

    if matches!(status, OpenRequestStatus::Opened | OpenRequestStatus::Failed) {
        return Err(CommandError::AlreadyRecorded(format!("outcome {}", status)));
    }

    let input = match command.result {
        CommandResult::Success => OpenInput::Open,
        CommandResult::Error => OpenInput::Fail,
    };
    status.transition(&input)?;

    Ok(match command.result {
        CommandResult::Success => CompartmentOpenEvent::CompartmentOpened(CompartmentOpened {
            correlation_id: state.correlation_id,
            compartment,
            timestamp: command.timestamp,
        }),
        CommandResult::Error => {
            CompartmentOpenEvent::CompartmentOpeningFailed(CompartmentOpeningFailed {
                correlation_id: state.correlation_id,
                compartment,
                error_code: command.error_code,
                message: command.message,
                timestamp: command.timestamp,
            })
        }
    })
}
