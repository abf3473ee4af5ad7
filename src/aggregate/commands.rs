// Copyright (c) 2025 - Cowboy AI, Inc.
//! Commands for the LockerBank and CompartmentOpen Aggregates
//!
//! Commands express intent and can be rejected; events are the facts that
//! result. Every command carries an explicit `timestamp`: handlers never
//! read the clock.
//!
//! ```text
//! Command → handle_command(State, Command) → Result<Event, CommandError>
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::{Actor, BankId, Compartment, CorrelationId, ProvisioningToken};
use crate::wire::CommandResult;

/// Create a bank with its registration token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBankCommand {
    pub bank_id: BankId,
    pub provisioning_token: ProvisioningToken,
    pub heartbeat_interval_seconds: u32,
    /// `None` disables offline detection
    pub heartbeat_timeout_seconds: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

/// Accept a registration attempt from `client_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionBankCommand {
    pub client_id: String,
    /// Topic the provisioning reply goes to
    pub reply_target: String,
    pub timestamp: DateTime<Utc>,
}

/// Record the outcome of delivering credentials for a provisioning attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningReplyCommand {
    Sent {
        attempt: u64,
        credential_user: String,
        timestamp: DateTime<Utc>,
    },
    Failed {
        attempt: u64,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// Record a connectivity edge observed by the monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionCommand {
    Established {
        timestamp: DateTime<Utc>,
    },
    Lost {
        reason: String,
        last_heartbeat_at: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },
}

/// Audit the first delivery of a device command response
#[derive(Debug, Clone, PartialEq)]
pub struct RecordCommandResponseCommand {
    pub transaction_id: String,
    pub action: String,
    pub result: CommandResult,
    pub error_code: Option<String>,
    pub message: Option<String>,
    pub data: Option<Value>,
    pub source_topic: String,
    pub timestamp: DateTime<Utc>,
}

/// Derive the configuration outcome of an `apply_config` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordConfigOutcomeCommand {
    pub transaction_id: String,
    pub result: CommandResult,
    pub config_hash: Option<String>,
    pub error_code: Option<String>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Start an open request lifecycle
///
/// The grant lookup happens before the handler runs; the handler only sees
/// its answer, which keeps the authorization decision pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOpenCommand {
    pub correlation_id: CorrelationId,
    pub actor: Actor,
    pub compartment: Compartment,
    pub has_active_grant: bool,
    pub timestamp: DateTime<Utc>,
}

/// Record the result of publishing the open command to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchCommand {
    Sent { timestamp: DateTime<Utc> },
    Failed { reason: String, timestamp: DateTime<Utc> },
}

/// Record the hardware outcome reported by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOpenOutcomeCommand {
    /// Bank the response came from
    pub responding_bank: BankId,
    pub result: CommandResult,
    pub error_code: Option<String>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}
