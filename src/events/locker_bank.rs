// Copyright (c) 2025 - Cowboy AI, Inc.
//! Locker Bank Domain Events
//!
//! Provisioning, connectivity and device-response facts for one bank. The
//! bank id is the aggregate id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{BankId, ProvisioningToken};
use crate::wire::CommandResult;

/// Locker Bank Domain Events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LockerBankEvent {
    /// Bank was created with its registration token and heartbeat settings
    BankRegistered(BankRegistered),

    /// Registration accepted; credentials are to be issued to `reply_target`
    BankProvisioned(BankProvisioned),

    /// Registration rejected (already provisioned)
    ProvisioningFailed(ProvisioningFailed),

    /// Credentials were issued and published for a provisioning attempt
    ProvisioningReplySent(ProvisioningReplySent),

    /// Credential issuance or reply publish failed for a provisioning attempt
    ProvisioningReplyFailed(ProvisioningReplyFailed),

    /// Bank came online after being unknown or offline
    ConnectionEstablished(ConnectionEstablished),

    /// Bank missed its heartbeat deadline
    ConnectionLost(ConnectionLost),

    /// First delivery of a device command response
    CommandResponseReceived(CommandResponseReceived),

    /// Device confirmed a configuration push
    ConfigApplied(ConfigApplied),

    /// Device rejected a configuration push
    ConfigApplyFailed(ConfigApplyFailed),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankRegistered {
    pub bank_id: BankId,
    pub provisioning_token: ProvisioningToken,
    pub heartbeat_interval_seconds: u32,
    /// `None` disables offline detection for this bank
    pub heartbeat_timeout_seconds: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankProvisioned {
    pub bank_id: BankId,
    /// Transport client id the device registered with
    pub client_id: String,
    /// Topic the credentials are published to
    pub reply_target: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningFailed {
    pub bank_id: BankId,
    pub client_id: String,
    pub reply_target: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningReplySent {
    pub bank_id: BankId,
    /// Aggregate version of the `BankProvisioned` event this reply answers
    pub attempt: u64,
    pub credential_user: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningReplyFailed {
    pub bank_id: BankId,
    pub attempt: u64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEstablished {
    pub bank_id: BankId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionLost {
    pub bank_id: BankId,
    pub reason: String,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponseReceived {
    pub bank_id: BankId,
    pub transaction_id: String,
    pub action: String,
    pub result: CommandResult,
    pub error_code: Option<String>,
    pub message: Option<String>,
    pub data: Option<serde_json::Value>,
    pub source_topic: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigApplied {
    pub bank_id: BankId,
    pub transaction_id: String,
    pub config_hash: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigApplyFailed {
    pub bank_id: BankId,
    pub transaction_id: String,
    pub error_code: Option<String>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LockerBankEvent {
    pub fn bank_id(&self) -> BankId {
        use LockerBankEvent::*;

        match self {
            BankRegistered(e) => e.bank_id,
            BankProvisioned(e) => e.bank_id,
            ProvisioningFailed(e) => e.bank_id,
            ProvisioningReplySent(e) => e.bank_id,
            ProvisioningReplyFailed(e) => e.bank_id,
            ConnectionEstablished(e) => e.bank_id,
            ConnectionLost(e) => e.bank_id,
            CommandResponseReceived(e) => e.bank_id,
            ConfigApplied(e) => e.bank_id,
            ConfigApplyFailed(e) => e.bank_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        use LockerBankEvent::*;

        match self {
            BankRegistered(e) => e.timestamp,
            BankProvisioned(e) => e.timestamp,
            ProvisioningFailed(e) => e.timestamp,
            ProvisioningReplySent(e) => e.timestamp,
            ProvisioningReplyFailed(e) => e.timestamp,
            ConnectionEstablished(e) => e.timestamp,
            ConnectionLost(e) => e.timestamp,
            CommandResponseReceived(e) => e.timestamp,
            ConfigApplied(e) => e.timestamp,
            ConfigApplyFailed(e) => e.timestamp,
        }
    }

    /// Event type name as written to the log
    pub fn event_type_name(&self) -> &'static str {
        use super::event_types::*;
        use LockerBankEvent::*;

        match self {
            BankRegistered(_) => BANK_REGISTERED,
            BankProvisioned(_) => BANK_PROVISIONED,
            ProvisioningFailed(_) => PROVISIONING_FAILED,
            ProvisioningReplySent(_) => PROVISIONING_REPLY_SENT,
            ProvisioningReplyFailed(_) => PROVISIONING_REPLY_FAILED,
            ConnectionEstablished(_) => CONNECTION_ESTABLISHED,
            ConnectionLost(_) => CONNECTION_LOST,
            CommandResponseReceived(_) => COMMAND_RESPONSE_RECEIVED,
            ConfigApplied(_) => CONFIG_APPLIED,
            ConfigApplyFailed(_) => CONFIG_APPLY_FAILED,
        }
    }

    /// Key used by idempotency guards to find this fact without a replay
    pub fn correlation_key(&self) -> Option<String> {
        use LockerBankEvent::*;

        match self {
            ProvisioningReplySent(e) => Some(e.attempt.to_string()),
            CommandResponseReceived(e) => Some(e.transaction_id.clone()),
            ConfigApplied(e) => Some(e.transaction_id.clone()),
            ConfigApplyFailed(e) => Some(e.transaction_id.clone()),
            _ => None,
        }
    }
}
