// Copyright (c) 2025 - Cowboy AI, Inc.

//! Typed transport payloads
//!
//! Every message crossing the device boundary is parsed into a concrete type
//! before anything else sees it. Parse failures are [`WireError`]s; the
//! gateway logs them and drops the message, so malformed traffic never
//! reaches the event log.
//!
//! | Topic | Direction | Type |
//! |---|---|---|
//! | `device/register/{token}` | device → backend | [`RegistrationRequest`] |
//! | `device/provisioning/reply/{client_id}` | backend → device | [`ProvisioningReply`] |
//! | `device/{bank}/command` | backend → device | [`DeviceCommand`] |
//! | `device/{bank}/response` | device → backend | [`CommandResponse`] |
//! | `device/{bank}/state` | device → backend | [`StateMessage`] |

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::errors::LockerError;

/// Wire parse errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Missing or empty field: {0}")]
    MissingField(&'static str),

    #[error("Unexpected message type: {0}")]
    UnexpectedType(String),

    #[error("Unsupported state event: {0}")]
    UnsupportedEvent(String),
}

impl From<WireError> for LockerError {
    fn from(err: WireError) -> Self {
        LockerError::Validation(err.to_string())
    }
}

/// Outcome reported by the device for a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandResult {
    Success,
    Error,
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResult::Success => write!(f, "success"),
            CommandResult::Error => write!(f, "error"),
        }
    }
}

/// Command actions understood by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommandAction {
    OpenCompartment,
    ApplyConfig,
    /// Any action this backend has no derivation for
    Other(String),
}

impl CommandAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "open_compartment" => CommandAction::OpenCompartment,
            "apply_config" => CommandAction::ApplyConfig,
            other => CommandAction::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CommandAction::OpenCompartment => "open_compartment",
            CommandAction::ApplyConfig => "apply_config",
            CommandAction::Other(other) => other,
        }
    }
}

/// Devices report time either as unix seconds or as RFC 3339 text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceTimestamp {
    Unix(i64),
    Rfc3339(DateTime<Utc>),
}

impl DeviceTimestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            DeviceTimestamp::Unix(secs) => Utc.timestamp_opt(*secs, 0).single(),
            DeviceTimestamp::Rfc3339(at) => Some(*at),
        }
    }
}

/// `device/register/{token}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub client_id: String,
}

/// Transport credentials issued to a provisioned bank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub credential_user: String,
    pub credential_password: String,
}

/// `device/provisioning/reply/{client_id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProvisioningReply {
    Success { data: Credentials },
    Error { message: String },
}

/// `device/{bank}/command`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub action: String,
    pub transaction_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

/// `device/{bank}/response`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    pub result: CommandResult,
    pub transaction_id: String,
    #[serde(default)]
    pub timestamp: Option<DeviceTimestamp>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl CommandResponse {
    pub const KIND: &'static str = "command_response";

    pub fn action(&self) -> CommandAction {
        CommandAction::parse(&self.action)
    }

    /// String field from `data`, if present and non-empty
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|data| data.get(field))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatData {
    #[serde(default)]
    pub timestamp: Option<DeviceTimestamp>,
}

/// `device/{bank}/state`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateMessage {
    Heartbeat(HeartbeatData),
}

#[derive(Deserialize)]
struct RawStateMessage {
    event: String,
    #[serde(default)]
    data: Option<Value>,
}

fn decode<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<T, WireError> {
    serde_json::from_slice(payload).map_err(|e| WireError::Malformed(e.to_string()))
}

pub fn parse_registration(payload: &[u8]) -> Result<RegistrationRequest, WireError> {
    let request: RegistrationRequest = decode(payload)?;
    if request.client_id.trim().is_empty() {
        return Err(WireError::MissingField("client_id"));
    }
    Ok(request)
}

pub fn parse_command_response(payload: &[u8]) -> Result<CommandResponse, WireError> {
    let response: CommandResponse = decode(payload)?;
    if response.kind != CommandResponse::KIND {
        return Err(WireError::UnexpectedType(response.kind));
    }
    if response.transaction_id.trim().is_empty() {
        return Err(WireError::MissingField("transaction_id"));
    }
    if response.action.trim().is_empty() {
        return Err(WireError::MissingField("action"));
    }
    Ok(response)
}

pub fn parse_state_message(payload: &[u8]) -> Result<StateMessage, WireError> {
    let raw: RawStateMessage = decode(payload)?;
    match raw.event.as_str() {
        "heartbeat" => {
            let data = match raw.data {
                Some(value) => serde_json::from_value(value)
                    .map_err(|e| WireError::Malformed(e.to_string()))?,
                None => HeartbeatData { timestamp: None },
            };
            Ok(StateMessage::Heartbeat(data))
        }
        other => Err(WireError::UnsupportedEvent(other.to_string())),
    }
}

pub fn parse_provisioning_reply(payload: &[u8]) -> Result<ProvisioningReply, WireError> {
    decode(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_registration() {
        let request = parse_registration(br#"{"client_id":"bank-7"}"#).unwrap();
        assert_eq!(request.client_id, "bank-7");

        assert_eq!(
            parse_registration(br#"{"client_id":"  "}"#),
            Err(WireError::MissingField("client_id"))
        );
        assert!(matches!(
            parse_registration(b"not json"),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_command_response_success() {
        let payload = json!({
            "type": "command_response",
            "action": "open_compartment",
            "result": "success",
            "transaction_id": "T-1",
            "timestamp": 1768824000
        });
        let response = parse_command_response(payload.to_string().as_bytes()).unwrap();
        assert_eq!(response.action(), CommandAction::OpenCompartment);
        assert_eq!(response.result, CommandResult::Success);
        assert_eq!(response.error_code, None);
        assert!(response
            .timestamp
            .and_then(|t| t.to_datetime())
            .is_some());
    }

    #[test]
    fn test_parse_command_response_rejects_other_types() {
        let payload = json!({
            "type": "event",
            "action": "open_compartment",
            "result": "success",
            "transaction_id": "T-1"
        });
        assert_eq!(
            parse_command_response(payload.to_string().as_bytes()),
            Err(WireError::UnexpectedType("event".into()))
        );
    }

    #[test]
    fn test_parse_command_response_requires_transaction_id() {
        let payload = json!({
            "type": "command_response",
            "action": "open_compartment",
            "result": "error",
            "transaction_id": ""
        });
        assert_eq!(
            parse_command_response(payload.to_string().as_bytes()),
            Err(WireError::MissingField("transaction_id"))
        );
    }

    #[test]
    fn test_unknown_result_is_malformed() {
        let payload = json!({
            "type": "command_response",
            "action": "open_compartment",
            "result": "maybe",
            "transaction_id": "T-1"
        });
        assert!(matches!(
            parse_command_response(payload.to_string().as_bytes()),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn test_data_str() {
        let payload = json!({
            "type": "command_response",
            "action": "apply_config",
            "result": "success",
            "transaction_id": "T-9",
            "data": {"config_hash": "abc", "empty": ""}
        });
        let response = parse_command_response(payload.to_string().as_bytes()).unwrap();
        assert_eq!(response.data_str("config_hash"), Some("abc"));
        assert_eq!(response.data_str("empty"), None);
        assert_eq!(response.data_str("missing"), None);
    }

    #[test]
    fn test_parse_heartbeat() {
        let message =
            parse_state_message(br#"{"event":"heartbeat","data":{"timestamp":"2026-01-19T12:00:00Z"}}"#)
                .unwrap();
        let StateMessage::Heartbeat(data) = message;
        assert!(data.timestamp.is_some());

        assert_eq!(
            parse_state_message(br#"{"event":"door_ajar"}"#),
            Err(WireError::UnsupportedEvent("door_ajar".into()))
        );
    }

    #[test]
    fn test_provisioning_reply_shape() {
        let reply = ProvisioningReply::Success {
            data: Credentials {
                credential_user: "u".into(),
                credential_password: "p".into(),
            },
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            value,
            json!({"status": "success", "data": {"credential_user": "u", "credential_password": "p"}})
        );

        let error = ProvisioningReply::Error {
            message: "already provisioned".into(),
        };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"status": "error", "message": "already provisioned"})
        );
    }
}
