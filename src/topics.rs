// Copyright (c) 2025 - Cowboy AI, Inc.

//! Device topic hierarchy
//!
//! Devices speak MQTT; the backend sits on NATS with the MQTT gateway
//! enabled. Topics are written in MQTT form throughout the crate and mapped
//! to NATS subjects only at the client boundary.
//!
//! # Topic Pattern
//!
//! ```text
//! device/register/{token}
//! device/provisioning/reply/{client_id}
//! device/{bank_id}/{command|response|state}
//! ```
//!
//! # Examples
//!
//! ```rust
//! use locker_control::topics::{self, DeviceTopic, DeviceChannel};
//! use locker_control::domain::BankId;
//!
//! let bank_id = BankId::new();
//! let topic = topics::command(bank_id);
//! assert_eq!(
//!     DeviceTopic::parse(&topic),
//!     Some(DeviceTopic::Bank { bank_id, channel: DeviceChannel::Command })
//! );
//!
//! assert_eq!(topics::to_nats_subject("device/+/response"), Some("device.*.response".to_string()));
//! ```

use std::fmt;

use crate::domain::BankId;

/// Root namespace for all device topics
pub const DEVICE_ROOT: &str = "device";

/// Per-bank channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceChannel {
    /// Backend → device commands
    Command,
    /// Device → backend command responses
    Response,
    /// Device → backend state (heartbeats)
    State,
}

impl DeviceChannel {
    fn parse(segment: &str) -> Option<Self> {
        match segment {
            "command" => Some(DeviceChannel::Command),
            "response" => Some(DeviceChannel::Response),
            "state" => Some(DeviceChannel::State),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceChannel::Command => write!(f, "command"),
            DeviceChannel::Response => write!(f, "response"),
            DeviceChannel::State => write!(f, "state"),
        }
    }
}

/// A concrete device topic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceTopic {
    Register { token: String },
    ProvisioningReply { client_id: String },
    Bank { bank_id: BankId, channel: DeviceChannel },
}

impl DeviceTopic {
    /// Parse a concrete MQTT topic; wildcards and unknown shapes are `None`
    pub fn parse(topic: &str) -> Option<Self> {
        let segments: Vec<&str> = topic.split('/').collect();
        if segments.iter().any(|s| s.is_empty() || is_wildcard(s)) {
            return None;
        }

        match segments.as_slice() {
            [DEVICE_ROOT, "register", token] => Some(DeviceTopic::Register {
                token: token.to_string(),
            }),
            [DEVICE_ROOT, "provisioning", "reply", client_id] => {
                Some(DeviceTopic::ProvisioningReply {
                    client_id: client_id.to_string(),
                })
            }
            [DEVICE_ROOT, bank, channel] => Some(DeviceTopic::Bank {
                bank_id: bank.parse().ok()?,
                channel: DeviceChannel::parse(channel)?,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceTopic::Register { token } => write!(f, "{}/register/{}", DEVICE_ROOT, token),
            DeviceTopic::ProvisioningReply { client_id } => {
                write!(f, "{}/provisioning/reply/{}", DEVICE_ROOT, client_id)
            }
            DeviceTopic::Bank { bank_id, channel } => {
                write!(f, "{}/{}/{}", DEVICE_ROOT, bank_id, channel)
            }
        }
    }
}

fn is_wildcard(segment: &str) -> bool {
    segment == "+" || segment == "#"
}

pub fn register(token: &str) -> String {
    DeviceTopic::Register {
        token: token.to_string(),
    }
    .to_string()
}

pub fn provisioning_reply(client_id: &str) -> String {
    DeviceTopic::ProvisioningReply {
        client_id: client_id.to_string(),
    }
    .to_string()
}

pub fn command(bank_id: BankId) -> String {
    DeviceTopic::Bank {
        bank_id,
        channel: DeviceChannel::Command,
    }
    .to_string()
}

pub fn response(bank_id: BankId) -> String {
    DeviceTopic::Bank {
        bank_id,
        channel: DeviceChannel::Response,
    }
    .to_string()
}

pub fn state(bank_id: BankId) -> String {
    DeviceTopic::Bank {
        bank_id,
        channel: DeviceChannel::State,
    }
    .to_string()
}

/// Subscription filters for the inbound device traffic
pub mod filters {
    pub const REGISTRATIONS: &str = "device/register/+";
    pub const RESPONSES: &str = "device/+/response";
    pub const STATES: &str = "device/+/state";
}

/// Map an MQTT topic or filter to the NATS subject the gateway uses
///
/// `/` → `.`, `+` → `*`, `#` → `>`. Segments that already carry NATS
/// metacharacters cannot be mapped and yield `None`.
pub fn to_nats_subject(topic: &str) -> Option<String> {
    topic
        .split('/')
        .map(|segment| match segment {
            "+" => Some("*"),
            "#" => Some(">"),
            "" => None,
            s if s.contains(|c: char| matches!(c, '.' | '*' | '>') || c.is_whitespace()) => None,
            s => Some(s),
        })
        .collect::<Option<Vec<_>>>()
        .map(|segments| segments.join("."))
}

/// Map a NATS subject back to its MQTT topic
pub fn from_nats_subject(subject: &str) -> String {
    subject
        .split('.')
        .map(|token| match token {
            "*" => "+",
            ">" => "#",
            t => t,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let bank_id = BankId::new();
        assert_eq!(register("abc"), "device/register/abc");
        assert_eq!(provisioning_reply("c-1"), "device/provisioning/reply/c-1");
        assert_eq!(command(bank_id), format!("device/{}/command", bank_id));
        assert_eq!(response(bank_id), format!("device/{}/response", bank_id));
        assert_eq!(state(bank_id), format!("device/{}/state", bank_id));
    }

    #[test]
    fn test_parse() {
        let bank_id = BankId::new();
        assert_eq!(
            DeviceTopic::parse(&state(bank_id)),
            Some(DeviceTopic::Bank {
                bank_id,
                channel: DeviceChannel::State
            })
        );
        assert_eq!(
            DeviceTopic::parse("device/register/tok"),
            Some(DeviceTopic::Register {
                token: "tok".into()
            })
        );
        assert_eq!(
            DeviceTopic::parse("device/provisioning/reply/c-1"),
            Some(DeviceTopic::ProvisioningReply {
                client_id: "c-1".into()
            })
        );
    }

    #[test]
    fn test_parse_rejects_wildcards_and_junk() {
        assert_eq!(DeviceTopic::parse("device/register/+"), None);
        assert_eq!(DeviceTopic::parse("device/register/"), None);
        assert_eq!(DeviceTopic::parse("device/not-a-uuid/state"), None);
        assert_eq!(DeviceTopic::parse(&format!("device/{}/other", BankId::new())), None);
        assert_eq!(DeviceTopic::parse("other/register/x"), None);
    }

    #[test]
    fn test_nats_mapping() {
        assert_eq!(
            to_nats_subject(filters::REGISTRATIONS).as_deref(),
            Some("device.register.*")
        );
        assert_eq!(to_nats_subject("device/#").as_deref(), Some("device.>"));
        assert_eq!(to_nats_subject("device/a.b/state"), None);
        assert_eq!(to_nats_subject("device//state"), None);

        assert_eq!(from_nats_subject("device.*.response"), "device/+/response");
        assert_eq!(from_nats_subject("device.register.abc"), "device/register/abc");
    }
}
