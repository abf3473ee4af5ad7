// Copyright (c) 2025 - Cowboy AI, Inc.
//! Compartment Open Domain Events
//!
//! One open request lifecycle per correlation id; the correlation id is the
//! aggregate id.
//!
//! ```text
//! OpenRequested ─┬─> OpenAuthorized ──> OpeningSent ─┬─> CompartmentOpened
//!                │                                   └─> CompartmentOpeningFailed
//!                └─> OpenDenied
//! ```
//!
//! `OpeningDispatchFailed` is an audit record and does not move the lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Actor, BankId, Compartment, CompartmentId, CorrelationId};

/// How an open request was authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationType {
    AdminOverride,
    GrantedAccess,
}

/// Why an open request was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    MissingActiveAccess,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::MissingActiveAccess => "missing_active_access",
        }
    }
}

/// Compartment Open Domain Events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompartmentOpenEvent {
    OpenRequested(OpenRequested),
    OpenAuthorized(OpenAuthorized),
    OpenDenied(OpenDenied),
    OpeningSent(OpeningSent),
    OpeningDispatchFailed(OpeningDispatchFailed),
    CompartmentOpened(CompartmentOpened),
    CompartmentOpeningFailed(CompartmentOpeningFailed),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequested {
    pub correlation_id: CorrelationId,
    pub actor: Actor,
    pub compartment: Compartment,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAuthorized {
    pub correlation_id: CorrelationId,
    pub authorization: AuthorizationType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDenied {
    pub correlation_id: CorrelationId,
    pub reason: DenialReason,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningSent {
    pub correlation_id: CorrelationId,
    pub compartment: Compartment,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningDispatchFailed {
    pub correlation_id: CorrelationId,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompartmentOpened {
    pub correlation_id: CorrelationId,
    pub compartment: Compartment,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompartmentOpeningFailed {
    pub correlation_id: CorrelationId,
    pub compartment: Compartment,
    pub error_code: Option<String>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CompartmentOpenEvent {
    pub fn correlation_id(&self) -> CorrelationId {
        use CompartmentOpenEvent::*;

        match self {
            OpenRequested(e) => e.correlation_id,
            OpenAuthorized(e) => e.correlation_id,
            OpenDenied(e) => e.correlation_id,
            OpeningSent(e) => e.correlation_id,
            OpeningDispatchFailed(e) => e.correlation_id,
            CompartmentOpened(e) => e.correlation_id,
            CompartmentOpeningFailed(e) => e.correlation_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        use CompartmentOpenEvent::*;

        match self {
            OpenRequested(e) => e.timestamp,
            OpenAuthorized(e) => e.timestamp,
            OpenDenied(e) => e.timestamp,
            OpeningSent(e) => e.timestamp,
            OpeningDispatchFailed(e) => e.timestamp,
            CompartmentOpened(e) => e.timestamp,
            CompartmentOpeningFailed(e) => e.timestamp,
        }
    }

    /// Compartment the event concerns, when the event carries it
    pub fn compartment(&self) -> Option<Compartment> {
        use CompartmentOpenEvent::*;

        match self {
            OpenRequested(e) => Some(e.compartment),
            OpeningSent(e) => Some(e.compartment),
            CompartmentOpened(e) => Some(e.compartment),
            CompartmentOpeningFailed(e) => Some(e.compartment),
            _ => None,
        }
    }

    pub fn compartment_id(&self) -> Option<CompartmentId> {
        self.compartment().map(|c| c.id)
    }

    pub fn bank_id(&self) -> Option<BankId> {
        self.compartment().map(|c| c.bank_id)
    }

    pub fn event_type_name(&self) -> &'static str {
        use super::event_types::*;
        use CompartmentOpenEvent::*;

        match self {
            OpenRequested(_) => OPEN_REQUESTED,
            OpenAuthorized(_) => OPEN_AUTHORIZED,
            OpenDenied(_) => OPEN_DENIED,
            OpeningSent(_) => OPENING_SENT,
            OpeningDispatchFailed(_) => OPENING_DISPATCH_FAILED,
            CompartmentOpened(_) => COMPARTMENT_OPENED,
            CompartmentOpeningFailed(_) => COMPARTMENT_OPENING_FAILED,
        }
    }

    /// Derived and dispatch facts are keyed by correlation id so guards can
    /// ask "was this already recorded?" without folding the stream.
    pub fn correlation_key(&self) -> Option<String> {
        use CompartmentOpenEvent::*;

        match self {
            OpeningSent(e) => Some(e.correlation_id.to_string()),
            CompartmentOpened(e) => Some(e.correlation_id.to_string()),
            CompartmentOpeningFailed(e) => Some(e.correlation_id.to_string()),
            _ => None,
        }
    }
}
