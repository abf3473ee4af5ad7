// Copyright (c) 2025 - Cowboy AI, Inc.
//! Domain Event Envelope
//!
//! Polymorphic envelope over every aggregate's events so the log, the worker
//! pool and the projectors can handle any fact while keeping each variant
//! strongly typed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::compartment_open::CompartmentOpenEvent;
use super::locker_bank::LockerBankEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "aggregate_type", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Events from the LockerBank (provisioning / connectivity) aggregate
    LockerBank(LockerBankEvent),

    /// Events from the CompartmentOpen request aggregate
    CompartmentOpen(CompartmentOpenEvent),
}

impl DomainEvent {
    /// Aggregate identity the event belongs to
    pub fn aggregate_id(&self) -> Uuid {
        match self {
            DomainEvent::LockerBank(event) => event.bank_id().as_uuid(),
            DomainEvent::CompartmentOpen(event) => event.correlation_id().as_uuid(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::LockerBank(event) => event.timestamp(),
            DomainEvent::CompartmentOpen(event) => event.timestamp(),
        }
    }

    pub fn event_type_name(&self) -> &'static str {
        match self {
            DomainEvent::LockerBank(event) => event.event_type_name(),
            DomainEvent::CompartmentOpen(event) => event.event_type_name(),
        }
    }

    pub fn correlation_key(&self) -> Option<String> {
        match self {
            DomainEvent::LockerBank(event) => event.correlation_key(),
            DomainEvent::CompartmentOpen(event) => event.correlation_key(),
        }
    }

    pub fn as_locker_bank(&self) -> Option<&LockerBankEvent> {
        match self {
            DomainEvent::LockerBank(event) => Some(event),
            _ => None,
        }
    }

    pub fn as_compartment_open(&self) -> Option<&CompartmentOpenEvent> {
        match self {
            DomainEvent::CompartmentOpen(event) => Some(event),
            _ => None,
        }
    }
}

impl From<LockerBankEvent> for DomainEvent {
    fn from(event: LockerBankEvent) -> Self {
        DomainEvent::LockerBank(event)
    }
}

impl From<CompartmentOpenEvent> for DomainEvent {
    fn from(event: CompartmentOpenEvent) -> Self {
        DomainEvent::CompartmentOpen(event)
    }
}
