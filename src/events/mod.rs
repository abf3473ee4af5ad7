// Copyright (c) 2025 - Cowboy AI, Inc.
//! Locker Domain Events
//!
//! Immutable facts for the two aggregates of the engine. Every event is
//! past tense, carries its own timestamp and is serialized with a snake_case
//! `type` tag that doubles as the event type name in the log.
//!
//! # Correlation keys
//!
//! Facts that idempotency guards look up (derived outcomes, dispatch
//! records, response audits) expose a `correlation_key`. The event store
//! indexes `(aggregate_id, event_type, correlation_key)` so a guard can ask
//! whether a fact exists without replaying the stream.
//!
//! # Module Organization
//!
//! - [`locker_bank`] - provisioning and connectivity
//! - [`compartment_open`] - open request lifecycle
//! - [`domain_event`] - polymorphic envelope

pub mod compartment_open;
pub mod domain_event;
pub mod locker_bank;

pub use compartment_open::*;
pub use domain_event::DomainEvent;
pub use locker_bank::*;

/// Event type names as written to the log
pub mod event_types {
    pub const BANK_REGISTERED: &str = "bank_registered";
    pub const BANK_PROVISIONED: &str = "bank_provisioned";
    pub const PROVISIONING_FAILED: &str = "provisioning_failed";
    pub const PROVISIONING_REPLY_SENT: &str = "provisioning_reply_sent";
    pub const PROVISIONING_REPLY_FAILED: &str = "provisioning_reply_failed";
    pub const CONNECTION_ESTABLISHED: &str = "connection_established";
    pub const CONNECTION_LOST: &str = "connection_lost";
    pub const COMMAND_RESPONSE_RECEIVED: &str = "command_response_received";
    pub const CONFIG_APPLIED: &str = "config_applied";
    pub const CONFIG_APPLY_FAILED: &str = "config_apply_failed";

    pub const OPEN_REQUESTED: &str = "open_requested";
    pub const OPEN_AUTHORIZED: &str = "open_authorized";
    pub const OPEN_DENIED: &str = "open_denied";
    pub const OPENING_SENT: &str = "opening_sent";
    pub const OPENING_DISPATCH_FAILED: &str = "opening_dispatch_failed";
    pub const COMPARTMENT_OPENED: &str = "compartment_opened";
    pub const COMPARTMENT_OPENING_FAILED: &str = "compartment_opening_failed";
}
