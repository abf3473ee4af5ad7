// Copyright (c) 2025 - Cowboy AI, Inc.
//! Command and authorization engine for networked locker banks
//!
//! Locker banks reach the backend over an MQTT gateway on NATS. This crate
//! provisions them, authorizes and dispatches compartment opens, correlates
//! the device responses, tracks liveness, and answers the broker's topic
//! authorization hooks. Every fact is an event in an append-only log; read
//! models and side effects are derived from it.
//!
//! # Layers
//!
//! - [`service`] - request entry points and inbound device routing
//! - [`aggregate`] / [`state_machine`] - pure decisions over folded state
//! - [`event_store`] / [`repository`] - the log and the load → decide → append loop
//! - [`reactor`] / [`read_model`] / [`monitor`] - everything derived from the log
//! - [`acl`] - topic authorization for the broker

pub mod access;
pub mod acl;
pub mod aggregate;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod errors;
pub mod event_store;
pub mod events;
pub mod inbox;
pub mod jetstream;
pub mod monitor;
pub mod nats;
pub mod reactor;
pub mod read_model;
pub mod repository;
pub mod retry;
pub mod service;
pub mod state_machine;
pub mod topics;
pub mod wire;

// Re-export commonly used types
pub use config::LockerConfig;
pub use errors::{LockerError, LockerResult};
pub use event_store::{EventStore, InMemoryEventStore, NatsEventStore, StoredEvent};
pub use nats::{MessageHandler, NatsClient, Transport};
