// Copyright (c) 2025 - Cowboy AI, Inc.
//! Locker Domain Models
//!
//! Value objects shared by the aggregates, the read models and the wire layer.
//!
//! # Value Objects with Invariants
//!
//! - [`BankId`], [`CompartmentId`], [`CorrelationId`], [`UserId`] - typed UUIDs
//! - [`ProvisioningToken`] - registration token, safe to embed in a topic
//! - [`Compartment`] - compartment id plus its bank and hardware number
//! - [`Actor`] - requesting user and role
//! - [`AccessGrant`] - time-bounded, revocable permission to open
//! - [`ConnectionStatus`] - heartbeat-derived liveness of a bank

pub mod actor;
pub mod compartment;
pub mod connection;
pub mod ids;
pub mod token;

pub use actor::{AccessGrant, Actor, ActorRole};
pub use compartment::Compartment;
pub use connection::ConnectionStatus;
pub use ids::{BankId, CompartmentId, CorrelationId, UserId};
pub use token::{ProvisioningToken, TokenError};
