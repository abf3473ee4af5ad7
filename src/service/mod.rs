// Copyright (c) 2025 - Cowboy AI, Inc.
//! Service Layer
//!
//! Application services that turn requests into commands against the
//! aggregates.
//!
//! # Architecture
//!
//! ```text
//! API caller / device message
//!     ↓
//! Service Layer (this module)
//!     ↓
//! Load → Handler (pure) → Append          (repository)
//!     ↓
//! Event Store <──read_after── Worker Pool ──> Reactors, Projectors
//! ```
//!
//! Services only ever report what is known when the decision is recorded:
//! an open request returns its correlation id and accepted/denied at once,
//! and the hardware outcome is read later from the status view.
//!
//! # Services
//!
//! - [`ProvisioningService`] - bank registration and device registration
//! - [`CompartmentOpenService`] - submit open requests, poll their status
//! - [`DeviceGateway`] - routes inbound device traffic

pub mod compartment_open;
pub mod device_gateway;
pub mod provisioning;

pub use compartment_open::{
    CompartmentOpenService, EventSourcedCompartmentOpenService, OpenRequestReceipt,
};
pub use device_gateway::{DeviceGateway, GatewayOutcome};
pub use provisioning::{BankRegistration, EventSourcedProvisioningService, ProvisioningService};
