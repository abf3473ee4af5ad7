// Copyright (c) 2025 - Cowboy AI, Inc.
//! Pure Functional Aggregates
//!
//! - Aggregates are pure functions: State → Command → Result<Event, Error>
//! - State reconstruction via event folding: [Event] → State
//! - No mutations, no side effects, no clock
//!
//! # Event Sourcing Pattern
//!
//! ```text
//! Command → Aggregate → Events → Event Store
//!    ↓          ↓          ↓
//! Intent   Validation  Facts
//! ```
//!
//! # Aggregates
//!
//! | Aggregate | Identity | Lifecycle |
//! |---|---|---|
//! | [`LockerBankState`] | bank id | provisioning, connectivity, response audit |
//! | [`CompartmentOpenState`] | correlation id | one open request |
//!
//! # Fold Pattern
//!
//! ```rust,ignore
//! let state = events.iter().fold(LockerBankState::empty(bank_id), apply_event);
//! ```
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use locker_control::aggregate::*;
//!
//! let history = event_store.load(correlation_id.as_uuid()).await?;
//! let state = CompartmentOpenState::from_events(
//!     correlation_id,
//!     history.iter().filter_map(|e| e.payload.as_compartment_open()),
//! );
//!
//! match handle_open_outcome(&state, command) {
//!     Ok(event) => {
//!         event_store.append(correlation_id.as_uuid(), state.version, vec![event.into()]).await?;
//!     }
//!     Err(err) => {
//!         // Rejected: already recorded, premature, or invalid
//!     }
//! }
//! ```

pub mod commands;
pub mod compartment_open;
pub mod handlers;
pub mod locker_bank;

pub use commands::*;
pub use compartment_open::CompartmentOpenState;
pub use handlers::*;
pub use locker_bank::LockerBankState;
