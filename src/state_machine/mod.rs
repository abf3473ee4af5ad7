// Copyright (c) 2025 - Cowboy AI, Inc.
//! Finite State Machine Abstractions
//!
//! Lifecycles of the two aggregates are modeled as explicit transition
//! tables. Transitions are pure functions: the aggregate folds consult them
//! when applying events and the command handlers consult them before
//! emitting one.
//!
//! # State Machine Type
//!
//! Both machines are Mealy machines with a unit output:
//! ```text
//! (State, Input) → State
//! ```
//!
//! # Machines
//!
//! - [`provisioning::ProvisioningStatus`] - bank provisioning
//! - [`open_request::OpenRequestStatus`] - compartment open request
//!
//! # Example
//!
//! ```rust
//! use locker_control::state_machine::StateMachine;
//! use locker_control::state_machine::open_request::{OpenInput, OpenRequestStatus};
//!
//! let (next, _) = OpenRequestStatus::Requested
//!     .transition(&OpenInput::Authorize)
//!     .unwrap();
//! assert_eq!(next, OpenRequestStatus::Authorized);
//! assert!(!next.can_transition(&OpenInput::Open));
//! ```

pub mod open_request;
pub mod provisioning;

/// Result of a state transition
pub type TransitionResult<S> = Result<S, TransitionError>;

/// Errors that can occur during state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Transition from current state to target state is not allowed
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Current state is terminal
    #[error("State {0} is terminal")]
    Terminal(String),
}

/// Trait for finite state machines
///
/// Implement this trait to define a state machine with typed states,
/// inputs, and outputs.
pub trait StateMachine: Sized + Clone {
    /// Input type that triggers transitions
    type Input;

    /// Output type produced by transitions (use () if none)
    type Output;

    /// Attempt to transition to a new state given an input
    ///
    /// # Returns
    /// - Ok((new_state, output)) if transition is valid
    /// - Err(TransitionError) if transition is invalid
    fn transition(&self, input: &Self::Input) -> TransitionResult<(Self, Self::Output)>;

    /// Check if a transition is valid without performing it
    fn can_transition(&self, input: &Self::Input) -> bool {
        self.transition(input).is_ok()
    }

    /// Get all valid inputs from current state (if enumerable)
    fn valid_inputs(&self) -> Vec<Self::Input>
    where
        Self::Input: Clone,
    {
        Vec::new()
    }
}
