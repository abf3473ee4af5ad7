// Copyright (c) 2025 - Cowboy AI, Inc.
//! CompartmentOpen Aggregate
//!
//! One open request lifecycle, keyed by its correlation id. The fold keeps
//! the visited states so the history can be checked against the machine.

use chrono::{DateTime, Utc};

use crate::domain::{Actor, Compartment, CorrelationId};
use crate::events::{AuthorizationType, CompartmentOpenEvent, DenialReason};
use crate::state_machine::open_request::{OpenInput, OpenRequestStatus};
use crate::state_machine::StateMachine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompartmentOpenState {
    pub correlation_id: CorrelationId,

    /// `None` until `OpenRequested` is folded
    pub status: Option<OpenRequestStatus>,

    pub actor: Option<Actor>,

    pub compartment: Option<Compartment>,

    pub authorization: Option<AuthorizationType>,

    pub denial_reason: Option<DenialReason>,

    pub error_code: Option<String>,

    pub message: Option<String>,

    /// Failed publish attempts recorded before `OpeningSent`
    pub dispatch_failures: u32,

    pub requested_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// States visited, in order
    pub history: Vec<OpenRequestStatus>,

    /// Number of events folded
    pub version: u64,
}

impl CompartmentOpenState {
    /// Initial state for folding
    pub fn empty(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            status: None,
            actor: None,
            compartment: None,
            authorization: None,
            denial_reason: None,
            error_code: None,
            message: None,
            dispatch_failures: 0,
            requested_at: None,
            decided_at: None,
            sent_at: None,
            completed_at: None,
            history: Vec::new(),
            version: 0,
        }
    }

    /// Reconstruct state from the request's events in version order
    pub fn from_events<'a>(
        correlation_id: CorrelationId,
        events: impl IntoIterator<Item = &'a CompartmentOpenEvent>,
    ) -> Self {
        events.into_iter().fold(Self::empty(correlation_id), apply_event)
    }

    pub fn is_initialized(&self) -> bool {
        self.status.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.map_or(false, |s| s.is_terminal())
    }
}

/// Advance `status` with `input`, recording the new state in `history`.
/// Inputs the table rejects leave both untouched.
fn advance(
    status: Option<OpenRequestStatus>,
    history: &[OpenRequestStatus],
    input: OpenInput,
) -> (Option<OpenRequestStatus>, Vec<OpenRequestStatus>) {
    let mut history = history.to_vec();
    match status.map(|s| s.transition(&input)) {
        Some(Ok((next, _))) => {
            history.push(next);
            (Some(next), history)
        }
        _ => (status, history),
    }
}

/// Apply event to state (pure function)
pub fn apply_event(state: CompartmentOpenState, event: &CompartmentOpenEvent) -> CompartmentOpenState {
    use CompartmentOpenEvent::*;

    let version = state.version + 1;

    match event {
        OpenRequested(e) => CompartmentOpenState {
            correlation_id: e.correlation_id,
            status: Some(OpenRequestStatus::Requested),
            actor: Some(e.actor),
            compartment: Some(e.compartment),
            requested_at: Some(e.timestamp),
            history: vec![OpenRequestStatus::Requested],
            version,
            ..state
        },

        OpenAuthorized(e) => {
            let (status, history) = advance(state.status, &state.history, OpenInput::Authorize);
            CompartmentOpenState {
                status,
                history,
                authorization: Some(e.authorization),
                decided_at: Some(e.timestamp),
                version,
                ..state
            }
        }

        OpenDenied(e) => {
            let (status, history) = advance(state.status, &state.history, OpenInput::Deny);
            CompartmentOpenState {
                status,
                history,
                denial_reason: Some(e.reason),
                decided_at: Some(e.timestamp),
                completed_at: Some(e.timestamp),
                version,
                ..state
            }
        }

        OpeningSent(e) => {
            let (status, history) = advance(state.status, &state.history, OpenInput::MarkSent);
            CompartmentOpenState {
                status,
                history,
                sent_at: Some(e.timestamp),
                version,
                ..state
            }
        }

        OpeningDispatchFailed(e) => CompartmentOpenState {
            dispatch_failures: state.dispatch_failures + 1,
            message: Some(e.reason.clone()),
            version,
            ..state
        },

        CompartmentOpened(e) => {
            let (status, history) = advance(state.status, &state.history, OpenInput::Open);
            CompartmentOpenState {
                status,
                history,
                error_code: None,
                message: None,
                completed_at: Some(e.timestamp),
                version,
                ..state
            }
        }

        CompartmentOpeningFailed(e) => {
            let (status, history) = advance(state.status, &state.history, OpenInput::Fail);
            CompartmentOpenState {
                status,
                history,
                error_code: e.error_code.clone(),
                message: e.message.clone(),
                completed_at: Some(e.timestamp),
                version,
                ..state
            }
        }
    }
}
