// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for the open request lifecycle
//!
//! Whatever commands arrive, in whatever order, the states an open request
//! passes through are a prefix of
//! `Requested → Authorized → Sent → {Opened | Failed}` or
//! `Requested → Denied`.

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use uuid::Uuid;

use locker_control::aggregate::compartment_open::{apply_event, CompartmentOpenState};
use locker_control::aggregate::{
    handle_dispatch, handle_open_outcome, handle_request_open, DispatchCommand,
    RecordOpenOutcomeCommand, RequestOpenCommand,
};
use locker_control::domain::{Actor, BankId, Compartment, CompartmentId, CorrelationId, UserId};
use locker_control::events::{
    AuthorizationType, CompartmentOpenEvent, CompartmentOpened, CompartmentOpeningFailed,
    DenialReason, OpenAuthorized, OpenDenied, OpenRequested, OpeningDispatchFailed, OpeningSent,
};
use locker_control::state_machine::open_request::is_valid_history;
use locker_control::state_machine::open_request::OpenRequestStatus::{self, *};
use locker_control::wire::CommandResult;

const GRANTED_PATH: [OpenRequestStatus; 4] = [Requested, Authorized, Sent, Opened];
const FAILED_PATH: [OpenRequestStatus; 4] = [Requested, Authorized, Sent, Failed];
const DENIED_PATH: [OpenRequestStatus; 2] = [Requested, Denied];

fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-19T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn is_allowed_prefix(history: &[OpenRequestStatus]) -> bool {
    [&GRANTED_PATH[..], &FAILED_PATH[..], &DENIED_PATH[..]]
        .iter()
        .any(|path| history.len() <= path.len() && path[..history.len()] == *history)
}

fn fixed_correlation() -> CorrelationId {
    CorrelationId::from_uuid(Uuid::nil())
}

fn fixed_compartment() -> Compartment {
    Compartment::new(CompartmentId::from_uuid(Uuid::nil()), BankId::from_uuid(Uuid::nil()), 1)
}

/// One command from any of the request's writers
#[derive(Debug, Clone)]
enum Step {
    Request { admin: bool, granted: bool },
    DispatchSent,
    DispatchFailed,
    Outcome { success: bool, own_bank: bool },
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (any::<bool>(), any::<bool>())
            .prop_map(|(admin, granted)| Step::Request { admin, granted }),
        Just(Step::DispatchSent),
        Just(Step::DispatchFailed),
        (any::<bool>(), any::<bool>())
            .prop_map(|(success, own_bank)| Step::Outcome { success, own_bank }),
    ]
}

/// Every event a log could hold for one request
fn event_strategy(
    correlation_id: CorrelationId,
    compartment: Compartment,
) -> impl Strategy<Value = CompartmentOpenEvent> {
    let at = base_time();
    let actor = Actor::user(UserId::new());
    prop_oneof![
        Just(CompartmentOpenEvent::OpenRequested(OpenRequested {
            correlation_id,
            actor,
            compartment,
            timestamp: at,
        })),
        Just(CompartmentOpenEvent::OpenAuthorized(OpenAuthorized {
            correlation_id,
            authorization: AuthorizationType::GrantedAccess,
            timestamp: at,
        })),
        Just(CompartmentOpenEvent::OpenDenied(OpenDenied {
            correlation_id,
            reason: DenialReason::MissingActiveAccess,
            timestamp: at,
        })),
        Just(CompartmentOpenEvent::OpeningSent(OpeningSent {
            correlation_id,
            compartment,
            timestamp: at,
        })),
        Just(CompartmentOpenEvent::OpeningDispatchFailed(OpeningDispatchFailed {
            correlation_id,
            reason: "broker unavailable".to_string(),
            timestamp: at,
        })),
        Just(CompartmentOpenEvent::CompartmentOpened(CompartmentOpened {
            correlation_id,
            compartment,
            timestamp: at,
        })),
        Just(CompartmentOpenEvent::CompartmentOpeningFailed(CompartmentOpeningFailed {
            correlation_id,
            compartment,
            error_code: Some("LOCK_JAMMED".to_string()),
            message: None,
            timestamp: at,
        })),
    ]
}

fn decide(
    state: &CompartmentOpenState,
    step: &Step,
    compartment: Compartment,
    at: DateTime<Utc>,
) -> Vec<CompartmentOpenEvent> {
    let decided = match step {
        Step::Request { admin, granted } => handle_request_open(
            state,
            RequestOpenCommand {
                correlation_id: state.correlation_id,
                actor: if *admin {
                    Actor::admin(UserId::new())
                } else {
                    Actor::user(UserId::new())
                },
                compartment,
                has_active_grant: *granted,
                timestamp: at,
            },
        ),
        Step::DispatchSent => {
            handle_dispatch(state, DispatchCommand::Sent { timestamp: at }).map(|e| vec![e])
        }
        Step::DispatchFailed => handle_dispatch(
            state,
            DispatchCommand::Failed {
                reason: "broker unavailable".to_string(),
                timestamp: at,
            },
        )
        .map(|e| vec![e]),
        Step::Outcome { success, own_bank } => handle_open_outcome(
            state,
            RecordOpenOutcomeCommand {
                responding_bank: if *own_bank {
                    compartment.bank_id
                } else {
                    BankId::new()
                },
                result: if *success {
                    CommandResult::Success
                } else {
                    CommandResult::Error
                },
                error_code: None,
                message: None,
                timestamp: at,
            },
        )
        .map(|e| vec![e]),
    };

    decided.unwrap_or_default()
}

proptest! {
    /// Property: commands in any order only ever walk an allowed path
    #[test]
    fn prop_commands_walk_allowed_paths(steps in prop::collection::vec(step_strategy(), 0..24)) {
        let compartment = Compartment::new(CompartmentId::new(), BankId::new(), 1);
        let mut state = CompartmentOpenState::empty(CorrelationId::new());
        let mut observed: Vec<OpenRequestStatus> = Vec::new();

        for (i, step) in steps.iter().enumerate() {
            let at = base_time() + Duration::seconds(i as i64);
            for event in decide(&state, step, compartment, at) {
                state = apply_event(state, &event);
                if let Some(status) = state.status {
                    if observed.last() != Some(&status) {
                        observed.push(status);
                    }
                }
            }
        }

        prop_assert!(is_allowed_prefix(&observed), "observed {:?}", observed);
        prop_assert_eq!(&observed, &state.history);
    }

    /// Property: folding any event log, even one no handler would write,
    /// never records a state outside the allowed paths
    #[test]
    fn prop_fold_history_is_allowed_prefix(
        events in prop::collection::vec(event_strategy(fixed_correlation(), fixed_compartment()), 0..16)
    ) {
        let correlation_id = fixed_correlation();
        let state = CompartmentOpenState::from_events(correlation_id, events.iter());

        prop_assert!(is_allowed_prefix(&state.history), "history {:?}", state.history);
        prop_assert!(is_valid_history(&state.history));
        prop_assert_eq!(state.version, events.len() as u64);
    }

    /// Property: a terminal request stays terminal whatever follows
    #[test]
    fn prop_terminal_is_absorbing(
        denied in any::<bool>(),
        steps in prop::collection::vec(step_strategy(), 0..16),
    ) {
        let compartment = Compartment::new(CompartmentId::new(), BankId::new(), 1);
        let mut state = CompartmentOpenState::empty(CorrelationId::new());
        let opening = [
            Step::Request { admin: !denied, granted: false },
            Step::DispatchSent,
            Step::Outcome { success: true, own_bank: true },
        ];
        for step in &opening {
            for event in decide(&state, step, compartment, base_time()) {
                state = apply_event(state, &event);
            }
        }
        let terminal = state.status;
        prop_assert!(state.is_terminal());

        for step in &steps {
            prop_assert!(decide(&state, step, compartment, base_time()).is_empty());
        }
        prop_assert_eq!(state.status, terminal);
    }
}
