// Copyright (c) 2025 - Cowboy AI, Inc.
//! Compartment Open Request State Machine
//!
//! ```text
//! Requested ─┬─> Authorized ──> Sent ─┬─> [Opened]
//!            │                        └─> [Failed]
//!            └─> [Denied]
//! ```
//!
//! No other edge exists. Terminal states accept no input.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{StateMachine, TransitionError, TransitionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenRequestStatus {
    Requested,
    /// Reported as `accepted` to API callers
    #[serde(rename = "accepted")]
    Authorized,
    Sent,
    Opened,
    Failed,
    Denied,
}

impl OpenRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenRequestStatus::Requested => "requested",
            OpenRequestStatus::Authorized => "accepted",
            OpenRequestStatus::Sent => "sent",
            OpenRequestStatus::Opened => "opened",
            OpenRequestStatus::Failed => "failed",
            OpenRequestStatus::Denied => "denied",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OpenRequestStatus::Opened | OpenRequestStatus::Failed | OpenRequestStatus::Denied
        )
    }
}

impl fmt::Display for OpenRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open request input (FSM input)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenInput {
    Authorize,
    Deny,
    MarkSent,
    Open,
    Fail,
}

impl StateMachine for OpenRequestStatus {
    type Input = OpenInput;
    type Output = ();

    fn transition(&self, input: &Self::Input) -> TransitionResult<(Self, Self::Output)> {
        use OpenInput::*;
        use OpenRequestStatus::*;

        match (self, input) {
            (Requested, Authorize) => Ok((Authorized, ())),
            (Requested, Deny) => Ok((Denied, ())),
            (Authorized, MarkSent) => Ok((Sent, ())),
            (Sent, Open) => Ok((Opened, ())),
            (Sent, Fail) => Ok((Failed, ())),
            (from, _) if from.is_terminal() => Err(TransitionError::Terminal(from.to_string())),
            (from, input) => Err(TransitionError::InvalidTransition {
                from: from.to_string(),
                to: format!("{:?}", input),
            }),
        }
    }

    fn valid_inputs(&self) -> Vec<Self::Input> {
        use OpenInput::*;

        match self {
            OpenRequestStatus::Requested => vec![Authorize, Deny],
            OpenRequestStatus::Authorized => vec![MarkSent],
            OpenRequestStatus::Sent => vec![Open, Fail],
            _ => Vec::new(),
        }
    }
}

/// Whether `states` is a path through the machine starting at `Requested`
///
/// Every observed history of an open request satisfies this.
pub fn is_valid_history(states: &[OpenRequestStatus]) -> bool {
    match states.first() {
        None => true,
        Some(OpenRequestStatus::Requested) => states.windows(2).all(|pair| {
            pair[0]
                .valid_inputs()
                .iter()
                .any(|input| matches!(pair[0].transition(input), Ok((to, _)) if to == pair[1]))
        }),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use OpenInput::*;
    use OpenRequestStatus::*;

    #[test_case(Requested, Authorize => Some(Authorized))]
    #[test_case(Requested, Deny => Some(Denied))]
    #[test_case(Authorized, MarkSent => Some(Sent))]
    #[test_case(Sent, Open => Some(Opened))]
    #[test_case(Sent, Fail => Some(Failed))]
    #[test_case(Requested, MarkSent => None; "skip authorization")]
    #[test_case(Authorized, Open => None; "outcome before dispatch")]
    #[test_case(Denied, Authorize => None; "denied is terminal")]
    #[test_case(Opened, Fail => None; "opened is terminal")]
    #[test_case(Failed, Open => None; "failed is terminal")]
    fn test_transition_table(from: OpenRequestStatus, input: OpenInput) -> Option<OpenRequestStatus> {
        from.transition(&input).ok().map(|(to, _)| to)
    }

    #[test]
    fn test_terminal_states_report_terminal() {
        assert_eq!(
            Opened.transition(&Open),
            Err(TransitionError::Terminal("opened".into()))
        );
        assert!(Opened.valid_inputs().is_empty());
    }

    #[test]
    fn test_authorized_serializes_as_accepted() {
        assert_eq!(serde_json::to_value(Authorized).unwrap(), "accepted");
        assert_eq!(Authorized.as_str(), "accepted");
    }

    #[test]
    fn test_valid_histories() {
        assert!(is_valid_history(&[]));
        assert!(is_valid_history(&[Requested, Authorized, Sent, Opened]));
        assert!(is_valid_history(&[Requested, Authorized, Sent, Failed]));
        assert!(is_valid_history(&[Requested, Denied]));
        assert!(is_valid_history(&[Requested, Authorized]));

        assert!(!is_valid_history(&[Authorized, Sent]));
        assert!(!is_valid_history(&[Requested, Sent]));
        assert!(!is_valid_history(&[Requested, Authorized, Sent, Opened, Failed]));
        assert!(!is_valid_history(&[Requested, Denied, Authorized]));
    }
}
