// Copyright (c) 2025 - Cowboy AI, Inc.
//! Provisioning Lifecycle State Machine
//!
//! # States
//!
//! - Unprovisioned: registered, no credentials issued
//! - Provisioned: registration accepted
//! - ProvisioningFailed: credential issuance or reply delivery failed
//!
//! # Inputs
//!
//! - Provision: Unprovisioned | ProvisioningFailed → Provisioned
//! - ReplySent: Provisioned | ProvisioningFailed → Provisioned
//! - ReplyFailed: Provisioned | ProvisioningFailed → ProvisioningFailed
//!
//! `Provision` on an already provisioned bank is rejected; the handler turns
//! that rejection into a `ProvisioningFailed` fact rather than an error.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{StateMachine, TransitionError, TransitionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStatus {
    #[default]
    Unprovisioned,
    Provisioned,
    ProvisioningFailed,
}

impl ProvisioningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningStatus::Unprovisioned => "unprovisioned",
            ProvisioningStatus::Provisioned => "provisioned",
            ProvisioningStatus::ProvisioningFailed => "provisioning_failed",
        }
    }
}

impl fmt::Display for ProvisioningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provisioning input (FSM input)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningInput {
    Provision,
    ReplySent,
    ReplyFailed,
}

impl StateMachine for ProvisioningStatus {
    type Input = ProvisioningInput;
    type Output = ();

    fn transition(&self, input: &Self::Input) -> TransitionResult<(Self, Self::Output)> {
        use ProvisioningInput::*;
        use ProvisioningStatus::*;

        match (self, input) {
            (Unprovisioned | ProvisioningFailed, Provision) => Ok((Provisioned, ())),
            (Provisioned | ProvisioningFailed, ReplySent) => Ok((Provisioned, ())),
            (Provisioned | ProvisioningFailed, ReplyFailed) => Ok((ProvisioningFailed, ())),
            (from, input) => Err(TransitionError::InvalidTransition {
                from: from.to_string(),
                to: format!("{:?}", input),
            }),
        }
    }

    fn valid_inputs(&self) -> Vec<Self::Input> {
        use ProvisioningInput::*;

        match self {
            ProvisioningStatus::Unprovisioned => vec![Provision],
            ProvisioningStatus::Provisioned => vec![ReplySent, ReplyFailed],
            ProvisioningStatus::ProvisioningFailed => vec![Provision, ReplySent, ReplyFailed],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use ProvisioningInput::*;
    use ProvisioningStatus::*;

    #[test_case(Unprovisioned, Provision => Ok(Provisioned))]
    #[test_case(ProvisioningFailed, Provision => Ok(Provisioned))]
    #[test_case(Provisioned, ReplySent => Ok(Provisioned))]
    #[test_case(ProvisioningFailed, ReplySent => Ok(Provisioned))]
    #[test_case(Provisioned, ReplyFailed => Ok(ProvisioningFailed))]
    #[test_case(Provisioned, Provision => Err(()); "already provisioned")]
    #[test_case(Unprovisioned, ReplySent => Err(()); "reply before provision")]
    #[test_case(Unprovisioned, ReplyFailed => Err(()); "failure before provision")]
    fn test_transition_table(
        from: ProvisioningStatus,
        input: ProvisioningInput,
    ) -> Result<ProvisioningStatus, ()> {
        from.transition(&input).map(|(to, _)| to).map_err(|_| ())
    }

    #[test]
    fn test_valid_inputs_agree_with_table() {
        for state in [Unprovisioned, Provisioned, ProvisioningFailed] {
            for input in [Provision, ReplySent, ReplyFailed] {
                assert_eq!(
                    state.valid_inputs().contains(&input),
                    state.can_transition(&input),
                    "{state} / {input:?}"
                );
            }
        }
    }
}
