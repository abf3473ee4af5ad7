// Copyright (c) 2025 - Cowboy AI, Inc.
//! Error types for locker control operations
//!
//! Denials and duplicate deliveries are deliberately absent: a denial is a
//! domain event, a duplicate is a `false`/skipped outcome.

use thiserror::Error;
use uuid::Uuid;

use crate::aggregate::CommandError;

/// Errors that can occur while handling locker commands and device traffic
#[derive(Debug, Error)]
pub enum LockerError {
    /// Malformed inbound payload or command input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Optimistic version mismatch on append; reload and retry the command
    #[error("Concurrency conflict on {aggregate_id}: expected version {expected}, actual {actual}")]
    ConcurrencyConflict {
        aggregate_id: Uuid,
        expected: u64,
        actual: u64,
    },

    /// Response references a correlation id with no matching request
    #[error("Unknown correlation: {0}")]
    UnknownCorrelation(String),

    /// Credential issuance or outbound publish failed
    #[error("Side effect failed: {0}")]
    SideEffectFailure(String),

    /// A fact arrived before the fact it depends on was recorded
    #[error("Out of order: {0}")]
    OutOfOrder(String),

    /// Aggregate or read model entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Command rejected by an aggregate handler
    #[error("Command error: {0}")]
    Command(CommandError),

    /// Transport (NATS) error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Event store / KV error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LockerError {
    /// Whether the surrounding retry infrastructure should redeliver
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LockerError::ConcurrencyConflict { .. }
                | LockerError::OutOfOrder(_)
                | LockerError::SideEffectFailure(_)
                | LockerError::Transport(_)
                | LockerError::Storage(_)
        )
    }
}

/// Result type for locker operations
pub type LockerResult<T> = Result<T, LockerError>;

impl From<CommandError> for LockerError {
    fn from(err: CommandError) -> Self {
        match err {
            // The prerequisite fact is still in flight; a retry will see it
            CommandError::Awaiting(what) => LockerError::OutOfOrder(what),
            other => LockerError::Command(other),
        }
    }
}

impl From<async_nats::Error> for LockerError {
    fn from(err: async_nats::Error) -> Self {
        LockerError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for LockerError {
    fn from(err: serde_json::Error) -> Self {
        LockerError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let conflict = LockerError::ConcurrencyConflict {
            aggregate_id: Uuid::nil(),
            expected: 1,
            actual: 2,
        };
        assert!(conflict.is_retryable());
        assert!(LockerError::OutOfOrder("sent not recorded".into()).is_retryable());
        assert!(LockerError::SideEffectFailure("publish".into()).is_retryable());

        assert!(!LockerError::Validation("bad json".into()).is_retryable());
        assert!(!LockerError::UnknownCorrelation("abc".into()).is_retryable());
        assert!(!LockerError::Command(CommandError::NotInitialized).is_retryable());
    }

    #[test]
    fn test_awaiting_command_is_out_of_order() {
        let err = LockerError::from(CommandError::Awaiting("opening sent".into()));
        assert!(matches!(err, LockerError::OutOfOrder(_)));
        assert!(err.is_retryable());

        let err = LockerError::from(CommandError::AlreadyInitialized);
        assert!(matches!(err, LockerError::Command(_)));
    }

    #[test]
    fn test_conflict_display() {
        let err = LockerError::ConcurrencyConflict {
            aggregate_id: Uuid::nil(),
            expected: 3,
            actual: 4,
        };
        assert!(err.to_string().contains("expected version 3, actual 4"));
    }
}
