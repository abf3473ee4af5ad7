// Copyright (c) 2025 - Cowboy AI, Inc.
//! Aggregate loading and the load → decide → append transaction
//!
//! Every write in the crate goes through [`update_bank`] or
//! [`update_open_request`]:
//!
//! 1. Load the aggregate's events from the store
//! 2. Fold them into the current state
//! 3. Decide new events with a pure handler
//! 4. Append at the folded version
//!
//! A `ConcurrencyConflict` on step 4 restarts from step 1.

use tracing::debug;

use crate::aggregate::{CommandError, CompartmentOpenState, LockerBankState};
use crate::domain::{BankId, CorrelationId};
use crate::errors::LockerResult;
use crate::event_store::EventStore;
use crate::events::{CompartmentOpenEvent, DomainEvent, LockerBankEvent};
use crate::retry::{conflict_backoff, is_conflict, run_with_retry};

/// Fold a bank's log into its current state
pub async fn load_bank(store: &dyn EventStore, bank_id: BankId) -> LockerResult<LockerBankState> {
    let stored = store.load(bank_id.as_uuid()).await?;
    Ok(LockerBankState::from_events(
        bank_id,
        stored.iter().filter_map(|e| e.payload.as_locker_bank()),
    ))
}

/// Fold an open request's log into its current state
pub async fn load_open_request(
    store: &dyn EventStore,
    correlation_id: CorrelationId,
) -> LockerResult<CompartmentOpenState> {
    let stored = store.load(correlation_id.as_uuid()).await?;
    Ok(CompartmentOpenState::from_events(
        correlation_id,
        stored.iter().filter_map(|e| e.payload.as_compartment_open()),
    ))
}

/// Decide and append bank events, retrying on version conflicts
///
/// Returns the appended events; an empty decision appends nothing.
pub async fn update_bank<F>(
    store: &dyn EventStore,
    bank_id: BankId,
    decide: F,
) -> LockerResult<Vec<LockerBankEvent>>
where
    F: Fn(&LockerBankState) -> Result<Vec<LockerBankEvent>, CommandError> + Sync,
{
    let decide = &decide;
    run_with_retry(conflict_backoff(), "bank update", is_conflict, move || async move {
        let state = load_bank(store, bank_id).await?;
        let events = decide(&state)?;
        append(store, bank_id.as_uuid(), state.version, &events).await?;
        Ok(events)
    })
    .await
}

/// [`update_bank`] that appends nothing once a fact of one of `event_types`
/// keyed by `correlation_key` is in the bank's log
///
/// The lookup runs inside every attempt, so a writer that lost a version
/// race to the same fact sees it on reload.
pub async fn update_bank_unless_recorded<F>(
    store: &dyn EventStore,
    bank_id: BankId,
    event_types: &[&str],
    correlation_key: &str,
    decide: F,
) -> LockerResult<Vec<LockerBankEvent>>
where
    F: Fn(&LockerBankState) -> Result<Vec<LockerBankEvent>, CommandError> + Sync,
{
    let decide = &decide;
    run_with_retry(conflict_backoff(), "guarded bank update", is_conflict, move || async move {
        for event_type in event_types {
            if store
                .exists(bank_id.as_uuid(), event_type, correlation_key)
                .await?
            {
                debug!(%bank_id, event_type, correlation_key, "Already recorded");
                return Ok(Vec::new());
            }
        }

        let state = load_bank(store, bank_id).await?;
        let events = decide(&state)?;
        append(store, bank_id.as_uuid(), state.version, &events).await?;
        Ok(events)
    })
    .await
}

/// Decide and append open-request events, retrying on version conflicts
pub async fn update_open_request<F>(
    store: &dyn EventStore,
    correlation_id: CorrelationId,
    decide: F,
) -> LockerResult<Vec<CompartmentOpenEvent>>
where
    F: Fn(&CompartmentOpenState) -> Result<Vec<CompartmentOpenEvent>, CommandError> + Sync,
{
    let decide = &decide;
    run_with_retry(
        conflict_backoff(),
        "open request update",
        is_conflict,
        move || async move {
            let state = load_open_request(store, correlation_id).await?;
            let events = decide(&state)?;
            append(store, correlation_id.as_uuid(), state.version, &events).await?;
            Ok(events)
        },
    )
    .await
}

async fn append<E>(
    store: &dyn EventStore,
    aggregate_id: uuid::Uuid,
    expected_version: u64,
    events: &[E],
) -> LockerResult<()>
where
    E: Clone + Into<DomainEvent>,
{
    if events.is_empty() {
        return Ok(());
    }

    let batch: Vec<DomainEvent> = events.iter().cloned().map(Into::into).collect();
    let version = store.append(aggregate_id, expected_version, batch).await?;
    debug!(%aggregate_id, version, "Appended {} event(s)", events.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{
        handle_config_outcome, handle_connection, handle_register_bank, ConnectionCommand,
        RecordConfigOutcomeCommand, RegisterBankCommand,
    };
    use crate::domain::ProvisioningToken;
    use crate::errors::LockerError;
    use crate::event_store::InMemoryEventStore;
    use crate::events::event_types::CONFIG_APPLIED;
    use crate::wire::CommandResult;
    use chrono::Utc;

    async fn registered(store: &InMemoryEventStore) -> BankId {
        let bank_id = BankId::new();
        update_bank(store, bank_id, |state| {
            handle_register_bank(
                state,
                RegisterBankCommand {
                    bank_id,
                    provisioning_token: ProvisioningToken::new("tok").unwrap(),
                    heartbeat_interval_seconds: 30,
                    heartbeat_timeout_seconds: Some(90),
                    timestamp: Utc::now(),
                },
            )
            .map(|e| vec![LockerBankEvent::BankRegistered(e)])
        })
        .await
        .unwrap();
        bank_id
    }

    #[tokio::test]
    async fn test_update_folds_and_appends() {
        let store = InMemoryEventStore::new();
        let bank_id = registered(&store).await;

        let events = update_bank(&store, bank_id, |state| {
            handle_connection(state, ConnectionCommand::Established { timestamp: Utc::now() })
                .map(|e| vec![e])
        })
        .await
        .unwrap();

        assert_eq!(events.len(), 1);
        let state = load_bank(&store, bank_id).await.unwrap();
        assert_eq!(state.version, 2);
    }

    #[tokio::test]
    async fn test_rejection_appends_nothing() {
        let store = InMemoryEventStore::new();
        let bank_id = registered(&store).await;

        let established = |state: &LockerBankState| {
            handle_connection(state, ConnectionCommand::Established { timestamp: Utc::now() })
                .map(|e| vec![e])
        };

        update_bank(&store, bank_id, established).await.unwrap();
        let err = update_bank(&store, bank_id, established).await.unwrap_err();

        assert!(matches!(
            err,
            LockerError::Command(CommandError::AlreadyRecorded(_))
        ));
        assert_eq!(store.version(bank_id.as_uuid()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_updates_serialize() {
        let store = std::sync::Arc::new(InMemoryEventStore::new());
        let bank_id = registered(&store).await;

        let lost = |state: &LockerBankState| {
            handle_connection(
                state,
                ConnectionCommand::Lost {
                    reason: "timeout".into(),
                    last_heartbeat_at: None,
                    timestamp: Utc::now(),
                },
            )
            .map(|e| vec![e])
        };

        let (a, b) = tokio::join!(
            update_bank(&*store, bank_id, lost),
            update_bank(&*store, bank_id, lost)
        );

        // One appends; the other reloads after the conflict and sees the bank offline
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(store.version(bank_id.as_uuid()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_guarded_update_records_fact_once() {
        let store = InMemoryEventStore::new();
        let bank_id = registered(&store).await;

        let applied = |state: &LockerBankState| {
            handle_config_outcome(
                state,
                RecordConfigOutcomeCommand {
                    transaction_id: "tx-9".into(),
                    result: CommandResult::Success,
                    config_hash: Some("abc".into()),
                    error_code: None,
                    message: None,
                    timestamp: Utc::now(),
                },
            )
            .map(|e| vec![e])
        };

        let first =
            update_bank_unless_recorded(&store, bank_id, &[CONFIG_APPLIED], "tx-9", applied)
                .await
                .unwrap();
        let second =
            update_bank_unless_recorded(&store, bank_id, &[CONFIG_APPLIED], "tx-9", applied)
                .await
                .unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(store.version(bank_id.as_uuid()).await.unwrap(), 2);
    }
}
