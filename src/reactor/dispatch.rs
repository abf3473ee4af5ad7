// Copyright (c) 2025 - Cowboy AI, Inc.
//! Open command dispatcher
//!
//! `OpenAuthorized` → publish `{action: "open_compartment", transaction_id,
//! timestamp, data}` to `device/{bank}/command` → `OpeningSent`. The
//! correlation id is the transaction id on the wire.
//!
//! A failed publish appends `OpeningDispatchFailed` for audit (the request
//! stays authorized) and is re-raised for retry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info};

use super::Reactor;
use crate::aggregate::{handle_dispatch, CommandError, DispatchCommand};
use crate::domain::{Compartment, CorrelationId};
use crate::errors::{LockerError, LockerResult};
use crate::event_store::{EventStore, StoredEvent};
use crate::events::event_types::{OPENING_SENT, OPEN_AUTHORIZED};
use crate::nats::Transport;
use crate::repository::{load_open_request, update_open_request};
use crate::state_machine::open_request::OpenRequestStatus;
use crate::topics;
use crate::wire::{CommandAction, DeviceCommand};

pub struct OpenCommandDispatcher {
    store: Arc<dyn EventStore>,
    transport: Arc<dyn Transport>,
}

impl OpenCommandDispatcher {
    pub fn new(store: Arc<dyn EventStore>, transport: Arc<dyn Transport>) -> Self {
        Self { store, transport }
    }

    async fn publish(&self, correlation_id: CorrelationId, compartment: Compartment) -> LockerResult<()> {
        let command = DeviceCommand {
            action: CommandAction::OpenCompartment.as_str().to_string(),
            transaction_id: correlation_id.to_string(),
            timestamp: Utc::now(),
            data: json!({
                "compartment_id": compartment.id,
                "compartment_number": compartment.number,
            }),
        };

        self.transport
            .publish(
                &topics::command(compartment.bank_id),
                &serde_json::to_value(&command)?,
            )
            .await
    }

    async fn record(&self, correlation_id: CorrelationId, command: DispatchCommand) -> LockerResult<()> {
        let result = update_open_request(self.store.as_ref(), correlation_id, |state| {
            handle_dispatch(state, command.clone()).map(|e| vec![e])
        })
        .await;

        match result {
            Ok(_) | Err(LockerError::Command(CommandError::AlreadyRecorded(_))) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Reactor for OpenCommandDispatcher {
    fn name(&self) -> &str {
        "open_command_dispatch"
    }

    fn interested(&self, event: &StoredEvent) -> bool {
        event.event_type == OPEN_AUTHORIZED
    }

    async fn react(&self, event: &StoredEvent) -> LockerResult<()> {
        let correlation_id = CorrelationId::from_uuid(event.aggregate_id);

        if self
            .store
            .exists(event.aggregate_id, OPENING_SENT, &correlation_id.to_string())
            .await?
        {
            debug!(%correlation_id, "Open command already sent");
            return Ok(());
        }

        let state = load_open_request(self.store.as_ref(), correlation_id).await?;
        let compartment = match (state.status, state.compartment) {
            (Some(OpenRequestStatus::Authorized), Some(compartment)) => compartment,
            (status, _) => {
                debug!(%correlation_id, ?status, "Open request not awaiting dispatch");
                return Ok(());
            }
        };

        match self.publish(correlation_id, compartment).await {
            Ok(()) => {
                self.record(correlation_id, DispatchCommand::Sent { timestamp: Utc::now() })
                    .await?;
                info!(
                    %correlation_id,
                    bank_id = %compartment.bank_id,
                    compartment_number = compartment.number,
                    "Open command sent"
                );
                Ok(())
            }
            Err(e) => {
                error!(%correlation_id, error = %e, "Open command publish failed");
                self.record(
                    correlation_id,
                    DispatchCommand::Failed {
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    },
                )
                .await?;
                Err(LockerError::SideEffectFailure(format!(
                    "open command for {}: {}",
                    correlation_id, e
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{handle_request_open, RequestOpenCommand};
    use crate::domain::{Actor, BankId, CompartmentId, UserId};
    use crate::event_store::InMemoryEventStore;
    use crate::nats::InMemoryTransport;

    async fn open_request(
        store: &InMemoryEventStore,
        actor: Actor,
        has_active_grant: bool,
    ) -> (CorrelationId, Compartment, StoredEvent) {
        let correlation_id = CorrelationId::new();
        let compartment = Compartment::new(CompartmentId::new(), BankId::new(), 7);

        update_open_request(store, correlation_id, |state| {
            handle_request_open(
                state,
                RequestOpenCommand {
                    correlation_id,
                    actor,
                    compartment,
                    has_active_grant,
                    timestamp: Utc::now(),
                },
            )
        })
        .await
        .unwrap();

        let decision = store
            .load(correlation_id.as_uuid())
            .await
            .unwrap()
            .pop()
            .unwrap();
        (correlation_id, compartment, decision)
    }

    #[tokio::test]
    async fn test_publishes_command_once() {
        let store = Arc::new(InMemoryEventStore::new());
        let transport = Arc::new(InMemoryTransport::new());
        let dispatcher = OpenCommandDispatcher::new(store.clone(), transport.clone());

        let (correlation_id, compartment, authorized) =
            open_request(&store, Actor::admin(UserId::new()), false).await;

        dispatcher.react(&authorized).await.unwrap();
        dispatcher.react(&authorized).await.unwrap();

        let commands = transport
            .published_to(&topics::command(compartment.bank_id))
            .await;
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0]["action"], "open_compartment");
        assert_eq!(commands[0]["transaction_id"], correlation_id.to_string());
        assert_eq!(commands[0]["data"]["compartment_number"], 7);

        let state = load_open_request(&*store, correlation_id).await.unwrap();
        assert_eq!(state.status, Some(OpenRequestStatus::Sent));
    }

    #[tokio::test]
    async fn test_failed_publish_is_audited_and_reraised() {
        let store = Arc::new(InMemoryEventStore::new());
        let transport = Arc::new(InMemoryTransport::new());
        let dispatcher = OpenCommandDispatcher::new(store.clone(), transport.clone());
        transport.fail_next(1).await;

        let (correlation_id, _, authorized) =
            open_request(&store, Actor::admin(UserId::new()), false).await;

        let err = dispatcher.react(&authorized).await.unwrap_err();
        assert!(matches!(err, LockerError::SideEffectFailure(_)));

        let state = load_open_request(&*store, correlation_id).await.unwrap();
        assert_eq!(state.status, Some(OpenRequestStatus::Authorized));
        assert_eq!(state.dispatch_failures, 1);

        dispatcher.react(&authorized).await.unwrap();
        let state = load_open_request(&*store, correlation_id).await.unwrap();
        assert_eq!(state.status, Some(OpenRequestStatus::Sent));
    }

    #[tokio::test]
    async fn test_denied_request_is_never_dispatched() {
        let store = Arc::new(InMemoryEventStore::new());
        let transport = Arc::new(InMemoryTransport::new());
        let dispatcher = OpenCommandDispatcher::new(store.clone(), transport.clone());

        let (_, _, denied) = open_request(&store, Actor::user(UserId::new()), false).await;

        assert!(!dispatcher.interested(&denied));
        dispatcher.react(&denied).await.unwrap();
        assert!(transport.published().await.is_empty());
    }
}
