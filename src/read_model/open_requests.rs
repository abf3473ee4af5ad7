// Copyright (c) 2025 - Cowboy AI, Inc.
//! Open request status view
//!
//! Polled by API callers with the correlation id they received from
//! `submit_open_request`. Each row is the aggregate fold itself; a stored
//! event at or below the row's version is a redelivery and is skipped.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::Projector;
use crate::aggregate::compartment_open::{self, CompartmentOpenState};
use crate::domain::{Actor, Compartment, CorrelationId};
use crate::errors::LockerResult;
use crate::event_store::StoredEvent;
use crate::events::{AuthorizationType, DenialReason};
use crate::state_machine::open_request::OpenRequestStatus;

/// Current state of one open request, as returned to API callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRequestSnapshot {
    pub correlation_id: CorrelationId,
    pub status: OpenRequestStatus,
    pub actor: Actor,
    pub compartment: Compartment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<DenialReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OpenRequestSnapshot {
    /// `None` until the request's first event has been folded
    pub fn from_state(state: &CompartmentOpenState) -> Option<Self> {
        Some(Self {
            correlation_id: state.correlation_id,
            status: state.status?,
            actor: state.actor?,
            compartment: state.compartment?,
            authorization: state.authorization,
            denial_reason: state.denial_reason,
            error_code: state.error_code.clone(),
            message: state.message.clone(),
            requested_at: state.requested_at?,
            decided_at: state.decided_at,
            sent_at: state.sent_at,
            completed_at: state.completed_at,
        })
    }
}

#[derive(Debug, Default)]
pub struct OpenRequestView {
    requests: RwLock<HashMap<CorrelationId, CompartmentOpenState>>,
}

impl OpenRequestView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, correlation_id: CorrelationId) -> Option<OpenRequestSnapshot> {
        self.requests
            .read()
            .await
            .get(&correlation_id)
            .and_then(OpenRequestSnapshot::from_state)
    }

    pub async fn len(&self) -> usize {
        self.requests.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.requests.read().await.is_empty()
    }
}

#[async_trait]
impl Projector for OpenRequestView {
    async fn project(&self, event: &StoredEvent) -> LockerResult<()> {
        let payload = match event.payload.as_compartment_open() {
            Some(payload) => payload,
            None => return Ok(()),
        };

        let correlation_id = payload.correlation_id();
        let mut requests = self.requests.write().await;
        let state = requests
            .entry(correlation_id)
            .or_insert_with(|| CompartmentOpenState::empty(correlation_id));

        if event.aggregate_version <= state.version {
            return Ok(());
        }

        *state = compartment_open::apply_event(state.clone(), payload);
        Ok(())
    }

    async fn reset(&self) -> LockerResult<()> {
        self.requests.write().await.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "open_requests"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BankId, CompartmentId, UserId};
    use crate::events::{CompartmentOpenEvent, DomainEvent, OpenAuthorized, OpenRequested};

    fn at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn stored(version: u64, event: CompartmentOpenEvent) -> StoredEvent {
        let id = event.correlation_id().as_uuid();
        StoredEvent::new(id, version, DomainEvent::from(event))
    }

    #[tokio::test]
    async fn test_snapshot_follows_events_and_ignores_redelivery() {
        let view = OpenRequestView::new();
        let correlation_id = CorrelationId::new();
        let compartment = Compartment::new(CompartmentId::new(), BankId::new(), 3);

        let requested = stored(
            1,
            CompartmentOpenEvent::OpenRequested(OpenRequested {
                correlation_id,
                actor: Actor::admin(UserId::new()),
                compartment,
                timestamp: at(),
            }),
        );
        let authorized = stored(
            2,
            CompartmentOpenEvent::OpenAuthorized(OpenAuthorized {
                correlation_id,
                authorization: AuthorizationType::AdminOverride,
                timestamp: at(),
            }),
        );

        assert!(view.get(correlation_id).await.is_none());

        view.project(&requested).await.unwrap();
        view.project(&authorized).await.unwrap();
        view.project(&authorized).await.unwrap();
        view.project(&requested).await.unwrap();

        let snapshot = view.get(correlation_id).await.unwrap();
        assert_eq!(snapshot.status, OpenRequestStatus::Authorized);
        assert_eq!(snapshot.authorization, Some(AuthorizationType::AdminOverride));
        assert_eq!(snapshot.compartment, compartment);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "accepted");
        assert_eq!(json["correlationId"], correlation_id.to_string());
    }
}
