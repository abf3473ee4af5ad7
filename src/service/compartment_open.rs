// Copyright (c) 2025 - Cowboy AI, Inc.
//! Compartment Open Service
//!
//! The synchronous half of an open request:
//!
//! ```text
//! submit_open_request
//!     ↓
//! grant lookup ──> handle_request_open ──> [OpenRequested, OpenAuthorized | OpenDenied]
//!     ↓
//! { correlationId, accepted }         (returned as soon as both are appended)
//! ```
//!
//! Dispatch and the hardware outcome happen later on the worker pool;
//! callers follow them with [`CompartmentOpenService::get_open_status`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::access::AccessGrantStore;
use crate::aggregate::{handle_request_open, RequestOpenCommand};
use crate::domain::{Actor, Compartment, CorrelationId};
use crate::errors::{LockerError, LockerResult};
use crate::event_store::EventStore;
use crate::events::CompartmentOpenEvent;
use crate::read_model::{OpenRequestSnapshot, OpenRequestView};
use crate::repository::{load_open_request, update_open_request};

/// Immediate answer to an open request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRequestReceipt {
    pub correlation_id: CorrelationId,
    pub accepted: bool,
}

#[async_trait]
pub trait CompartmentOpenService: Send + Sync {
    /// Record an open request and its authorization decision
    ///
    /// A denial is a normal receipt with `accepted: false`.
    async fn submit_open_request(
        &self,
        actor: Actor,
        compartment: Compartment,
    ) -> LockerResult<OpenRequestReceipt>;

    /// Current state of an open request
    ///
    /// # Errors
    /// - `NotFound` for a correlation id that was never submitted
    async fn get_open_status(&self, correlation_id: CorrelationId) -> LockerResult<OpenRequestSnapshot>;
}

pub struct EventSourcedCompartmentOpenService {
    store: Arc<dyn EventStore>,
    grants: Arc<dyn AccessGrantStore>,
    view: Arc<OpenRequestView>,
}

impl EventSourcedCompartmentOpenService {
    pub fn new(
        store: Arc<dyn EventStore>,
        grants: Arc<dyn AccessGrantStore>,
        view: Arc<OpenRequestView>,
    ) -> Self {
        Self { store, grants, view }
    }
}

#[async_trait]
impl CompartmentOpenService for EventSourcedCompartmentOpenService {
    #[instrument(skip(self), fields(user_id = %actor.user_id, compartment_id = %compartment.id))]
    async fn submit_open_request(
        &self,
        actor: Actor,
        compartment: Compartment,
    ) -> LockerResult<OpenRequestReceipt> {
        let now = Utc::now();
        let has_active_grant = if actor.is_admin() {
            false
        } else {
            self.grants
                .has_active(actor.user_id, compartment.id, now)
                .await?
        };

        let correlation_id = CorrelationId::new();
        let command = RequestOpenCommand {
            correlation_id,
            actor,
            compartment,
            has_active_grant,
            timestamp: now,
        };

        let events = update_open_request(self.store.as_ref(), correlation_id, |state| {
            handle_request_open(state, command.clone())
        })
        .await?;

        let accepted = events
            .iter()
            .any(|e| matches!(e, CompartmentOpenEvent::OpenAuthorized(_)));

        info!(%correlation_id, accepted, "Open request decided");

        Ok(OpenRequestReceipt {
            correlation_id,
            accepted,
        })
    }

    #[instrument(skip(self))]
    async fn get_open_status(&self, correlation_id: CorrelationId) -> LockerResult<OpenRequestSnapshot> {
        if let Some(snapshot) = self.view.get(correlation_id).await {
            return Ok(snapshot);
        }

        // The view trails the log; fold the log directly when it has not
        // caught up yet.
        let state = load_open_request(self.store.as_ref(), correlation_id).await?;
        OpenRequestSnapshot::from_state(&state)
            .ok_or_else(|| LockerError::NotFound(format!("open request {}", correlation_id)))
    }
}
