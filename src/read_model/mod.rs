// Copyright (c) 2025 - Cowboy AI, Inc.
//! Read Models
//!
//! Query-optimized views derived from the event log. They are caches: any
//! of them can be dropped and rebuilt by folding [`EventStore::load_all`]
//! through its projector.
//!
//! | View | Keyed by | Used for |
//! |---|---|---|
//! | [`BankRegistry`] | bank id, provisioning token | token lookup, liveness |
//! | [`OpenRequestView`] | correlation id | open status polling |
//! | [`CompartmentView`] | compartment id | last open outcome |
//!
//! Projectors must be idempotent: the worker pool may hand them an event
//! more than once (redrive, rebuild over a live view).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::errors::LockerResult;
use crate::event_store::{EventStore, StoredEvent};

pub mod banks;
pub mod compartments;
pub mod open_requests;

pub use banks::{BankRegistry, BankView, HeartbeatOutcome};
pub use compartments::{CompartmentRow, CompartmentStatus, CompartmentView};
pub use open_requests::{OpenRequestSnapshot, OpenRequestView};

/// Maps events onto a view
#[async_trait]
pub trait Projector: Send + Sync {
    /// Apply one event; events of an aggregate arrive in version order
    async fn project(&self, event: &StoredEvent) -> LockerResult<()>;

    /// Drop all projected state
    async fn reset(&self) -> LockerResult<()>;

    fn name(&self) -> &str;
}

/// Reset every projector and replay the whole log through it
pub async fn rebuild(
    store: &dyn EventStore,
    projectors: &[Arc<dyn Projector>],
) -> LockerResult<usize> {
    let events = store.load_all().await?;

    for projector in projectors {
        projector.reset().await?;
        for event in &events {
            projector.project(event).await?;
        }
        info!(
            projector = projector.name(),
            events = events.len(),
            "Projection rebuilt"
        );
    }

    Ok(events.len())
}
