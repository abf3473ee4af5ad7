// Copyright (c) 2025 - Cowboy AI, Inc.
//! Compartment view: last open outcome per compartment

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::Projector;
use crate::domain::{BankId, CompartmentId, CorrelationId};
use crate::errors::LockerResult;
use crate::event_store::StoredEvent;
use crate::events::CompartmentOpenEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompartmentStatus {
    /// No outcome recorded yet
    #[default]
    Unknown,
    /// Open command dispatched, outcome pending
    Opening,
    Opened,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompartmentRow {
    pub compartment_id: CompartmentId,
    pub bank_id: BankId,
    pub number: u32,
    pub status: CompartmentStatus,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub last_correlation_id: Option<CorrelationId>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct CompartmentView {
    rows: RwLock<HashMap<CompartmentId, CompartmentRow>>,
}

impl CompartmentView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, compartment_id: CompartmentId) -> Option<CompartmentRow> {
        self.rows.read().await.get(&compartment_id).cloned()
    }

    fn apply(rows: &mut HashMap<CompartmentId, CompartmentRow>, event: &CompartmentOpenEvent) {
        use CompartmentOpenEvent::*;

        let compartment = match event {
            OpeningSent(e) => e.compartment,
            CompartmentOpened(e) => e.compartment,
            CompartmentOpeningFailed(e) => e.compartment,
            _ => return,
        };

        let row = rows
            .entry(compartment.id)
            .or_insert_with(|| CompartmentRow {
                compartment_id: compartment.id,
                bank_id: compartment.bank_id,
                number: compartment.number,
                status: CompartmentStatus::Unknown,
                last_opened_at: None,
                last_failed_at: None,
                last_correlation_id: None,
                last_error_code: None,
                last_error_message: None,
                updated_at: None,
            });

        // Outcomes of older requests never overwrite a newer one
        let at = event.timestamp();
        if row.updated_at.map_or(false, |updated| at < updated) {
            return;
        }
        row.updated_at = Some(at);
        row.last_correlation_id = Some(event.correlation_id());

        match event {
            OpeningSent(_) => row.status = CompartmentStatus::Opening,
            CompartmentOpened(e) => {
                row.status = CompartmentStatus::Opened;
                row.last_opened_at = Some(e.timestamp);
                row.last_error_code = None;
                row.last_error_message = None;
            }
            CompartmentOpeningFailed(e) => {
                row.status = CompartmentStatus::Failed;
                row.last_failed_at = Some(e.timestamp);
                row.last_error_code = e.error_code.clone();
                row.last_error_message = e.message.clone();
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Projector for CompartmentView {
    async fn project(&self, event: &StoredEvent) -> LockerResult<()> {
        if let Some(event) = event.payload.as_compartment_open() {
            Self::apply(&mut *self.rows.write().await, event);
        }
        Ok(())
    }

    async fn reset(&self) -> LockerResult<()> {
        self.rows.write().await.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "compartments"
    }
}
