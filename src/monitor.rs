// Copyright (c) 2025 - Cowboy AI, Inc.
//! Heartbeat / Connection Monitor
//!
//! Derives online/offline edges from heartbeat timestamps held in the
//! [`BankRegistry`]:
//!
//! - a heartbeat from an unknown/offline bank appends `ConnectionEstablished`
//! - a sweep takes every overdue bank offline and appends
//!   `ConnectionLost { reason: "timeout" }`
//!
//! Both edges go through a conditional row update first; an event is only
//! appended when that update changed the row. Sweeps are single-flight: a
//! sweep started while another is running returns immediately.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregate::{handle_connection, CommandError, ConnectionCommand};
use crate::domain::BankId;
use crate::errors::{LockerError, LockerResult};
use crate::event_store::EventStore;
use crate::read_model::{BankRegistry, HeartbeatOutcome};
use crate::repository::update_bank;

pub const TIMEOUT_REASON: &str = "timeout";

/// What a sweep found and did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Banks past their heartbeat deadline
    pub candidates: Vec<BankId>,
    /// Banks this sweep took offline
    pub transitioned: Vec<BankId>,
    pub dry_run: bool,
    /// Another sweep was running; nothing was examined
    pub skipped: bool,
}

pub struct ConnectionMonitor {
    store: Arc<dyn EventStore>,
    registry: Arc<BankRegistry>,
    sweep_lock: Mutex<()>,
}

impl ConnectionMonitor {
    pub fn new(store: Arc<dyn EventStore>, registry: Arc<BankRegistry>) -> Self {
        Self {
            store,
            registry,
            sweep_lock: Mutex::new(()),
        }
    }

    /// Record a heartbeat received at `at`
    pub async fn record_heartbeat(
        &self,
        bank_id: BankId,
        at: DateTime<Utc>,
    ) -> LockerResult<HeartbeatOutcome> {
        let outcome = self.registry.record_heartbeat(bank_id, at).await;

        match outcome {
            HeartbeatOutcome::UnknownBank => {
                warn!(%bank_id, "Heartbeat from unregistered bank");
            }
            HeartbeatOutcome::Refreshed => {
                debug!(%bank_id, "Heartbeat");
            }
            HeartbeatOutcome::CameOnline => {
                self.append_edge(bank_id, ConnectionCommand::Established { timestamp: at })
                    .await?;
                info!(%bank_id, "Bank online");
            }
        }

        Ok(outcome)
    }

    /// Take every overdue bank offline
    ///
    /// With `dry_run` the candidates are counted and nothing changes.
    pub async fn sweep(&self, now: DateTime<Utc>, dry_run: bool) -> LockerResult<SweepReport> {
        let _guard = match self.sweep_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Sweep already running");
                return Ok(SweepReport {
                    dry_run,
                    skipped: true,
                    ..SweepReport::default()
                });
            }
        };

        let candidates = self.registry.overdue(now).await;
        let mut report = SweepReport {
            candidates: candidates.clone(),
            dry_run,
            ..SweepReport::default()
        };

        if dry_run {
            info!(candidates = candidates.len(), "Offline sweep (dry run)");
            return Ok(report);
        }

        for bank_id in candidates {
            let last_heartbeat_at = self
                .registry
                .get(bank_id)
                .await
                .and_then(|bank| bank.last_heartbeat_at);

            if !self.registry.mark_offline(bank_id, now).await {
                // A heartbeat arrived since the candidate list was taken
                continue;
            }

            let lost = ConnectionCommand::Lost {
                reason: TIMEOUT_REASON.to_string(),
                last_heartbeat_at,
                timestamp: now,
            };
            match self.append_edge(bank_id, lost).await {
                Ok(()) => {
                    info!(%bank_id, last_heartbeat_at = ?last_heartbeat_at, "Bank offline");
                    report.transitioned.push(bank_id);
                }
                Err(e) => {
                    error!(%bank_id, error = %e, "Failed to record connection loss");
                }
            }
        }

        info!(
            candidates = report.candidates.len(),
            transitioned = report.transitioned.len(),
            "Offline sweep"
        );
        Ok(report)
    }

    /// Sweep every `interval` until the task is aborted
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep(Utc::now(), false).await {
                    error!(error = %e, "Offline sweep failed");
                }
            }
        })
    }

    /// Append a connection edge; an edge the log already holds is fine
    async fn append_edge(&self, bank_id: BankId, command: ConnectionCommand) -> LockerResult<()> {
        let result = update_bank(self.store.as_ref(), bank_id, |state| {
            handle_connection(state, command.clone()).map(|e| vec![e])
        })
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(LockerError::Command(CommandError::AlreadyRecorded(what))) => {
                debug!(%bank_id, %what, "Connection edge already recorded");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
