// Copyright (c) 2025 - Cowboy AI, Inc.
//! Reactors and the worker pool
//!
//! Reactors perform the side effects an appended event calls for (credential
//! issuance, outbound publishes, response derivation) and may append further
//! events. The worker pool tails the event log and feeds them.
//!
//! # Delivery
//!
//! ```text
//! EventStore::append ──wake──> WorkerPool ──read_after(position)──> log
//!                                  ├─> projectors (inline, in order)
//!                                  └─> reactors (concurrent, retried)
//! ```
//!
//! The log is the work queue. The pool keeps a position in it and reads
//! forward; the append broadcast only wakes it early, so a lagging wake-up
//! channel costs nothing but a poll interval. On startup
//! [`WorkerPool::recover`] replays the whole log, which hands every
//! unfinished lifecycle (an authorized open never sent, credentials never
//! delivered) back to its reactor.
//!
//! Delivery is at least once: a reactor can see an event again after a
//! retry, a redrive or a restart. Every reactor guards its side effect with
//! an `EventStore::exists` lookup or a check on the folded aggregate state.
//!
//! A retryable error is retried with exponential backoff bounded by
//! [`WorkerConfig`]. When the backoff is exhausted the event becomes a dead
//! letter: it is logged at `error` and kept for inspection until
//! [`WorkerPool::redrive`] replays the aggregate or the next start recovers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::errors::{LockerError, LockerResult};
use crate::event_store::{EventStore, StoredEvent};
use crate::read_model::Projector;
use crate::retry::{is_retryable, reactor_backoff, run_with_retry};

pub mod dispatch;
pub mod provisioning;
pub mod response;

pub use dispatch::OpenCommandDispatcher;
pub use provisioning::ProvisioningReplyReactor;
pub use response::ResponseDerivationReactor;

/// Append batches read from the log per step
const FEED_BATCH: usize = 256;

/// Side-effect handler for appended events
///
/// `react` must be safe to run more than once for the same event.
#[async_trait]
pub trait Reactor: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the event is one this reactor handles
    fn interested(&self, event: &StoredEvent) -> bool;

    /// Whether a startup replay hands the event over again
    ///
    /// Reactors whose side effect leaves no trace in the log opt out.
    fn recoverable(&self, event: &StoredEvent) -> bool {
        self.interested(event)
    }

    async fn react(&self, event: &StoredEvent) -> LockerResult<()>;
}

/// An event a reactor gave up on
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub reactor: String,
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_version: u64,
    pub event_type: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

pub struct WorkerPool {
    store: Arc<dyn EventStore>,
    reactors: Vec<Arc<dyn Reactor>>,
    projectors: Vec<Arc<dyn Projector>>,
    config: WorkerConfig,
    permits: Arc<Semaphore>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl WorkerPool {
    pub fn new(store: Arc<dyn EventStore>, config: WorkerConfig) -> Self {
        Self {
            store,
            reactors: Vec::new(),
            projectors: Vec::new(),
            permits: Arc::new(Semaphore::new(config.concurrency)),
            config,
            dead_letters: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_reactor(mut self, reactor: Arc<dyn Reactor>) -> Self {
        self.reactors.push(reactor);
        self
    }

    pub fn with_projector(mut self, projector: Arc<dyn Projector>) -> Self {
        self.projectors.push(projector);
        self
    }

    /// Tail the log from `position` until the store is dropped
    ///
    /// Projectors run inline so views see an aggregate's events in order;
    /// reactors run on spawned tasks, at most `concurrency` at a time.
    pub fn start(self: Arc<Self>, position: u64) -> JoinHandle<()> {
        let mut wake = self.store.subscribe();

        tokio::spawn(async move {
            info!(
                reactors = self.reactors.len(),
                projectors = self.projectors.len(),
                concurrency = self.config.concurrency,
                position,
                "Worker pool started"
            );

            let mut position = position;

            loop {
                match self.store.read_after(position, FEED_BATCH).await {
                    Ok(slice) if !slice.events.is_empty() => {
                        for event in slice.events {
                            if !self.feed(event).await {
                                return;
                            }
                        }
                        position = slice.position;
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(position, error = %e, "Reading the event log failed");
                    }
                }

                tokio::select! {
                    woke = wake.recv() => {
                        if let Err(RecvError::Closed) = woke {
                            break;
                        }
                        // One read covers every append that rang
                        loop {
                            match wake.try_recv() {
                                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                                Err(_) => break,
                            }
                        }
                    }
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }

            info!(position, "Worker pool stopped");
        })
    }

    /// Project one event and spawn its reactors; false once the pool is closed
    async fn feed(self: &Arc<Self>, event: StoredEvent) -> bool {
        self.project(&event).await;

        for reactor in self.interested(&event) {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return false,
            };
            let pool = self.clone();
            let event = event.clone();

            tokio::spawn(async move {
                pool.run_reactor(reactor.as_ref(), &event).await;
                drop(permit);
            });
        }

        true
    }

    /// Project the event, then run every interested reactor to completion
    pub async fn dispatch(&self, event: &StoredEvent) {
        self.project(event).await;

        let reactors = self.interested(event);
        join_all(
            reactors
                .iter()
                .map(|reactor| self.run_reactor(reactor.as_ref(), event)),
        )
        .await;
    }

    /// Dispatch every event after `position`, including events the reactors
    /// append along the way, and advance `position` past them. Returns how
    /// many were dispatched.
    pub async fn drain(&self, position: &mut u64) -> LockerResult<usize> {
        let mut dispatched = 0;

        loop {
            let slice = self.store.read_after(*position, FEED_BATCH).await?;
            if slice.events.is_empty() {
                return Ok(dispatched);
            }
            for event in &slice.events {
                self.dispatch(event).await;
            }
            dispatched += slice.events.len();
            *position = slice.position;
        }
    }

    /// Rebuild every read model and hand unfinished work back to the reactors
    ///
    /// Resets the projectors, then replays the whole log: each event is
    /// projected and offered to every reactor that recovers it. Reactor
    /// guards skip side effects already recorded, so what remains is the
    /// work a crash interrupted. Returns the position to
    /// [`WorkerPool::start`] from.
    pub async fn recover(&self) -> LockerResult<u64> {
        for projector in &self.projectors {
            projector.reset().await?;
        }

        let mut position = 0;
        let mut replayed = 0;

        loop {
            let slice = self.store.read_after(position, FEED_BATCH).await?;
            if slice.events.is_empty() {
                break;
            }
            for event in &slice.events {
                self.project(event).await;
                let reactors: Vec<Arc<dyn Reactor>> = self
                    .reactors
                    .iter()
                    .filter(|reactor| reactor.recoverable(event))
                    .cloned()
                    .collect();
                join_all(
                    reactors
                        .iter()
                        .map(|reactor| self.run_reactor(reactor.as_ref(), event)),
                )
                .await;
            }
            replayed += slice.events.len();
            position = slice.position;
        }

        info!(replayed, position, "Worker pool recovered");
        Ok(position)
    }

    /// Replay an aggregate's events through every reactor
    ///
    /// Used to reconcile after dead letters; the reactors' guards make the
    /// replay a no-op for side effects that already happened.
    pub async fn redrive(&self, aggregate_id: Uuid) -> LockerResult<usize> {
        let events = self.store.load(aggregate_id).await?;

        for event in &events {
            for reactor in self.interested(event) {
                self.run_reactor(reactor.as_ref(), event).await;
            }
        }

        info!(%aggregate_id, events = events.len(), "Aggregate redriven");
        Ok(events.len())
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().await.clone()
    }

    fn interested(&self, event: &StoredEvent) -> Vec<Arc<dyn Reactor>> {
        self.reactors
            .iter()
            .filter(|reactor| reactor.interested(event))
            .cloned()
            .collect()
    }

    async fn project(&self, event: &StoredEvent) {
        for projector in &self.projectors {
            if let Err(e) = projector.project(event).await {
                error!(
                    projector = projector.name(),
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Projection failed; rebuild to recover"
                );
            }
        }
    }

    async fn run_reactor(&self, reactor: &dyn Reactor, event: &StoredEvent) {
        debug!(
            reactor = reactor.name(),
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            version = event.aggregate_version,
            "Reacting"
        );

        let result = run_with_retry(
            reactor_backoff(&self.config),
            reactor.name(),
            is_retryable,
            || reactor.react(event),
        )
        .await;

        if let Err(e) = result {
            self.dead_letter(reactor, event, &e).await;
        }
    }

    async fn dead_letter(&self, reactor: &dyn Reactor, event: &StoredEvent, e: &LockerError) {
        error!(
            reactor = reactor.name(),
            event_id = %event.event_id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            version = event.aggregate_version,
            retryable = e.is_retryable(),
            error = %e,
            "Dead letter"
        );

        self.dead_letters.lock().await.push(DeadLetter {
            reactor: reactor.name().to_string(),
            event_id: event.event_id,
            aggregate_id: event.aggregate_id,
            aggregate_version: event.aggregate_version,
            event_type: event.event_type.clone(),
            error: e.to_string(),
            failed_at: Utc::now(),
        });
    }
}
