// Copyright (c) 2025 - Cowboy AI, Inc.
//! Test Fixtures for locker-control
//!
//! Deterministic ids and timestamps, and an in-memory backend wired the way
//! the binary wires the NATS-backed one.
//!
//! # Design Principles
//! - Ids and clocks that tests compare against are fixed constants
//! - Side effects land in in-memory collaborators the test can inspect
//! - `settle()` reads the log forward from the pool's position so every
//!   reactor and projector has seen every event before the test asserts
//! - `restart()` rewires the pool and gateway over the same log the way a
//!   process restart would, recovering whatever was left unfinished

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use locker_control::access::InMemoryAccessGrantStore;
use locker_control::config::{HeartbeatConfig, WorkerConfig};
use locker_control::credentials::InMemoryCredentialStore;
use locker_control::domain::{BankId, Compartment, CompartmentId, ProvisioningToken, UserId};
use locker_control::event_store::{EventStore, InMemoryEventStore};
use locker_control::inbox::InMemoryInbox;
use locker_control::monitor::ConnectionMonitor;
use locker_control::nats::InMemoryTransport;
use locker_control::reactor::{
    OpenCommandDispatcher, ProvisioningReplyReactor, ResponseDerivationReactor, WorkerPool,
};
use locker_control::read_model::{BankRegistry, CompartmentView, OpenRequestView, Projector};
use locker_control::service::{
    BankRegistration, DeviceGateway, EventSourcedCompartmentOpenService,
    EventSourcedProvisioningService, ProvisioningService,
};

pub const BANK_ID_1: &str = "01934f4a-b001-7000-8000-00000000b001";
pub const COMPARTMENT_ID_1: &str = "01934f4a-c001-7000-8000-00000000c001";
pub const USER_ID_1: &str = "01934f4a-d001-7000-8000-00000000d001";

pub const PROVISIONING_TOKEN_1: &str = "tok-01934f4a";
pub const CLIENT_ID_1: &str = "bank-client-1";

// Fixed test timestamp (2026-01-19T12:00:00Z)
pub const FIXED_TIMESTAMP: &str = "2026-01-19T12:00:00Z";

pub fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).expect("Invalid UUID in test fixture")
}

pub fn fixed_timestamp() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(FIXED_TIMESTAMP)
        .expect("Invalid timestamp in test fixture")
        .with_timezone(&Utc)
}

pub fn bank_id() -> BankId {
    BankId::from_uuid(parse_uuid(BANK_ID_1))
}

pub fn user_id() -> UserId {
    UserId::from_uuid(parse_uuid(USER_ID_1))
}

pub fn compartment() -> Compartment {
    Compartment::new(CompartmentId::from_uuid(parse_uuid(COMPARTMENT_ID_1)), bank_id(), 4)
}

/// In-memory backend with every reactor and projector on one pool
pub struct Backend {
    pub store: Arc<InMemoryEventStore>,
    pub transport: Arc<InMemoryTransport>,
    pub credentials: Arc<InMemoryCredentialStore>,
    pub inbox: Arc<InMemoryInbox>,
    pub grants: Arc<InMemoryAccessGrantStore>,
    pub registry: Arc<BankRegistry>,
    pub open_requests: Arc<OpenRequestView>,
    pub compartments: Arc<CompartmentView>,
    pub pool: Arc<WorkerPool>,
    pub monitor: Arc<ConnectionMonitor>,
    pub provisioning: Arc<EventSourcedProvisioningService>,
    pub opens: EventSourcedCompartmentOpenService,
    pub gateway: DeviceGateway,
    position: u64,
}

impl Backend {
    pub fn new() -> Self {
        Self::with_store(InMemoryEventStore::new())
    }

    /// Backend over a store whose wake-up channel buffers `capacity` appends
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_store(InMemoryEventStore::with_capacity(capacity))
    }

    fn with_store(store: InMemoryEventStore) -> Self {
        let store = Arc::new(store);
        let transport = Arc::new(InMemoryTransport::new());
        let credentials = Arc::new(InMemoryCredentialStore::new());
        let inbox = Arc::new(InMemoryInbox::new());
        let grants = Arc::new(InMemoryAccessGrantStore::new());
        let registry = Arc::new(BankRegistry::new());
        let open_requests = Arc::new(OpenRequestView::new());
        let compartments = Arc::new(CompartmentView::new());

        let pool = Self::pool(
            &store,
            &transport,
            &credentials,
            &inbox,
            [registry.clone(), open_requests.clone(), compartments.clone()],
        );

        let monitor = Arc::new(ConnectionMonitor::new(store.clone(), registry.clone()));
        let provisioning = Arc::new(EventSourcedProvisioningService::new(
            store.clone(),
            registry.clone(),
            HeartbeatConfig::default(),
        ));
        let opens = EventSourcedCompartmentOpenService::new(
            store.clone(),
            grants.clone(),
            open_requests.clone(),
        );
        let gateway = DeviceGateway::new(
            provisioning.clone(),
            monitor.clone(),
            store.clone(),
            inbox.clone(),
        );

        Self {
            store,
            transport,
            credentials,
            inbox,
            grants,
            registry,
            open_requests,
            compartments,
            pool,
            monitor,
            provisioning,
            opens,
            gateway,
            position: 0,
        }
    }

    fn pool(
        store: &Arc<InMemoryEventStore>,
        transport: &Arc<InMemoryTransport>,
        credentials: &Arc<InMemoryCredentialStore>,
        inbox: &Arc<InMemoryInbox>,
        projectors: [Arc<dyn Projector>; 3],
    ) -> Arc<WorkerPool> {
        let mut pool = WorkerPool::new(store.clone(), WorkerConfig::default());
        for projector in projectors {
            pool = pool.with_projector(projector);
        }
        Arc::new(
            pool.with_reactor(Arc::new(ProvisioningReplyReactor::new(
                store.clone(),
                credentials.clone(),
                transport.clone(),
            )))
            .with_reactor(Arc::new(OpenCommandDispatcher::new(
                store.clone(),
                transport.clone(),
            )))
            .with_reactor(Arc::new(ResponseDerivationReactor::new(
                store.clone(),
                inbox.clone(),
            ))),
        )
    }

    /// Run every pending event through the pool
    pub async fn settle(&mut self) -> usize {
        self.pool
            .drain(&mut self.position)
            .await
            .expect("Failed to drain the event log")
    }

    /// Tail the log on a background task from where `settle()` stopped
    pub fn start(&self) -> JoinHandle<()> {
        self.pool.clone().start(self.position)
    }

    /// Rewire the pool and gateway over the same log and recover
    ///
    /// Events appended but never settled are handed to the new pool.
    pub async fn restart(&mut self) {
        let inbox = self.inbox.clone();
        self.restart_with(inbox).await;
    }

    /// Restart with an empty inbox, as after losing the inbox bucket
    pub async fn restart_with_fresh_inbox(&mut self) {
        self.restart_with(Arc::new(InMemoryInbox::new())).await;
    }

    async fn restart_with(&mut self, inbox: Arc<InMemoryInbox>) {
        self.pool = Self::pool(
            &self.store,
            &self.transport,
            &self.credentials,
            &inbox,
            [
                self.registry.clone(),
                self.open_requests.clone(),
                self.compartments.clone(),
            ],
        );
        self.gateway = DeviceGateway::new(
            self.provisioning.clone(),
            self.monitor.clone(),
            self.store.clone(),
            inbox.clone(),
        );
        self.inbox = inbox;
        self.position = self
            .pool
            .recover()
            .await
            .expect("Failed to recover from the event log");
    }

    /// Register the fixture bank with explicit heartbeat settings
    pub async fn register_bank(&mut self, interval: u32, timeout: u32) -> BankId {
        let bank_id = bank_id();
        let mut registration = BankRegistration::new(
            bank_id,
            ProvisioningToken::new(PROVISIONING_TOKEN_1).expect("Invalid token in test fixture"),
        );
        registration.heartbeat_interval_seconds = Some(interval);
        registration.heartbeat_timeout_seconds = Some(timeout);

        self.provisioning
            .register_bank(registration)
            .await
            .expect("Failed to register fixture bank");
        self.settle().await;
        bank_id
    }

    /// Events of `event_type` in an aggregate's log
    pub async fn count(&self, aggregate_id: Uuid, event_type: &str) -> usize {
        self.store
            .load(aggregate_id)
            .await
            .expect("Failed to load aggregate")
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}
