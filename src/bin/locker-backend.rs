// Copyright (c) 2025 - Cowboy AI, Inc.
//! Locker Backend
//!
//! Runs the engine against a NATS server with JetStream enabled:
//! - event log on the `LOCKER_EVENTS` stream, its correlation keys in the
//!   `LOCKER_EVENT_KEYS` bucket, command inbox in the `LOCKER_INBOX` bucket
//! - device traffic on `device.register.*`, `device.*.response`,
//!   `device.*.state` (the MQTT gateway's view of the device topics)
//! - broker authorization hooks on `locker.auth.*`
//! - reactors and read models on the worker pool, which first replays the
//!   log to finish work an earlier run left behind
//! - the offline sweep on a timer
//!
//! Run with: cargo run --bin locker-backend
//!
//! Configuration is read from the environment; see `LockerConfig::from_env`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use locker_control::acl::WebhookAuthorizer;
use locker_control::credentials::{CredentialStore, InMemoryCredentialStore};
use locker_control::event_store::{EventStore, NatsEventStore};
use locker_control::inbox::{Inbox, NatsInbox};
use locker_control::jetstream::{InboxBucketConfig, JetStreamConfig};
use locker_control::monitor::ConnectionMonitor;
use locker_control::nats::{MessageProcessor, NatsClient, Transport};
use locker_control::reactor::{
    OpenCommandDispatcher, ProvisioningReplyReactor, ResponseDerivationReactor, WorkerPool,
};
use locker_control::read_model::{BankRegistry, CompartmentView, OpenRequestView};
use locker_control::service::{DeviceGateway, EventSourcedProvisioningService};
use locker_control::LockerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting locker backend");

    let config = LockerConfig::from_env().context("Failed to load configuration")?;
    info!("📋 Configuration loaded:");
    info!("  - NATS: {:?}", config.nats.servers);
    info!("  - Stream: {}", config.storage.stream_name);
    info!("  - Inbox bucket: {}", config.storage.inbox_bucket);
    info!("  - Key bucket: {}", config.storage.key_bucket);
    info!("  - Sweep interval: {:?}", config.heartbeat.sweep_interval);

    info!("🔌 Connecting to NATS");
    let client = NatsClient::new(&config.nats)
        .await
        .context("Failed to connect to NATS")?;
    info!("✅ Connected to NATS");

    info!("📡 Binding event store and inbox");
    let nats_store = NatsEventStore::new(
        client.inner().clone(),
        JetStreamConfig::from(&config.storage),
    )
    .await
    .context("Failed to bind event stream")?;
    let indexed = nats_store
        .reindex()
        .await
        .context("Failed to reindex correlation keys")?;
    info!("🔑 {} correlation key(s) indexed", indexed);
    let store: Arc<dyn EventStore> = Arc::new(nats_store);
    let inbox: Arc<dyn Inbox> = Arc::new(
        NatsInbox::new(
            client.inner().clone(),
            InboxBucketConfig::from(&config.storage),
        )
        .await
        .context("Failed to bind inbox bucket")?,
    );

    let transport: Arc<dyn Transport> = Arc::new(client.clone());
    let credentials: Arc<dyn CredentialStore> = Arc::new(InMemoryCredentialStore::new());

    let registry = Arc::new(BankRegistry::new());
    let open_requests = Arc::new(OpenRequestView::new());
    let compartments = Arc::new(CompartmentView::new());

    let pool = Arc::new(
        WorkerPool::new(store.clone(), config.workers.clone())
            .with_projector(registry.clone())
            .with_projector(open_requests.clone())
            .with_projector(compartments.clone())
            .with_reactor(Arc::new(ProvisioningReplyReactor::new(
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
    );

    let position = pool
        .recover()
        .await
        .context("Failed to recover from the event log")?;
    info!("✅ Read models rebuilt and pending work recovered up to {}", position);

    let worker = pool.clone().start(position);

    let monitor = Arc::new(ConnectionMonitor::new(store.clone(), registry.clone()));
    let sweeper = monitor.clone().spawn(config.heartbeat.sweep_interval);

    let provisioning = Arc::new(EventSourcedProvisioningService::new(
        store.clone(),
        registry.clone(),
        config.heartbeat.clone(),
    ));
    let gateway = Arc::new(DeviceGateway::new(
        provisioning,
        monitor,
        store.clone(),
        inbox,
    ));
    let authorizer = Arc::new(WebhookAuthorizer::new(
        config.principals.clone(),
        credentials,
    ));

    let processor = MessageProcessor::new(client);
    let mut tasks = processor
        .run_handler(gateway)
        .await
        .context("Failed to subscribe to device topics")?;
    tasks.extend(
        processor
            .run_handler(authorizer)
            .await
            .context("Failed to subscribe to authorization hooks")?,
    );
    info!("🎧 Listening on {} subscription(s)", tasks.len());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("🛑 Shutting down");

    for task in tasks {
        task.abort();
    }
    sweeper.abort();
    worker.abort();

    let dead_letters = pool.dead_letters().await;
    if !dead_letters.is_empty() {
        warn!(
            "⚠️  {} event(s) dead-lettered this run; redrive their aggregates after restart",
            dead_letters.len()
        );
    }

    info!("✅ Locker backend stopped");
    Ok(())
}
