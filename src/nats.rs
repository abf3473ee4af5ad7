// Copyright (c) 2025 - Cowboy AI, Inc.
//! NATS client abstraction for device messaging
//!
//! Devices reach the backend through the broker's MQTT gateway. The rest of
//! the crate speaks MQTT topics; this module maps them to NATS subjects on
//! the way out and hands raw subjects to handlers on the way in.

use async_nats::{Client, ConnectOptions, Subscriber};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::NatsConfig;
use crate::errors::{LockerError, LockerResult};
use crate::topics;

/// Outbound device messaging
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a JSON payload to an MQTT topic
    async fn publish(&self, topic: &str, payload: &Value) -> LockerResult<()>;
}

/// NATS client wrapper providing domain-specific operations
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Create a new NATS client with the given configuration
    pub async fn new(config: &NatsConfig) -> LockerResult<Self> {
        let connect_options = ConnectOptions::new()
            .name(&config.name)
            .connection_timeout(config.connect_timeout)
            .request_timeout(Some(config.request_timeout));

        let client = async_nats::connect_with_options(config.servers.join(","), connect_options)
            .await
            .map_err(|e| LockerError::Transport(e.to_string()))?;

        info!("Connected to NATS at {:?}", config.servers);

        Ok(Self { client })
    }

    /// Publish a message to a subject
    pub async fn publish<T>(&self, subject: &str, message: &T) -> LockerResult<()>
    where
        T: Serialize,
    {
        let payload = serde_json::to_vec(message)?;

        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| LockerError::Transport(e.to_string()))?;

        debug!("Published message to subject: {}", subject);
        Ok(())
    }

    /// Subscribe to a subject
    pub async fn subscribe(&self, subject: &str) -> LockerResult<Subscriber> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| LockerError::Transport(e.to_string()))?;

        info!("Subscribed to subject: {}", subject);
        Ok(subscriber)
    }

    /// Request-reply pattern
    pub async fn request<T, R>(&self, subject: &str, request: &T) -> LockerResult<R>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let payload = serde_json::to_vec(request)?;

        let response = self
            .client
            .request(subject.to_string(), payload.into())
            .await
            .map_err(|e| LockerError::Transport(e.to_string()))?;

        let result: R = serde_json::from_slice(&response.payload)?;

        Ok(result)
    }

    /// Get the underlying NATS client for advanced operations
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for NatsClient {
    async fn publish(&self, topic: &str, payload: &Value) -> LockerResult<()> {
        let subject = topics::to_nats_subject(topic).ok_or_else(|| {
            LockerError::Validation(format!("topic {:?} has no NATS subject", topic))
        })?;
        NatsClient::publish(self, &subject, payload)
            .await
            .map_err(|e| LockerError::SideEffectFailure(e.to_string()))
    }
}

/// A message as received from NATS
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// NATS subject the message arrived on
    pub subject: String,
    pub payload: Bytes,
}

/// Trait for handling messages from NATS
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a message; `Some(body)` is sent back when the sender expects a reply
    async fn handle(&self, message: InboundMessage) -> LockerResult<Option<Vec<u8>>>;

    /// Subjects this handler subscribes to
    fn subjects(&self) -> Vec<String>;
}

/// Message processor that runs handlers for subscriptions
pub struct MessageProcessor {
    client: NatsClient,
}

impl MessageProcessor {
    /// Create a new message processor
    pub fn new(client: NatsClient) -> Self {
        Self { client }
    }

    /// Start processing messages for a handler, one task per subject
    pub async fn run_handler<H>(&self, handler: Arc<H>) -> LockerResult<Vec<JoinHandle<()>>>
    where
        H: MessageHandler + ?Sized + 'static,
    {
        let mut tasks = Vec::new();

        for subject in handler.subjects() {
            let mut subscriber = self.client.subscribe(&subject).await?;
            let handler = handler.clone();
            let client = self.client.inner().clone();

            tasks.push(tokio::spawn(async move {
                while let Some(msg) = subscriber.next().await {
                    let reply = msg.reply.clone();
                    let inbound = InboundMessage {
                        subject: msg.subject.to_string(),
                        payload: msg.payload.clone(),
                    };

                    match handler.handle(inbound).await {
                        Ok(Some(body)) => {
                            if let Some(reply) = reply {
                                if let Err(e) = client.publish(reply, body.into()).await {
                                    error!("Failed to reply on {}: {}", subject, e);
                                }
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!("Handler error for subject {}: {}", subject, e);
                        }
                    }
                }
            }));
        }

        Ok(tasks)
    }
}

/// A message captured by [`InMemoryTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Value,
}

/// Transport that records publishes instead of sending them
///
/// Used by tests and local runs. Publishes fail while `fail_next` has
/// pending failures.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    published: Mutex<Vec<PublishedMessage>>,
    pending_failures: Mutex<usize>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` publishes fail
    pub async fn fail_next(&self, count: usize) {
        *self.pending_failures.lock().await = count;
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    /// Messages published to `topic`
    pub async fn published_to(&self, topic: &str) -> Vec<Value> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, topic: &str, payload: &Value) -> LockerResult<()> {
        {
            let mut pending = self.pending_failures.lock().await;
            if *pending > 0 {
                *pending -= 1;
                return Err(LockerError::SideEffectFailure(format!(
                    "publish to {} failed",
                    topic
                )));
            }
        }

        self.published.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}
