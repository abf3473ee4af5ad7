// Copyright (c) 2025 - Cowboy AI, Inc.
//! Device Gateway
//!
//! Entry point for everything devices publish:
//!
//! | Topic | Handling |
//! |---|---|
//! | `device/register/{token}` | provisioning decision |
//! | `device/{bank}/response` | inbox dedup, then `CommandResponseReceived` |
//! | `device/{bank}/state` | heartbeat, connection edges |
//!
//! Payloads are parsed before anything is recorded; a parse failure is a
//! `Validation` error and the message goes no further.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::provisioning::ProvisioningService;
use crate::aggregate::{handle_record_command_response, CommandError, RecordCommandResponseCommand};
use crate::domain::BankId;
use crate::errors::{LockerError, LockerResult};
use crate::event_store::EventStore;
use crate::events::event_types::COMMAND_RESPONSE_RECEIVED;
use crate::events::LockerBankEvent;
use crate::inbox::{CommandTransaction, Inbox};
use crate::monitor::ConnectionMonitor;
use crate::nats::{InboundMessage, MessageHandler};
use crate::read_model::HeartbeatOutcome;
use crate::repository::update_bank_unless_recorded;
use crate::topics::{self, filters, DeviceChannel, DeviceTopic};
use crate::wire::{self, CommandResponse, StateMessage};

/// What the gateway did with one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOutcome {
    /// Registration handled; carries the provisioning decision
    Registered(LockerBankEvent),
    /// First delivery of a command response, now in the bank's log
    Recorded,
    /// Redelivery of a response already in the log
    Duplicate,
    Heartbeat(HeartbeatOutcome),
    /// Well-formed but not for the backend to act on
    Dropped,
}

pub struct DeviceGateway {
    provisioning: Arc<dyn ProvisioningService>,
    monitor: Arc<ConnectionMonitor>,
    store: Arc<dyn EventStore>,
    inbox: Arc<dyn Inbox>,
}

impl DeviceGateway {
    pub fn new(
        provisioning: Arc<dyn ProvisioningService>,
        monitor: Arc<ConnectionMonitor>,
        store: Arc<dyn EventStore>,
        inbox: Arc<dyn Inbox>,
    ) -> Self {
        Self {
            provisioning,
            monitor,
            store,
            inbox,
        }
    }

    /// Route one message published on an MQTT `topic`
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn receive(&self, topic: &str, payload: &[u8]) -> LockerResult<GatewayOutcome> {
        let parsed = DeviceTopic::parse(topic)
            .ok_or_else(|| LockerError::Validation(format!("unroutable topic {:?}", topic)))?;

        match parsed {
            DeviceTopic::Register { token } => {
                let request = wire::parse_registration(payload)?;
                let decision = self.provisioning.provision(&token, &request.client_id).await?;
                Ok(GatewayOutcome::Registered(decision))
            }
            DeviceTopic::Bank {
                bank_id,
                channel: DeviceChannel::Response,
            } => {
                let response = wire::parse_command_response(payload)?;
                self.record_response(bank_id, topic, payload, response).await
            }
            DeviceTopic::Bank {
                bank_id,
                channel: DeviceChannel::State,
            } => match wire::parse_state_message(payload)? {
                StateMessage::Heartbeat(data) => {
                    // Liveness runs on the backend clock; the device clock is
                    // only reported.
                    debug!(%bank_id, device_timestamp = ?data.timestamp, "Heartbeat received");
                    let outcome = self.monitor.record_heartbeat(bank_id, Utc::now()).await?;
                    Ok(GatewayOutcome::Heartbeat(outcome))
                }
            },
            DeviceTopic::Bank {
                channel: DeviceChannel::Command,
                ..
            }
            | DeviceTopic::ProvisioningReply { .. } => {
                debug!(topic, "Ignoring backend-originated topic");
                Ok(GatewayOutcome::Dropped)
            }
        }
    }

    async fn record_response(
        &self,
        bank_id: BankId,
        topic: &str,
        payload: &[u8],
        response: CommandResponse,
    ) -> LockerResult<GatewayOutcome> {
        let now = Utc::now();
        let device = bank_id.to_string();
        let transaction = CommandTransaction::new(&device, &response, topic, payload, now);

        let first = self.inbox.record_if_first(transaction).await?;
        if !first
            && self
                .store
                .exists(
                    bank_id.as_uuid(),
                    COMMAND_RESPONSE_RECEIVED,
                    &response.transaction_id,
                )
                .await?
        {
            debug!(%bank_id, transaction_id = %response.transaction_id, "Duplicate response");
            return Ok(GatewayOutcome::Duplicate);
        }

        let command = RecordCommandResponseCommand {
            transaction_id: response.transaction_id.clone(),
            action: response.action.clone(),
            result: response.result,
            error_code: response.error_code.clone(),
            message: response.message.clone(),
            data: response.data.clone(),
            source_topic: topic.to_string(),
            timestamp: now,
        };

        let result = update_bank_unless_recorded(
            self.store.as_ref(),
            bank_id,
            &[COMMAND_RESPONSE_RECEIVED],
            &response.transaction_id,
            |state| {
                handle_record_command_response(state, command.clone())
                    .map(|e| vec![LockerBankEvent::CommandResponseReceived(e)])
            },
        )
        .await;

        match result {
            Ok(events) if events.is_empty() => Ok(GatewayOutcome::Duplicate),
            Ok(_) => {
                info!(
                    %bank_id,
                    transaction_id = %response.transaction_id,
                    action = %response.action,
                    result = %response.result,
                    "Command response recorded"
                );
                Ok(GatewayOutcome::Recorded)
            }
            Err(LockerError::Command(CommandError::NotInitialized)) => {
                warn!(
                    %bank_id,
                    transaction_id = %response.transaction_id,
                    "Response from unregistered bank"
                );
                Ok(GatewayOutcome::Dropped)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl MessageHandler for DeviceGateway {
    async fn handle(&self, message: InboundMessage) -> LockerResult<Option<Vec<u8>>> {
        let topic = topics::from_nats_subject(&message.subject);

        match self.receive(&topic, &message.payload).await {
            Ok(_) => Ok(None),
            Err(LockerError::Validation(reason)) => {
                warn!(%topic, %reason, "Dropping malformed device message");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn subjects(&self) -> Vec<String> {
        [filters::REGISTRATIONS, filters::RESPONSES, filters::STATES]
            .iter()
            .filter_map(|filter| topics::to_nats_subject(filter))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeartbeatConfig;
    use crate::domain::ProvisioningToken;
    use crate::event_store::InMemoryEventStore;
    use crate::inbox::InMemoryInbox;
    use crate::read_model::{BankRegistry, Projector};
    use crate::service::provisioning::{BankRegistration, EventSourcedProvisioningService};
    use bytes::Bytes;
    use serde_json::json;

    struct Harness {
        store: Arc<InMemoryEventStore>,
        registry: Arc<BankRegistry>,
        inbox: Arc<InMemoryInbox>,
        gateway: DeviceGateway,
        bank_id: BankId,
    }

    impl Harness {
        async fn sync(&self) {
            self.registry.reset().await.unwrap();
            for event in self.store.load_all().await.unwrap() {
                self.registry.project(&event).await.unwrap();
            }
        }

        async fn count(&self, event_type: &str) -> usize {
            self.store
                .load(self.bank_id.as_uuid())
                .await
                .unwrap()
                .iter()
                .filter(|e| e.event_type == event_type)
                .count()
        }
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryEventStore::new());
        let registry = Arc::new(BankRegistry::new());
        let inbox = Arc::new(InMemoryInbox::new());
        let provisioning = Arc::new(EventSourcedProvisioningService::new(
            store.clone(),
            registry.clone(),
            HeartbeatConfig::default(),
        ));
        let monitor = Arc::new(ConnectionMonitor::new(store.clone(), registry.clone()));
        let gateway = DeviceGateway::new(provisioning.clone(), monitor, store.clone(), inbox.clone());

        let bank_id = BankId::new();
        provisioning
            .register_bank(BankRegistration::new(
                bank_id,
                ProvisioningToken::new("tok-1").unwrap(),
            ))
            .await
            .unwrap();

        let harness = Harness {
            store,
            registry,
            inbox,
            gateway,
            bank_id,
        };
        harness.sync().await;
        harness
    }

    fn response(transaction_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "type": "command_response",
            "action": "open_compartment",
            "result": "success",
            "transaction_id": transaction_id,
            "timestamp": 1768824000,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_registration_is_provisioned() {
        let h = harness().await;
        let outcome = h
            .gateway
            .receive("device/register/tok-1", br#"{"client_id":"c-1"}"#)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            GatewayOutcome::Registered(LockerBankEvent::BankProvisioned(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_response_recorded_once() {
        let h = harness().await;
        let topic = topics::response(h.bank_id);
        let payload = response("tx-1");

        assert_eq!(
            h.gateway.receive(&topic, &payload).await.unwrap(),
            GatewayOutcome::Recorded
        );
        assert_eq!(
            h.gateway.receive(&topic, &payload).await.unwrap(),
            GatewayOutcome::Duplicate
        );

        assert_eq!(h.count(COMMAND_RESPONSE_RECEIVED).await, 1);
        let row = h
            .inbox
            .get(&h.bank_id.to_string(), "tx-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.deliveries, 2);
        assert_eq!(h.inbox.len().await, 1);
    }

    #[tokio::test]
    async fn test_interrupted_first_delivery_is_completed_by_redelivery() {
        let h = harness().await;
        let topic = topics::response(h.bank_id);
        let payload = response("tx-2");

        // Inbox row written, audit event never appended
        let parsed = wire::parse_command_response(&payload).unwrap();
        h.inbox
            .record_if_first(CommandTransaction::new(
                &h.bank_id.to_string(),
                &parsed,
                &topic,
                &payload,
                Utc::now(),
            ))
            .await
            .unwrap();

        assert_eq!(
            h.gateway.receive(&topic, &payload).await.unwrap(),
            GatewayOutcome::Recorded
        );
        assert_eq!(h.count(COMMAND_RESPONSE_RECEIVED).await, 1);
    }

    #[tokio::test]
    async fn test_heartbeat_brings_bank_online() {
        let h = harness().await;
        let payload = br#"{"event":"heartbeat","data":{"timestamp":1768824000}}"#;

        let outcome = h
            .gateway
            .receive(&topics::state(h.bank_id), payload)
            .await
            .unwrap();
        assert_eq!(outcome, GatewayOutcome::Heartbeat(HeartbeatOutcome::CameOnline));
    }

    #[tokio::test]
    async fn test_response_from_unregistered_bank_is_dropped() {
        let h = harness().await;
        let stranger = BankId::new();

        let outcome = h
            .gateway
            .receive(&topics::response(stranger), &response("tx-3"))
            .await
            .unwrap();
        assert_eq!(outcome, GatewayOutcome::Dropped);
        assert!(h.store.load(stranger.as_uuid()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_messages_never_reach_the_log() {
        let h = harness().await;
        let before = h.store.load_all().await.unwrap().len();

        let err = h
            .gateway
            .receive(&topics::response(h.bank_id), b"{not json")
            .await
            .unwrap_err();
        assert!(matches!(err, LockerError::Validation(_)));

        let subject = topics::to_nats_subject(&topics::state(h.bank_id)).unwrap();
        let reply = h
            .gateway
            .handle(InboundMessage {
                subject,
                payload: Bytes::from_static(br#"{"event":"reboot"}"#),
            })
            .await
            .unwrap();
        assert_eq!(reply, None);

        assert_eq!(h.store.load_all().await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_subjects_cover_inbound_topics() {
        let h = harness().await;
        assert_eq!(
            h.gateway.subjects(),
            vec!["device.register.*", "device.*.response", "device.*.state"]
        );
    }
}
