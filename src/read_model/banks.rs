// Copyright (c) 2025 - Cowboy AI, Inc.
//! Bank registry
//!
//! Holds one row per bank plus the provisioning-token index. Besides being
//! a projection it is the liveness table the heartbeat monitor updates
//! directly; those updates are conditional on the current connection status
//! so overlapping writers change a row at most once per edge.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::Projector;
use crate::domain::{BankId, ConnectionStatus};
use crate::errors::LockerResult;
use crate::event_store::StoredEvent;
use crate::events::LockerBankEvent;
use crate::state_machine::provisioning::ProvisioningStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankView {
    pub bank_id: BankId,
    pub provisioning_token: String,
    pub provisioning_status: ProvisioningStatus,
    pub client_id: Option<String>,
    pub heartbeat_interval_seconds: u32,
    pub heartbeat_timeout_seconds: Option<u32>,
    pub connection_status: ConnectionStatus,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_connection_change_at: Option<DateTime<Utc>>,
}

impl BankView {
    /// Whether the bank is past its heartbeat deadline at `now`
    ///
    /// Banks without a timeout or without any heartbeat are never overdue.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match (self.heartbeat_timeout_seconds, self.last_heartbeat_at) {
            (Some(timeout), Some(last)) => {
                self.connection_status != ConnectionStatus::Offline
                    && now - last >= Duration::seconds(i64::from(timeout))
            }
            _ => false,
        }
    }
}

/// Result of recording a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The bank is not registered
    UnknownBank,
    /// Timestamp refreshed, status unchanged
    Refreshed,
    /// The bank moved from unknown/offline to online
    CameOnline,
}

#[derive(Debug, Default)]
struct Registry {
    banks: HashMap<BankId, BankView>,
    tokens: HashMap<String, BankId>,
}

#[derive(Debug, Default)]
pub struct BankRegistry {
    inner: RwLock<Registry>,
}

impl BankRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, bank_id: BankId) -> Option<BankView> {
        self.inner.read().await.banks.get(&bank_id).cloned()
    }

    /// Resolve a registration token to its bank
    pub async fn find_by_token(&self, token: &str) -> Option<BankId> {
        self.inner.read().await.tokens.get(token).copied()
    }

    /// Reserve `token` for `bank_id` ahead of its registration event
    ///
    /// Returns the owning bank when the token already belongs to another one.
    pub async fn claim_token(&self, token: &str, bank_id: BankId) -> Result<(), BankId> {
        let mut registry = self.inner.write().await;
        match registry.tokens.get(token) {
            Some(owner) if *owner != bank_id => Err(*owner),
            _ => {
                registry.tokens.insert(token.to_string(), bank_id);
                Ok(())
            }
        }
    }

    /// Drop a claim whose registration was never recorded
    pub async fn release_token(&self, token: &str, bank_id: BankId) {
        let mut registry = self.inner.write().await;
        if registry.tokens.get(token) == Some(&bank_id) {
            registry.tokens.remove(token);
        }
    }

    pub async fn all(&self) -> Vec<BankView> {
        let mut banks: Vec<_> = self.inner.read().await.banks.values().cloned().collect();
        banks.sort_by_key(|b| b.bank_id);
        banks
    }

    /// Banks a sweep at `now` would take offline
    pub async fn overdue(&self, now: DateTime<Utc>) -> Vec<BankId> {
        let mut overdue: Vec<_> = self
            .inner
            .read()
            .await
            .banks
            .values()
            .filter(|b| b.is_overdue(now))
            .map(|b| b.bank_id)
            .collect();
        overdue.sort();
        overdue
    }

    /// Refresh `last_heartbeat_at`; set online where status is not online
    pub async fn record_heartbeat(&self, bank_id: BankId, at: DateTime<Utc>) -> HeartbeatOutcome {
        let mut registry = self.inner.write().await;
        let bank = match registry.banks.get_mut(&bank_id) {
            Some(bank) => bank,
            None => return HeartbeatOutcome::UnknownBank,
        };

        bank.last_heartbeat_at = Some(bank.last_heartbeat_at.map_or(at, |last| last.max(at)));

        if bank.connection_status == ConnectionStatus::Online {
            HeartbeatOutcome::Refreshed
        } else {
            bank.connection_status = ConnectionStatus::Online;
            bank.last_connection_change_at = Some(at);
            HeartbeatOutcome::CameOnline
        }
    }

    /// Set offline where the bank is still overdue and not offline
    ///
    /// Returns whether this call changed the row.
    pub async fn mark_offline(&self, bank_id: BankId, now: DateTime<Utc>) -> bool {
        let mut registry = self.inner.write().await;
        match registry.banks.get_mut(&bank_id) {
            Some(bank) if bank.is_overdue(now) => {
                bank.connection_status = ConnectionStatus::Offline;
                bank.last_connection_change_at = Some(now);
                true
            }
            _ => false,
        }
    }

    fn apply(registry: &mut Registry, event: &LockerBankEvent) {
        use LockerBankEvent::*;

        if let BankRegistered(e) = event {
            registry
                .tokens
                .insert(e.provisioning_token.to_string(), e.bank_id);
            registry.banks.entry(e.bank_id).or_insert_with(|| BankView {
                bank_id: e.bank_id,
                provisioning_token: e.provisioning_token.to_string(),
                provisioning_status: ProvisioningStatus::Unprovisioned,
                client_id: None,
                heartbeat_interval_seconds: e.heartbeat_interval_seconds,
                heartbeat_timeout_seconds: e.heartbeat_timeout_seconds,
                connection_status: ConnectionStatus::Unknown,
                last_heartbeat_at: None,
                last_connection_change_at: None,
            });
            return;
        }

        let bank = match registry.banks.get_mut(&event.bank_id()) {
            Some(bank) => bank,
            None => return,
        };

        match event {
            BankProvisioned(e) => {
                bank.provisioning_status = ProvisioningStatus::Provisioned;
                bank.client_id = Some(e.client_id.clone());
            }
            ProvisioningReplySent(_) => {
                bank.provisioning_status = ProvisioningStatus::Provisioned;
            }
            ProvisioningReplyFailed(_) => {
                bank.provisioning_status = ProvisioningStatus::ProvisioningFailed;
            }
            ConnectionEstablished(e) => {
                // The online edge carries the heartbeat that caused it, so a
                // replayed registry can still time the bank out
                bank.last_heartbeat_at = Some(
                    bank.last_heartbeat_at
                        .map_or(e.timestamp, |last| last.max(e.timestamp)),
                );
                apply_connection(bank, ConnectionStatus::Online, e.timestamp);
            }
            ConnectionLost(e) => {
                apply_connection(bank, ConnectionStatus::Offline, e.timestamp);
            }
            _ => {}
        }
    }
}

/// Connection edges older than the row's last change are stale
fn apply_connection(bank: &mut BankView, status: ConnectionStatus, at: DateTime<Utc>) {
    if bank.last_connection_change_at.map_or(true, |last| at >= last) {
        bank.connection_status = status;
        bank.last_connection_change_at = Some(at);
    }
}

#[async_trait]
impl Projector for BankRegistry {
    async fn project(&self, event: &StoredEvent) -> LockerResult<()> {
        if let Some(event) = event.payload.as_locker_bank() {
            let mut registry = self.inner.write().await;
            Self::apply(&mut registry, event);
        }
        Ok(())
    }

    async fn reset(&self) -> LockerResult<()> {
        *self.inner.write().await = Registry::default();
        Ok(())
    }

    fn name(&self) -> &str {
        "bank_registry"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProvisioningToken;
    use crate::events::{BankRegistered, ConnectionEstablished, ConnectionLost, DomainEvent};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::seconds(secs)
    }

    async fn registry_with_bank(timeout: Option<u32>) -> (BankRegistry, BankId) {
        let registry = BankRegistry::new();
        let bank_id = BankId::new();
        let event = DomainEvent::from(LockerBankEvent::BankRegistered(BankRegistered {
            bank_id,
            provisioning_token: ProvisioningToken::new("tok-1").unwrap(),
            heartbeat_interval_seconds: 10,
            heartbeat_timeout_seconds: timeout,
            timestamp: at(0),
        }));
        registry
            .project(&StoredEvent::new(bank_id.as_uuid(), 1, event))
            .await
            .unwrap();
        (registry, bank_id)
    }

    #[tokio::test]
    async fn test_token_index() {
        let (registry, bank_id) = registry_with_bank(Some(30)).await;
        assert_eq!(registry.find_by_token("tok-1").await, Some(bank_id));
        assert_eq!(registry.find_by_token("tok-2").await, None);
    }

    #[tokio::test]
    async fn test_token_claims() {
        let (registry, bank_id) = registry_with_bank(Some(30)).await;
        let other = BankId::new();

        assert_eq!(registry.claim_token("tok-1", other).await, Err(bank_id));
        assert_eq!(registry.claim_token("tok-1", bank_id).await, Ok(()));

        assert_eq!(registry.claim_token("tok-2", other).await, Ok(()));
        assert_eq!(registry.find_by_token("tok-2").await, Some(other));
        registry.release_token("tok-2", bank_id).await;
        assert_eq!(registry.find_by_token("tok-2").await, Some(other));
        registry.release_token("tok-2", other).await;
        assert_eq!(registry.find_by_token("tok-2").await, None);
    }

    #[tokio::test]
    async fn test_heartbeat_edges() {
        let (registry, bank_id) = registry_with_bank(Some(30)).await;

        assert_eq!(
            registry.record_heartbeat(bank_id, at(1)).await,
            HeartbeatOutcome::CameOnline
        );
        assert_eq!(
            registry.record_heartbeat(bank_id, at(2)).await,
            HeartbeatOutcome::Refreshed
        );
        assert_eq!(
            registry.record_heartbeat(BankId::new(), at(2)).await,
            HeartbeatOutcome::UnknownBank
        );
    }

    #[tokio::test]
    async fn test_mark_offline_changes_row_once() {
        let (registry, bank_id) = registry_with_bank(Some(30)).await;
        registry.record_heartbeat(bank_id, at(0)).await;

        assert!(registry.overdue(at(29)).await.is_empty());
        assert_eq!(registry.overdue(at(40)).await, vec![bank_id]);

        assert!(registry.mark_offline(bank_id, at(40)).await);
        assert!(!registry.mark_offline(bank_id, at(41)).await);
        assert!(registry.overdue(at(41)).await.is_empty());
    }

    #[tokio::test]
    async fn test_banks_without_heartbeat_or_timeout_are_not_swept() {
        let (registry, bank_id) = registry_with_bank(Some(30)).await;
        assert!(registry.overdue(at(1000)).await.is_empty());

        let (registry, other) = registry_with_bank(None).await;
        registry.record_heartbeat(other, at(0)).await;
        assert!(registry.overdue(at(1000)).await.is_empty());
        assert!(!registry.mark_offline(bank_id, at(1000)).await);
    }

    #[tokio::test]
    async fn test_stale_connection_event_is_ignored() {
        let (registry, bank_id) = registry_with_bank(Some(30)).await;
        registry.record_heartbeat(bank_id, at(100)).await;

        let stale = DomainEvent::from(LockerBankEvent::ConnectionLost(ConnectionLost {
            bank_id,
            reason: "timeout".into(),
            last_heartbeat_at: Some(at(0)),
            timestamp: at(50),
        }));
        registry
            .project(&StoredEvent::new(bank_id.as_uuid(), 2, stale))
            .await
            .unwrap();

        let view = registry.get(bank_id).await.unwrap();
        assert_eq!(view.connection_status, ConnectionStatus::Online);
    }

    #[tokio::test]
    async fn test_replayed_online_edge_seeds_heartbeat() {
        let (registry, bank_id) = registry_with_bank(Some(30)).await;
        let online = DomainEvent::from(LockerBankEvent::ConnectionEstablished(
            ConnectionEstablished {
                bank_id,
                timestamp: at(5),
            },
        ));
        registry
            .project(&StoredEvent::new(bank_id.as_uuid(), 2, online))
            .await
            .unwrap();

        let view = registry.get(bank_id).await.unwrap();
        assert_eq!(view.connection_status, ConnectionStatus::Online);
        assert_eq!(view.last_heartbeat_at, Some(at(5)));
        assert_eq!(registry.overdue(at(35)).await, vec![bank_id]);

        // A later live heartbeat is never moved back by an older edge
        registry.record_heartbeat(bank_id, at(60)).await;
        let replayed = DomainEvent::from(LockerBankEvent::ConnectionEstablished(
            ConnectionEstablished {
                bank_id,
                timestamp: at(5),
            },
        ));
        registry
            .project(&StoredEvent::new(bank_id.as_uuid(), 2, replayed))
            .await
            .unwrap();
        assert_eq!(
            registry.get(bank_id).await.unwrap().last_heartbeat_at,
            Some(at(60))
        );
    }
}
