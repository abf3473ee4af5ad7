// Copyright (c) 2025 - Cowboy AI, Inc.
//! Access grants
//!
//! A grant lets one user open one compartment until it expires or is
//! revoked. Granting is idempotent: while an active grant exists for the
//! pair, granting again returns it instead of adding a row.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::{AccessGrant, CompartmentId, UserId};
use crate::errors::LockerResult;

#[async_trait]
pub trait AccessGrantStore: Send + Sync {
    /// Grant access, or return the grant that is already active at `now`
    async fn grant(
        &self,
        user_id: UserId,
        compartment_id: CompartmentId,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> LockerResult<AccessGrant>;

    /// Revoke every active grant for the pair; returns how many were revoked
    async fn revoke(
        &self,
        user_id: UserId,
        compartment_id: CompartmentId,
        at: DateTime<Utc>,
    ) -> LockerResult<usize>;

    async fn has_active(
        &self,
        user_id: UserId,
        compartment_id: CompartmentId,
        now: DateTime<Utc>,
    ) -> LockerResult<bool>;

    /// Every grant ever issued for the pair, oldest first
    async fn grants(
        &self,
        user_id: UserId,
        compartment_id: CompartmentId,
    ) -> LockerResult<Vec<AccessGrant>>;
}

#[derive(Debug, Default)]
pub struct InMemoryAccessGrantStore {
    grants: RwLock<HashMap<(UserId, CompartmentId), Vec<AccessGrant>>>,
}

impl InMemoryAccessGrantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccessGrantStore for InMemoryAccessGrantStore {
    async fn grant(
        &self,
        user_id: UserId,
        compartment_id: CompartmentId,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> LockerResult<AccessGrant> {
        let mut grants = self.grants.write().await;
        let rows = grants.entry((user_id, compartment_id)).or_default();

        if let Some(active) = rows.iter().find(|g| g.is_active(now)) {
            return Ok(active.clone());
        }

        let grant = AccessGrant::new(user_id, compartment_id, now, expires_at);
        rows.push(grant.clone());

        info!(
            user_id = %user_id,
            compartment_id = %compartment_id,
            grant_id = %grant.grant_id,
            "Access granted"
        );
        Ok(grant)
    }

    async fn revoke(
        &self,
        user_id: UserId,
        compartment_id: CompartmentId,
        at: DateTime<Utc>,
    ) -> LockerResult<usize> {
        let mut grants = self.grants.write().await;
        let revoked = grants
            .get_mut(&(user_id, compartment_id))
            .map(|rows| {
                rows.iter_mut()
                    .filter(|g| g.is_active(at))
                    .map(|g| g.revoked_at = Some(at))
                    .count()
            })
            .unwrap_or(0);

        if revoked > 0 {
            info!(user_id = %user_id, compartment_id = %compartment_id, revoked, "Access revoked");
        }
        Ok(revoked)
    }

    async fn has_active(
        &self,
        user_id: UserId,
        compartment_id: CompartmentId,
        now: DateTime<Utc>,
    ) -> LockerResult<bool> {
        Ok(self
            .grants
            .read()
            .await
            .get(&(user_id, compartment_id))
            .map_or(false, |rows| rows.iter().any(|g| g.is_active(now))))
    }

    async fn grants(
        &self,
        user_id: UserId,
        compartment_id: CompartmentId,
    ) -> LockerResult<Vec<AccessGrant>> {
        Ok(self
            .grants
            .read()
            .await
            .get(&(user_id, compartment_id))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_double_grant_keeps_one_row() {
        let store = InMemoryAccessGrantStore::new();
        let (user, compartment) = (UserId::new(), CompartmentId::new());

        let first = store.grant(user, compartment, None, now()).await.unwrap();
        let second = store
            .grant(user, compartment, None, now() + Duration::minutes(1))
            .await
            .unwrap();

        assert_eq!(first.grant_id, second.grant_id);
        assert_eq!(store.grants(user, compartment).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_then_regrant() {
        let store = InMemoryAccessGrantStore::new();
        let (user, compartment) = (UserId::new(), CompartmentId::new());

        store.grant(user, compartment, None, now()).await.unwrap();
        assert_eq!(store.revoke(user, compartment, now()).await.unwrap(), 1);
        assert!(!store.has_active(user, compartment, now()).await.unwrap());
        assert_eq!(store.revoke(user, compartment, now()).await.unwrap(), 0);

        store.grant(user, compartment, None, now()).await.unwrap();
        assert!(store.has_active(user, compartment, now()).await.unwrap());
        assert_eq!(store.grants(user, compartment).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_grant_is_inactive() {
        let store = InMemoryAccessGrantStore::new();
        let (user, compartment) = (UserId::new(), CompartmentId::new());

        store
            .grant(user, compartment, Some(now() + Duration::hours(1)), now())
            .await
            .unwrap();

        assert!(store.has_active(user, compartment, now()).await.unwrap());
        assert!(!store
            .has_active(user, compartment, now() + Duration::hours(1))
            .await
            .unwrap());
        assert!(!store
            .has_active(UserId::new(), compartment, now())
            .await
            .unwrap());
    }
}
