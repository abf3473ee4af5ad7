// Copyright (c) 2025 - Cowboy AI, Inc.
//! Actors and access grants

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ids::{CompartmentId, UserId};

/// Role of the party requesting an open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// Operator with override rights on every compartment
    Admin,
    /// Regular user; needs an active grant
    User,
}

/// The authenticated party behind a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: ActorRole,
}

impl Actor {
    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: ActorRole::Admin,
        }
    }

    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            role: ActorRole::User,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }
}

/// Permission for a user to open one compartment
///
/// Active iff `revoked_at` is unset and `expires_at` is unset or in the future.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub grant_id: Uuid,
    pub user_id: UserId,
    pub compartment_id: CompartmentId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl AccessGrant {
    pub fn new(
        user_id: UserId,
        compartment_id: CompartmentId,
        granted_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            grant_id: Uuid::now_v7(),
            user_id,
            compartment_id,
            granted_at,
            expires_at,
            revoked_at: None,
        }
    }

    /// Whether the grant authorizes opening at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.map_or(true, |expires| expires > now)
    }
}
