// Copyright (c) 2025 - Cowboy AI, Inc.
//! Transport credential store
//!
//! Issuance and verification of device credentials live behind
//! [`CredentialStore`]; the production store is an external collaborator.
//! A provisioned bank logs in with its bank id as username.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::BankId;
use crate::errors::LockerResult;
use crate::wire::Credentials;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Issue (or rotate) credentials for a bank
    ///
    /// Failures surface as `SideEffectFailure` so the caller can record and
    /// retry them.
    async fn issue(&self, bank_id: BankId) -> LockerResult<Credentials>;

    /// Whether `password` is the current password of `username`
    async fn verify(&self, username: &str, password: &str) -> LockerResult<bool>;
}

/// Credentials held in process memory, passwords kept as SHA-256 digests
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    digests: RwLock<HashMap<String, [u8; 32]>>,
    issued: AtomicUsize,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of banks holding credentials
    pub async fn len(&self) -> usize {
        self.digests.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.digests.read().await.is_empty()
    }

    /// Number of `issue` calls, rotations included
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

fn digest(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn issue(&self, bank_id: BankId) -> LockerResult<Credentials> {
        let credentials = Credentials {
            credential_user: bank_id.to_string(),
            credential_password: Uuid::new_v4().simple().to_string(),
        };

        self.digests.write().await.insert(
            credentials.credential_user.clone(),
            digest(&credentials.credential_password),
        );
        self.issued.fetch_add(1, Ordering::SeqCst);

        Ok(credentials)
    }

    async fn verify(&self, username: &str, password: &str) -> LockerResult<bool> {
        let digests = self.digests.read().await;
        Ok(match digests.get(username) {
            Some(stored) => stored[..].ct_eq(&digest(password)[..]).into(),
            None => false,
        })
    }
}
