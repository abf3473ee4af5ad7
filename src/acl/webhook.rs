// Copyright (c) 2025 - Cowboy AI, Inc.
//! Broker authorization webhooks
//!
//! Two broker integration styles are served from one [`AclPolicy`]:
//!
//! - Style A, inline checks: [`AuthRequest`] and [`AclRequest`], both
//!   answered with [`AllowResponse`]
//! - Style B, lifecycle hooks: `auth_on_register`, `auth_on_subscribe` and
//!   `auth_on_publish`, answered with [`HookResponse`]
//!
//! `ok: false` in a Style A answer means the check itself failed (the
//! credential store was unreachable), not that access was refused.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;
use tracing::{debug, error, warn};

use super::{AccessClass, AclPolicy, Permission, Principal};
use crate::config::PrincipalConfig;
use crate::credentials::CredentialStore;
use crate::errors::{LockerError, LockerResult};
use crate::nats::{InboundMessage, MessageHandler};

/// QoS value that tells the broker to refuse one subscription
pub const SUBSCRIPTION_REFUSED: u8 = 0x80;

/// NATS request subjects the hooks are served on
pub mod subjects {
    pub const AUTHENTICATE: &str = "locker.auth.authenticate";
    pub const CHECK_ACL: &str = "locker.auth.acl";
    pub const ON_REGISTER: &str = "locker.auth.on_register";
    pub const ON_SUBSCRIBE: &str = "locker.auth.on_subscribe";
    pub const ON_PUBLISH: &str = "locker.auth.on_publish";

    /// Every hook subject
    pub const ALL: &str = "locker.auth.*";
}

/// Which hook a request is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Authenticate,
    CheckAcl,
    OnRegister,
    OnSubscribe,
    OnPublish,
}

impl Hook {
    pub fn subject(&self) -> &'static str {
        match self {
            Hook::Authenticate => subjects::AUTHENTICATE,
            Hook::CheckAcl => subjects::CHECK_ACL,
            Hook::OnRegister => subjects::ON_REGISTER,
            Hook::OnSubscribe => subjects::ON_SUBSCRIBE,
            Hook::OnPublish => subjects::ON_PUBLISH,
        }
    }

    pub fn from_subject(subject: &str) -> Option<Self> {
        match subject {
            subjects::AUTHENTICATE => Some(Hook::Authenticate),
            subjects::CHECK_ACL => Some(Hook::CheckAcl),
            subjects::ON_REGISTER => Some(Hook::OnRegister),
            subjects::ON_SUBSCRIBE => Some(Hook::OnSubscribe),
            subjects::ON_PUBLISH => Some(Hook::OnPublish),
            _ => None,
        }
    }
}

// ============================================================================
// Style A
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub clientid: String,
    pub topic: String,
    pub acc: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowResponse {
    pub allow: bool,
    pub ok: bool,
}

impl AllowResponse {
    pub fn allow() -> Self {
        Self { allow: true, ok: true }
    }

    pub fn deny() -> Self {
        Self {
            allow: false,
            ok: true,
        }
    }

    pub fn failed() -> Self {
        Self {
            allow: false,
            ok: false,
        }
    }
}

// ============================================================================
// Style B
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnRegisterRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSubscription {
    pub topic: String,
    pub qos: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnSubscribeRequest {
    #[serde(default)]
    pub username: Option<String>,
    pub client_id: String,
    pub topics: Vec<TopicSubscription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnPublishRequest {
    #[serde(default)]
    pub username: Option<String>,
    pub client_id: String,
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookResult {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookResponse {
    pub result: HookResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifiers: Option<Value>,
}

impl HookResponse {
    pub fn ok() -> Self {
        Self {
            result: HookResult::Ok,
            modifiers: None,
        }
    }

    pub fn error() -> Self {
        Self {
            result: HookResult::Error,
            modifiers: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result == HookResult::Ok
    }
}

// ============================================================================
// Authorizer
// ============================================================================

/// Answers broker hooks from the principal policy and the credential store
pub struct WebhookAuthorizer {
    policy: AclPolicy,
    principals: PrincipalConfig,
    credentials: Arc<dyn CredentialStore>,
}

impl WebhookAuthorizer {
    pub fn new(principals: PrincipalConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            policy: AclPolicy::from_config(&principals),
            principals,
            credentials,
        }
    }

    pub fn policy(&self) -> &AclPolicy {
        &self.policy
    }

    /// Verify a login and classify it
    ///
    /// `Ok(None)` is a refused login. Anonymous logins carry neither a
    /// username nor a password.
    pub async fn login(
        &self,
        username: &str,
        password: Option<&str>,
    ) -> LockerResult<Option<Principal>> {
        let principal = match self.policy.principal(username) {
            Some(principal) => principal,
            None => return Ok(None),
        };

        let verified = match (&principal, password) {
            (Principal::Anonymous, None) => true,
            (Principal::Anonymous, Some(p)) => p.is_empty(),
            (_, None) => false,
            (Principal::Service, Some(p)) => secret_matches(&self.principals.service_password, p),
            (Principal::Provisioning, Some(p)) => {
                secret_matches(&self.principals.provisioning_password, p)
            }
            (Principal::Device(_), Some(p)) => self.credentials.verify(username, p).await?,
        };

        Ok(verified.then_some(principal))
    }

    /// Style A login check
    pub async fn authenticate(&self, request: &AuthRequest) -> AllowResponse {
        match self
            .login(&request.username, request.password.as_deref())
            .await
        {
            Ok(Some(principal)) => {
                debug!(principal = principal.kind(), "Login accepted");
                AllowResponse::allow()
            }
            Ok(None) => {
                warn!(username = %request.username, "Login refused");
                AllowResponse::deny()
            }
            Err(e) => {
                error!(error = %e, "Login check failed");
                AllowResponse::failed()
            }
        }
    }

    /// Style A topic check
    pub fn check_acl(&self, request: &AclRequest) -> AllowResponse {
        let access = match AccessClass::try_from(request.acc) {
            Ok(access) => access,
            Err(e) => {
                warn!(error = %e, topic = %request.topic, "Refusing access check");
                return AllowResponse::deny();
            }
        };

        let allowed = self
            .policy
            .principal(&request.username)
            .map_or(false, |principal| {
                self.policy.check(
                    &principal,
                    &request.username,
                    &request.clientid,
                    &request.topic,
                    access,
                )
            });

        if allowed {
            AllowResponse::allow()
        } else {
            debug!(
                username = %request.username,
                topic = %request.topic,
                acc = request.acc,
                "Topic access refused"
            );
            AllowResponse::deny()
        }
    }

    /// Style B connect hook
    pub async fn auth_on_register(&self, request: &OnRegisterRequest) -> HookResponse {
        let username = request.username.as_deref().unwrap_or_default();
        match self.login(username, request.password.as_deref()).await {
            Ok(Some(_)) => HookResponse::ok(),
            Ok(None) => {
                warn!(username, client_id = %request.client_id, "Connect refused");
                HookResponse::error()
            }
            Err(e) => {
                error!(error = %e, "Connect check failed");
                HookResponse::error()
            }
        }
    }

    /// Style B subscribe hook
    ///
    /// Refused filters are returned as modifiers with
    /// [`SUBSCRIPTION_REFUSED`]; the request fails only if every filter is
    /// refused.
    pub fn auth_on_subscribe(&self, request: &OnSubscribeRequest) -> HookResponse {
        let username = request.username.as_deref().unwrap_or_default();
        let principal = match self.policy.principal(username) {
            Some(principal) => principal,
            None => return HookResponse::error(),
        };

        let decided: Vec<TopicSubscription> = request
            .topics
            .iter()
            .map(|subscription| {
                let allowed = self.policy.allows(
                    &principal,
                    username,
                    &request.client_id,
                    &subscription.topic,
                    Permission::Subscribe,
                );
                TopicSubscription {
                    topic: subscription.topic.clone(),
                    qos: if allowed {
                        subscription.qos
                    } else {
                        SUBSCRIPTION_REFUSED
                    },
                }
            })
            .collect();

        let refused = decided
            .iter()
            .filter(|s| s.qos == SUBSCRIPTION_REFUSED)
            .count();

        if refused == 0 {
            HookResponse::ok()
        } else if refused == decided.len() {
            debug!(username, client_id = %request.client_id, "Subscriptions refused");
            HookResponse::error()
        } else {
            HookResponse {
                result: HookResult::Ok,
                modifiers: Some(serde_json::json!({ "topics": decided })),
            }
        }
    }

    /// Style B publish hook
    pub fn auth_on_publish(&self, request: &OnPublishRequest) -> HookResponse {
        let username = request.username.as_deref().unwrap_or_default();
        let allowed = self.policy.principal(username).map_or(false, |principal| {
            self.policy.allows(
                &principal,
                username,
                &request.client_id,
                &request.topic,
                Permission::Publish,
            )
        });

        if allowed {
            HookResponse::ok()
        } else {
            debug!(username, topic = %request.topic, "Publish refused");
            HookResponse::error()
        }
    }

    /// Decode a hook request, answer it and encode the answer
    pub async fn answer(&self, hook: Hook, payload: &[u8]) -> LockerResult<Vec<u8>> {
        let body = match hook {
            Hook::Authenticate => serde_json::to_vec(&self.authenticate(&decode(payload)?).await)?,
            Hook::CheckAcl => serde_json::to_vec(&self.check_acl(&decode(payload)?))?,
            Hook::OnRegister => {
                serde_json::to_vec(&self.auth_on_register(&decode(payload)?).await)?
            }
            Hook::OnSubscribe => serde_json::to_vec(&self.auth_on_subscribe(&decode(payload)?))?,
            Hook::OnPublish => serde_json::to_vec(&self.auth_on_publish(&decode(payload)?))?,
        };
        Ok(body)
    }
}

#[async_trait]
impl MessageHandler for WebhookAuthorizer {
    async fn handle(&self, message: InboundMessage) -> LockerResult<Option<Vec<u8>>> {
        let hook = Hook::from_subject(&message.subject).ok_or_else(|| {
            LockerError::Validation(format!("no hook on {}", message.subject))
        })?;
        self.answer(hook, &message.payload)
            .await
            .map(Some)
    }

    fn subjects(&self) -> Vec<String> {
        vec![subjects::ALL.to_string()]
    }
}

fn decode<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> LockerResult<T> {
    serde_json::from_slice(payload).map_err(|e| LockerError::Validation(e.to_string()))
}

/// Constant-time comparison; an unset secret never matches
fn secret_matches(expected: &str, presented: &str) -> bool {
    !expected.is_empty() && bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
}
