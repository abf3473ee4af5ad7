// Copyright (c) 2025 - Cowboy AI, Inc.
//! Topic rules per principal
//!
//! | Principal | Subscribe | Publish |
//! |---|---|---|
//! | service | `#` | `#` |
//! | provisioning | `device/register/+` | `device/provisioning/reply/+` |
//! | device | `device/%u/command` | `device/%u/response`, `device/%u/state` |
//! | anonymous | `device/provisioning/reply/%c` | `device/register/+` |

use serde::{Deserialize, Serialize};

use super::{matches, AccessClass, Permission};
use crate::config::PrincipalConfig;
use crate::domain::BankId;

/// Who is on the other end of a broker connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// The backend itself
    Service,
    /// Registration bridge
    Provisioning,
    /// A provisioned bank, logged in with its bank id
    Device(BankId),
    /// A bank that has not been provisioned yet
    Anonymous,
}

impl Principal {
    pub fn kind(&self) -> &'static str {
        match self {
            Principal::Service => "service",
            Principal::Provisioning => "provisioning",
            Principal::Device(_) => "device",
            Principal::Anonymous => "anonymous",
        }
    }
}

/// One topic pattern and the permission it grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
    pub pattern: String,
    pub permission: Permission,
}

impl AclRule {
    pub fn publish(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            permission: Permission::Publish,
        }
    }

    pub fn subscribe(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            permission: Permission::Subscribe,
        }
    }
}

/// Rule sets for every principal
#[derive(Debug, Clone)]
pub struct AclPolicy {
    service_username: String,
    provisioning_username: String,
    service: Vec<AclRule>,
    provisioning: Vec<AclRule>,
    device: Vec<AclRule>,
    anonymous: Vec<AclRule>,
}

impl AclPolicy {
    pub fn from_config(config: &PrincipalConfig) -> Self {
        Self {
            service_username: config.service_username.clone(),
            provisioning_username: config.provisioning_username.clone(),
            service: vec![AclRule::subscribe("#"), AclRule::publish("#")],
            provisioning: vec![
                AclRule::subscribe("device/register/+"),
                AclRule::publish("device/provisioning/reply/+"),
            ],
            device: vec![
                AclRule::subscribe("device/%u/command"),
                AclRule::publish("device/%u/response"),
                AclRule::publish("device/%u/state"),
            ],
            anonymous: vec![
                AclRule::publish("device/register/+"),
                AclRule::subscribe("device/provisioning/reply/%c"),
            ],
        }
    }

    /// Classify a broker username; `None` for names no rule set covers
    pub fn principal(&self, username: &str) -> Option<Principal> {
        if username.is_empty() {
            Some(Principal::Anonymous)
        } else if username == self.service_username {
            Some(Principal::Service)
        } else if username == self.provisioning_username {
            Some(Principal::Provisioning)
        } else {
            username.parse().ok().map(Principal::Device)
        }
    }

    pub fn rules_for(&self, principal: &Principal) -> &[AclRule] {
        match principal {
            Principal::Service => &self.service,
            Principal::Provisioning => &self.provisioning,
            Principal::Device(_) => &self.device,
            Principal::Anonymous => &self.anonymous,
        }
    }

    /// Whether any rule of the principal grants `permission` on `topic`
    pub fn allows(
        &self,
        principal: &Principal,
        username: &str,
        client_id: &str,
        topic: &str,
        permission: Permission,
    ) -> bool {
        self.rules_for(principal).iter().any(|rule| {
            rule.permission == permission && matches(&rule.pattern, topic, username, client_id)
        })
    }

    /// Whether every permission the access class requires is granted
    pub fn check(
        &self,
        principal: &Principal,
        username: &str,
        client_id: &str,
        topic: &str,
        access: AccessClass,
    ) -> bool {
        access
            .required()
            .iter()
            .all(|permission| self.allows(principal, username, client_id, topic, *permission))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn policy() -> AclPolicy {
        AclPolicy::from_config(&PrincipalConfig::default())
    }

    #[test]
    fn test_principal_classification() {
        let policy = policy();
        let bank_id = BankId::new();

        assert_eq!(policy.principal(""), Some(Principal::Anonymous));
        assert_eq!(policy.principal("locker-service"), Some(Principal::Service));
        assert_eq!(
            policy.principal("locker-provisioning"),
            Some(Principal::Provisioning)
        );
        assert_eq!(
            policy.principal(&bank_id.to_string()),
            Some(Principal::Device(bank_id))
        );
        assert_eq!(policy.principal("mallory"), None);
    }

    #[test_case("device/{me}/command", Permission::Subscribe => true; "own command")]
    #[test_case("device/{me}/command", Permission::Publish => false; "cannot forge commands")]
    #[test_case("device/{me}/response", Permission::Publish => true; "own response")]
    #[test_case("device/{me}/state", Permission::Publish => true; "own state")]
    #[test_case("device/{other}/command", Permission::Subscribe => false; "other bank command")]
    #[test_case("device/{other}/response", Permission::Publish => false; "other bank response")]
    #[test_case("device/+/command", Permission::Subscribe => false; "wildcard subscription")]
    #[test_case("device/#", Permission::Subscribe => false; "multi level subscription")]
    #[test_case("device/register/tok", Permission::Publish => false; "registered bank re-registers")]
    fn test_device_rules(template: &str, permission: Permission) -> bool {
        let policy = policy();
        let me = BankId::new();
        let other = BankId::new();
        let topic = template
            .replace("{me}", &me.to_string())
            .replace("{other}", &other.to_string());

        policy.allows(
            &Principal::Device(me),
            &me.to_string(),
            "client-1",
            &topic,
            permission,
        )
    }

    #[test]
    fn test_anonymous_rules() {
        let policy = policy();
        let anon = Principal::Anonymous;

        assert!(policy.allows(&anon, "", "c1", "device/register/tok", Permission::Publish));
        assert!(policy.allows(
            &anon,
            "",
            "c1",
            "device/provisioning/reply/c1",
            Permission::Subscribe
        ));
        assert!(!policy.allows(
            &anon,
            "",
            "c1",
            "device/provisioning/reply/c2",
            Permission::Subscribe
        ));
        assert!(!policy.allows(
            &anon,
            "",
            "#",
            "device/provisioning/reply/#",
            Permission::Subscribe
        ));
        assert!(!policy.allows(&anon, "", "c1", "device/register/tok", Permission::Subscribe));
    }

    #[test]
    fn test_provisioning_rules() {
        let policy = policy();
        let p = Principal::Provisioning;
        let name = "locker-provisioning";

        assert!(policy.allows(&p, name, "", "device/register/+", Permission::Subscribe));
        assert!(policy.allows(
            &p,
            name,
            "",
            "device/provisioning/reply/c9",
            Permission::Publish
        ));
        assert!(!policy.allows(
            &p,
            name,
            "",
            &format!("device/{}/command", BankId::new()),
            Permission::Publish
        ));
    }

    #[test]
    fn test_service_reaches_everything() {
        let policy = policy();
        let topic = format!("device/{}/command", BankId::new());
        assert!(policy.check(
            &Principal::Service,
            "locker-service",
            "",
            &topic,
            AccessClass::ReadWrite
        ));
        assert!(policy.check(&Principal::Service, "locker-service", "", "#", AccessClass::Subscribe));
    }

    #[test]
    fn test_read_write_needs_both() {
        let policy = policy();
        let me = BankId::new();
        let topic = format!("device/{}/command", me);

        assert!(policy.check(
            &Principal::Device(me),
            &me.to_string(),
            "",
            &topic,
            AccessClass::Read
        ));
        assert!(!policy.check(
            &Principal::Device(me),
            &me.to_string(),
            "",
            &topic,
            AccessClass::ReadWrite
        ));
    }
}
