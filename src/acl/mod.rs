// Copyright (c) 2025 - Cowboy AI, Inc.
//! Topic access control
//!
//! # Matcher
//!
//! [`matches`] decides whether a concrete topic (or a subscription filter) is
//! covered by a rule pattern. Pattern segments, left to right:
//!
//! | Segment | Matches |
//! |---|---|
//! | literal | the identical topic segment |
//! | `+` | exactly one non-empty segment |
//! | `#` | the (possibly empty) remainder; only valid as the last segment |
//! | `%u` | a segment equal to the authenticated username |
//! | `%c` | a segment equal to the client id |
//!
//! Placeholders are compared by string equality and never expanded into the
//! pattern, so an identity of `#` or `+` is just a string that no real
//! topic segment equals. Identities containing topic metacharacters never
//! match at all.
//!
//! The matcher is pure and allocation-free; it is called inline on every
//! publish and subscribe check.
//!
//! # Module Organization
//!
//! - [`policy`] - rules per principal
//! - [`webhook`] - broker authorization contracts

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod policy;
pub mod webhook;

pub use policy::{AclPolicy, AclRule, Principal};
pub use webhook::WebhookAuthorizer;

pub const SINGLE_LEVEL: &str = "+";
pub const MULTI_LEVEL: &str = "#";
pub const USERNAME_PLACEHOLDER: &str = "%u";
pub const CLIENT_ID_PLACEHOLDER: &str = "%c";

/// Whether `pattern` covers `topic` for the given identity
pub fn matches(pattern: &str, topic: &str, username: &str, client_id: &str) -> bool {
    let mut pattern_segments = pattern.split('/');
    let mut topic_segments = topic.split('/');

    loop {
        match (pattern_segments.next(), topic_segments.next()) {
            (Some(MULTI_LEVEL), _) => return pattern_segments.next().is_none(),
            (Some(p), Some(t)) => {
                // A `#` filter is only covered by a `#` rule
                if t == MULTI_LEVEL {
                    return false;
                }
                let segment_ok = match p {
                    SINGLE_LEVEL => !t.is_empty(),
                    USERNAME_PLACEHOLDER => is_bindable(username) && t == username,
                    CLIENT_ID_PLACEHOLDER => is_bindable(client_id) && t == client_id,
                    literal => literal == t,
                };
                if !segment_ok {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Identities usable as a placeholder value
fn is_bindable(identity: &str) -> bool {
    !identity.is_empty() && !identity.contains(|c: char| matches!(c, '/' | '+' | '#'))
}

/// What a principal wants to do with a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Publish,
    Subscribe,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown access class: {0}")]
pub struct UnknownAccessClass(pub u8);

/// Integer access code sent by the broker on ACL checks
///
/// | Code | Meaning | Requires |
/// |---|---|---|
/// | 1 | read (deliver to subscriber) | subscribe |
/// | 2 | write | publish |
/// | 3 | read-write | subscribe and publish |
/// | 4 | subscribe | subscribe |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessClass {
    Read,
    Write,
    ReadWrite,
    Subscribe,
}

impl AccessClass {
    pub fn code(&self) -> u8 {
        match self {
            AccessClass::Read => 1,
            AccessClass::Write => 2,
            AccessClass::ReadWrite => 3,
            AccessClass::Subscribe => 4,
        }
    }

    /// Permissions that must all be granted
    pub fn required(&self) -> &'static [Permission] {
        match self {
            AccessClass::Read | AccessClass::Subscribe => &[Permission::Subscribe],
            AccessClass::Write => &[Permission::Publish],
            AccessClass::ReadWrite => &[Permission::Subscribe, Permission::Publish],
        }
    }
}

impl TryFrom<u8> for AccessClass {
    type Error = UnknownAccessClass;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(AccessClass::Read),
            2 => Ok(AccessClass::Write),
            3 => Ok(AccessClass::ReadWrite),
            4 => Ok(AccessClass::Subscribe),
            other => Err(UnknownAccessClass(other)),
        }
    }
}
