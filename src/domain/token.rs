// Copyright (c) 2025 - Cowboy AI, Inc.
//! Provisioning token value object

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Provisioning token validation error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Provisioning token is empty")]
    Empty,

    #[error("Provisioning token exceeds maximum length of 128 characters: {0}")]
    TooLong(usize),

    #[error("Invalid character in provisioning token: {0:?}")]
    InvalidCharacter(char),
}

/// Opaque registration token handed to a bank before it is provisioned
///
/// The token travels as a topic segment (`device/register/{token}`), so it
/// must never contain a level separator or a wildcard:
/// - Non-empty, at most 128 characters
/// - ASCII alphanumeric, `-` and `_` only
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisioningToken(String);

impl ProvisioningToken {
    /// Maximum token length
    pub const MAX_LENGTH: usize = 128;

    /// Create a validated token
    pub fn new(token: impl Into<String>) -> Result<Self, TokenError> {
        let token = token.into();

        if token.is_empty() {
            return Err(TokenError::Empty);
        }

        if token.len() > Self::MAX_LENGTH {
            return Err(TokenError::TooLong(token.len()));
        }

        if let Some(ch) = token
            .chars()
            .find(|ch| !ch.is_ascii_alphanumeric() && *ch != '-' && *ch != '_')
        {
            return Err(TokenError::InvalidCharacter(ch));
        }

        Ok(Self(token))
    }

    /// Get the token as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProvisioningToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for ProvisioningToken {
    type Error = TokenError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
