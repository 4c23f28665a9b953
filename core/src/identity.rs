/// Authenticated identity handed over by the authentication collaborator
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The logged-in user. Read-only to the chat core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }
}

/// Opaque bearer credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// What a successful login produces
#[derive(Debug, Clone)]
pub struct Credentials {
    pub identity: Identity,
    pub token: AuthToken,
}

impl Credentials {
    pub fn new(identity: Identity, token: AuthToken) -> Self {
        Self { identity, token }
    }

    /// Load credentials from `PARLEY_TOKEN`, `PARLEY_USER_ID` and `PARLEY_USERNAME`
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("PARLEY_TOKEN")
            .map_err(|_| ChatError::Auth("PARLEY_TOKEN is not set".to_string()))?;
        let id = std::env::var("PARLEY_USER_ID")
            .map_err(|_| ChatError::Auth("PARLEY_USER_ID is not set".to_string()))?;
        let username = std::env::var("PARLEY_USERNAME").unwrap_or_else(|_| id.clone());

        if token.trim().is_empty() {
            return Err(ChatError::Auth("PARLEY_TOKEN is empty".to_string()));
        }

        Ok(Self::new(Identity::new(id, username), AuthToken::new(token)))
    }
}
