/// Error taxonomy for the chat client core
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    /// Missing or malformed endpoint configuration. Fatal to the session.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Realtime channel failed to connect or dropped. Recoverable.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Bearer token rejected. The user must sign in again.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Any other durable call failure.
    #[error("Request failed: {message}")]
    Request {
        status: Option<u16>,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Session closed")]
    Closed,
}

/// Coarse classification used to pick how an error is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Connection,
    Auth,
    Request,
    Closed,
}

impl ChatError {
    pub fn request(status: Option<u16>, message: impl Into<String>) -> Self {
        ChatError::Request {
            status,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Configuration(_) => ErrorKind::Configuration,
            ChatError::Connection(_) | ChatError::Timeout(_) => ErrorKind::Connection,
            ChatError::Auth(_) => ErrorKind::Auth,
            ChatError::Request { .. } | ChatError::Serialization(_) => ErrorKind::Request,
            ChatError::Closed => ErrorKind::Closed,
        }
    }

    /// Whether the reconnection policy may retry after this error
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
