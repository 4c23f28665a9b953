/// Parley - realtime chat client core
///
/// Session lifecycle over a realtime channel, presence tracking and
/// message reconciliation between a durable REST API and push events.

pub mod error;
pub mod config;
pub mod identity;
pub mod messenger_types;
pub mod realtime;
pub mod api;
pub mod session;
pub mod presence;
pub mod conversation;
pub mod dispatcher;
pub mod client;
pub mod cli_app;

pub use client::ChatClient;
pub use config::{Config, ReconnectPolicy};
pub use error::{ChatError, ErrorKind, Result};
pub use identity::{AuthToken, Credentials, Identity};
pub use messenger_types::{ChatEvent, Message, MessageStatus, PresenceEntry, User};
pub use session::{ConnectionState, Session, SessionManager};
