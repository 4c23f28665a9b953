/// Chat client: the per-login object tying session, presence, conversation
/// and dispatch together
use crate::api::{DurableApi, HttpApi};
use crate::config::Config;
use crate::conversation::{ConversationStore, ConversationView, SelectOutcome};
use crate::dispatcher::{Dispatched, MessageDispatcher};
use crate::error::{ChatError, Result};
use crate::identity::{Credentials, Identity};
use crate::messenger_types::{ChatEvent, Message, MessageStatus, PresenceEntry, User};
use crate::presence::PresenceTracker;
use crate::realtime::protocol::InboundEvent;
use crate::realtime::transport::WsConnector;
use crate::session::{
    ChannelHandle, ConnectionState, Session, SessionError, SessionEvent, SessionHandler,
    SessionManager,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 256;

/// Applies session events to presence and conversation state
struct EventRouter {
    presence: PresenceTracker,
    conversation: ConversationStore,
    events: broadcast::Sender<ChatEvent>,
}

impl EventRouter {
    fn publish(&self, event: ChatEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl SessionHandler for EventRouter {
    async fn handle(&self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged(state) => {
                self.publish(ChatEvent::ConnectionChanged { state });
            }
            SessionEvent::Connected { reconnect } => {
                if reconnect {
                    debug!("Reconnected, waiting for a fresh presence snapshot");
                }
            }
            SessionEvent::Disconnected { reason } => {
                self.presence.mark_stale().await;
                self.publish(ChatEvent::error(&ChatError::Connection(reason)));
            }
            SessionEvent::ConnectError(err) => {
                self.publish(ChatEvent::Error {
                    kind: err.kind,
                    message: err.message,
                });
            }
            SessionEvent::Inbound(InboundEvent::ReceiveMessage(message)) => {
                if self.conversation.append(message.clone()).await {
                    self.publish(ChatEvent::MessageAppended { message });
                } else {
                    self.publish(ChatEvent::MessageReceived { message });
                }
            }
            SessionEvent::Inbound(InboundEvent::ActiveUsers(entries)) => {
                let users = self.presence.on_snapshot(entries).await;
                self.publish(ChatEvent::PresenceUpdated { users });
            }
            SessionEvent::Inbound(InboundEvent::MessageStatus(update)) => {
                if self
                    .conversation
                    .update_status(&update.message_id, update.status)
                    .await
                {
                    self.publish(ChatEvent::StatusUpdated {
                        message_id: update.message_id,
                        status: update.status,
                    });
                }
            }
            SessionEvent::Closed => {
                self.presence.clear().await;
            }
        }
    }
}

/// One logged-in user's chat state. Created at login, consumed by `logout`.
pub struct ChatClient {
    identity: Identity,
    api: Arc<dyn DurableApi>,
    session: Session,
    presence: PresenceTracker,
    conversation: ConversationStore,
    dispatcher: MessageDispatcher,
    events: broadcast::Sender<ChatEvent>,
    last_error: Arc<RwLock<Option<SessionError>>>,
}

impl ChatClient {
    /// Log in against the configured HTTP and WebSocket endpoints
    pub fn login(config: &Config, credentials: Credentials) -> Result<Self> {
        let api = Arc::new(HttpApi::new(config, credentials.token.clone())?);
        let connector = Arc::new(WsConnector::new(config.realtime_url.clone()));
        let sessions = SessionManager::new(connector, config.reconnect.clone());
        Ok(Self::with_parts(credentials, api, &sessions))
    }

    /// Log in with explicit collaborators
    pub fn with_parts(
        credentials: Credentials,
        api: Arc<dyn DurableApi>,
        sessions: &SessionManager,
    ) -> Self {
        let Credentials { identity, token } = credentials;
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let presence = PresenceTracker::new(identity.id.clone());
        let conversation = ConversationStore::new(identity.id.clone(), api.clone());

        let router = Arc::new(EventRouter {
            presence: presence.clone(),
            conversation: conversation.clone(),
            events: events.clone(),
        });
        let session = sessions.open(identity.clone(), token, router);
        let dispatcher = MessageDispatcher::new(api.clone(), conversation.clone(), session.channel());

        info!("Logged in as {} ({})", identity.username, identity.id);
        Self {
            identity,
            api,
            session,
            presence,
            conversation,
            dispatcher,
            events,
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn channel(&self) -> ChannelHandle {
        self.session.channel()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Wait for the first connect to succeed or for the session to give up
    pub async fn wait_until_connected(&self) -> Result<()> {
        let state = self
            .session
            .wait_for_state(|s| {
                matches!(
                    s,
                    ConnectionState::Connected | ConnectionState::Error | ConnectionState::Closed
                )
            })
            .await?;
        if state.is_connected() {
            return Ok(());
        }
        let message = self
            .channel()
            .last_error()
            .await
            .map(|e| e.message)
            .unwrap_or_else(|| "Realtime channel unavailable".to_string());
        Err(ChatError::Connection(message))
    }

    /// All users except the local identity
    pub async fn users(&self) -> Result<Vec<User>> {
        match self.api.list_users().await {
            Ok(users) => {
                self.clear_error().await;
                Ok(users
                    .into_iter()
                    .filter(|u| u.id != self.identity.id)
                    .collect())
            }
            Err(e) => Err(self.surface(e).await),
        }
    }

    pub async fn select(&self, peer_id: &str) -> Result<SelectOutcome> {
        match self.conversation.select(peer_id).await {
            Ok(SelectOutcome::Loaded { peer_id, count }) => {
                self.clear_error().await;
                self.publish(ChatEvent::ConversationLoaded {
                    peer_id: peer_id.clone(),
                    count,
                });
                Ok(SelectOutcome::Loaded { peer_id, count })
            }
            Ok(SelectOutcome::Superseded) => Ok(SelectOutcome::Superseded),
            Err(e) => Err(self.surface(e).await),
        }
    }

    /// Send to the selected peer
    pub async fn send_message(&self, content: &str) -> Result<Option<Dispatched>> {
        let peer_id = self.conversation.selected_peer().await;
        self.send_to(peer_id.as_deref(), content).await
    }

    pub async fn send_to(&self, peer_id: Option<&str>, content: &str) -> Result<Option<Dispatched>> {
        match self.dispatcher.send(peer_id, content).await {
            Ok(Some(dispatched)) => {
                self.clear_error().await;
                if dispatched.appended {
                    self.publish(ChatEvent::MessageAppended {
                        message: dispatched.message.clone(),
                    });
                }
                Ok(Some(dispatched))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(self.surface(e).await),
        }
    }

    /// Persist a status change, then apply it locally
    pub async fn update_message_status(&self, message_id: &str, status: MessageStatus) -> Result<bool> {
        if let Err(e) = self.api.update_status(message_id, status).await {
            return Err(self.surface(e).await);
        }
        self.clear_error().await;
        let updated = self.conversation.update_status(message_id, status).await;
        if updated {
            self.publish(ChatEvent::StatusUpdated {
                message_id: message_id.to_string(),
                status,
            });
        }
        Ok(updated)
    }

    /// Re-request the presence snapshot. No-op while disconnected.
    pub async fn refresh_presence(&self) -> bool {
        self.presence.request_snapshot(&self.session.channel()).await
    }

    pub async fn active_users(&self) -> Vec<PresenceEntry> {
        self.presence.active_users().await
    }

    pub async fn presence_is_stale(&self) -> bool {
        self.presence.is_stale().await
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.conversation.messages().await
    }

    pub async fn selected_peer(&self) -> Option<String> {
        self.conversation.selected_peer().await
    }

    pub async fn is_loading(&self) -> bool {
        self.conversation.is_loading().await
    }

    pub async fn view(&self) -> ConversationView {
        self.conversation.view().await
    }

    /// Most recent user-visible error: a failed action first, then the channel
    pub async fn last_error(&self) -> Option<SessionError> {
        if let Some(err) = self.last_error.read().await.clone() {
            return Some(err);
        }
        self.session.channel().last_error().await
    }

    /// Forget the last failed action. Successful actions call this too.
    pub async fn clear_error(&self) {
        *self.last_error.write().await = None;
    }

    /// Announce self inactive, close the channel and drop all chat state
    pub async fn logout(self) {
        info!("Logging out {}", self.identity.username);
        let ChatClient {
            session,
            presence,
            conversation,
            ..
        } = self;
        session.close().await;
        presence.clear().await;
        conversation.clear().await;
    }

    fn publish(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    /// Record an error as user-visible state and hand it back to the caller
    async fn surface(&self, err: ChatError) -> ChatError {
        warn!("{}", err);
        *self.last_error.write().await = Some(SessionError::from(&err));
        self.publish(ChatEvent::error(&err));
        err
    }
}
