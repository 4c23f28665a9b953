/// Session connection manager: one realtime channel per logged-in identity
use crate::config::ReconnectPolicy;
use crate::error::{ChatError, ErrorKind, Result};
use crate::identity::{AuthToken, Identity};
use crate::messenger_types::PresenceEntry;
use crate::realtime::protocol::{InboundEvent, OutboundEvent};
use crate::realtime::transport::{Connector, Link};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle of the realtime channel
///
/// `Idle -> Connecting -> Connected <-> Reconnecting -> Closed`, with `Error`
/// reachable from `Connecting` or `Connected`/`Reconnecting` once the policy
/// gives up. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Error,
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }

    pub fn is_terminal(&self) -> bool {
        *self == ConnectionState::Closed
    }
}

/// User-facing error recorded on the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ChatError> for SessionError {
    fn from(err: &ChatError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Everything the session reports to its dependents
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    /// Channel is up and the announcements went out
    Connected { reconnect: bool },
    /// An established channel went away
    Disconnected { reason: String },
    /// A connect attempt failed
    ConnectError(SessionError),
    Inbound(InboundEvent),
    Closed,
}

/// Inbound handlers, registered once per session and invoked in channel order
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    async fn handle(&self, event: SessionEvent);
}

/// Read-only view of the session channel for dependent components.
///
/// Dependents may emit events but never open or close the channel.
#[derive(Clone)]
pub struct ChannelHandle {
    state: watch::Receiver<ConnectionState>,
    sender: Arc<RwLock<Option<mpsc::Sender<OutboundEvent>>>>,
    last_error: Arc<RwLock<Option<SessionError>>>,
}

impl ChannelHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Last connection error, cleared on a successful (re)connect
    pub async fn last_error(&self) -> Option<SessionError> {
        self.last_error.read().await.clone()
    }

    /// Fire-and-forget emit. Returns `false` when the channel is not connected.
    pub async fn emit(&self, event: OutboundEvent) -> bool {
        if !self.is_connected() {
            debug!("Channel not connected, dropping {}", event);
            return false;
        }
        let sender = self.sender.read().await.clone();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }
}

/// A live session. Closing happens on `close()` or, failing that, on drop.
pub struct Session {
    pub id: Uuid,
    identity: Identity,
    channel: ChannelHandle,
    shutdown: Option<oneshot::Sender<()>>,
    driver: Option<JoinHandle<()>>,
}

impl Session {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn channel(&self) -> ChannelHandle {
        self.channel.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.channel.state()
    }

    /// Wait until the connection state satisfies `predicate`
    pub async fn wait_for_state<F>(&self, mut predicate: F) -> Result<ConnectionState>
    where
        F: FnMut(ConnectionState) -> bool,
    {
        let mut rx = self.channel.subscribe_state();
        let state = *rx
            .wait_for(|s| predicate(*s))
            .await
            .map_err(|_| ChatError::Closed)?;
        Ok(state)
    }

    /// Announce self as inactive, then terminate the channel
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                error!("Session {} driver failed: {}", self.id, e);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The driver still runs the inactive announcement on its own task
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Opens sessions against one realtime endpoint
#[derive(Clone)]
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        Self { connector, policy }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Start a session for `identity`. Connection proceeds in the background;
    /// its progress is visible through the returned session's channel state.
    pub fn open(
        &self,
        identity: Identity,
        token: AuthToken,
        handler: Arc<dyn SessionHandler>,
    ) -> Session {
        let id = Uuid::new_v4();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let sender = Arc::new(RwLock::new(None));
        let last_error = Arc::new(RwLock::new(None));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let driver = Driver {
            session_id: id,
            identity: identity.clone(),
            token,
            policy: self.policy.clone(),
            connector: self.connector.clone(),
            handler,
            state: state_tx,
            sender: sender.clone(),
            last_error: last_error.clone(),
        };

        info!("Opening session {} for {}", id, identity.username);
        let driver = tokio::spawn(driver.run(shutdown_rx));

        Session {
            id,
            identity,
            channel: ChannelHandle {
                state: state_rx,
                sender,
                last_error,
            },
            shutdown: Some(shutdown_tx),
            driver: Some(driver),
        }
    }
}

enum LinkEnd {
    Shutdown(Link),
    Dropped,
}

/// Owns the channel for the lifetime of a session
struct Driver {
    session_id: Uuid,
    identity: Identity,
    token: AuthToken,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn SessionHandler>,
    state: watch::Sender<ConnectionState>,
    sender: Arc<RwLock<Option<mpsc::Sender<OutboundEvent>>>>,
    last_error: Arc<RwLock<Option<SessionError>>>,
}

impl Driver {
    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut failures = 0u32;
        let mut connected_before = false;

        loop {
            let pending = if connected_before {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            };
            self.transition(pending).await;

            let attempt = tokio::select! {
                _ = &mut shutdown => {
                    self.finish(None).await;
                    return;
                }
                result = timeout(self.policy.connect_timeout, self.connector.connect(&self.token)) => result,
            };

            let err = match attempt {
                Ok(Ok(link)) => {
                    failures = 0;
                    let reconnect = connected_before;
                    connected_before = true;
                    match self.serve(link, reconnect, &mut shutdown).await {
                        LinkEnd::Shutdown(link) => {
                            self.finish(Some(link)).await;
                            return;
                        }
                        LinkEnd::Dropped => {
                            let err = ChatError::Connection("Realtime channel dropped".to_string());
                            warn!("Session {}: {}", self.session_id, err);
                            self.record_error(&err).await;
                            self.handler
                                .handle(SessionEvent::Disconnected {
                                    reason: err.to_string(),
                                })
                                .await;
                            err
                        }
                    }
                }
                Ok(Err(err)) => {
                    warn!("Session {} connect failed: {}", self.session_id, err);
                    self.connect_failed(&err).await;
                    err
                }
                Err(_) => {
                    let err = ChatError::Timeout(format!(
                        "No connection within {:?}",
                        self.policy.connect_timeout
                    ));
                    warn!("Session {} connect failed: {}", self.session_id, err);
                    self.connect_failed(&err).await;
                    err
                }
            };

            if !err.is_retryable() {
                error!("Session {} giving up: {}", self.session_id, err);
                break;
            }

            failures += 1;
            let Some(delay) = self.policy.delay_for(failures) else {
                error!(
                    "Session {} giving up after {} failed attempts",
                    self.session_id, failures
                );
                break;
            };

            if connected_before {
                self.transition(ConnectionState::Reconnecting).await;
            }
            info!(
                "Session {} retrying in {:?} (attempt {}/{})",
                self.session_id, delay, failures, self.policy.max_attempts
            );
            tokio::select! {
                _ = &mut shutdown => {
                    self.finish(None).await;
                    return;
                }
                _ = sleep(delay) => {}
            }
        }

        self.transition(ConnectionState::Error).await;
        // Nothing left to do until the owner lets go of the session
        let _ = shutdown.await;
        self.finish(None).await;
    }

    async fn serve(
        &self,
        mut link: Link,
        reconnect: bool,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> LinkEnd {
        *self.sender.write().await = Some(link.outbound.clone());
        *self.last_error.write().await = None;
        self.transition(ConnectionState::Connected).await;
        info!(
            "Session {} connected{}",
            self.session_id,
            if reconnect { " (reconnect)" } else { "" }
        );

        self.announce(&link).await;
        self.handler
            .handle(SessionEvent::Connected { reconnect })
            .await;

        let shutdown_requested = loop {
            tokio::select! {
                _ = &mut *shutdown => break true,
                event = link.inbound.recv() => match event {
                    Some(event) => {
                        debug!("Session {} received {}", self.session_id, event);
                        self.handler.handle(SessionEvent::Inbound(event)).await;
                    }
                    None => break false,
                },
            }
        };

        *self.sender.write().await = None;
        if shutdown_requested {
            LinkEnd::Shutdown(link)
        } else {
            LinkEnd::Dropped
        }
    }

    /// Join the identity room, announce presence, request a snapshot
    async fn announce(&self, link: &Link) {
        let announcements = [
            OutboundEvent::Join(self.identity.id.clone()),
            OutboundEvent::UserActive(PresenceEntry {
                user_id: self.identity.id.clone(),
                username: self.identity.username.clone(),
            }),
            OutboundEvent::GetActiveUsers,
        ];
        for event in announcements {
            if link.outbound.send(event).await.is_err() {
                warn!("Session {} lost the channel while announcing", self.session_id);
                break;
            }
        }
    }

    async fn finish(&self, link: Option<Link>) {
        *self.sender.write().await = None;
        if let Some(link) = link {
            let inactive = OutboundEvent::UserInactive(self.identity.id.clone());
            if link.outbound.send(inactive).await.is_err() {
                debug!("Session {} channel already gone on close", self.session_id);
            }
            // Dropping the link terminates the channel
            drop(link);
        }
        self.transition(ConnectionState::Closed).await;
        info!("Session {} closed", self.session_id);
        self.handler.handle(SessionEvent::Closed).await;
    }

    async fn connect_failed(&self, err: &ChatError) {
        self.record_error(err).await;
        self.handler
            .handle(SessionEvent::ConnectError(SessionError::from(err)))
            .await;
    }

    async fn record_error(&self, err: &ChatError) {
        *self.last_error.write().await = Some(SessionError::from(err));
    }

    async fn transition(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Session {}: {:?} -> {:?}", self.session_id, previous, state);
            self.handler.handle(SessionEvent::StateChanged(state)).await;
        }
    }
}
