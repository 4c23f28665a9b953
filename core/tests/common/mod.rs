#![allow(dead_code)]
//! Shared fakes for integration tests: an in-memory durable API backend and
//! a scripted realtime connector.
use async_trait::async_trait;
use chrono::Utc;
use parley_core::api::DurableApi;
use parley_core::config::ReconnectPolicy;
use parley_core::error::{ChatError, Result};
use parley_core::identity::{AuthToken, Credentials, Identity};
use parley_core::messenger_types::{Message, MessageStatus, User};
use parley_core::realtime::{Connector, InboundEvent, Link, OutboundEvent};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};

pub fn identity(id: &str, name: &str) -> Identity {
    Identity::new(id, name)
}

pub fn credentials(id: &str, name: &str) -> Credentials {
    Credentials::new(identity(id, name), AuthToken::new(format!("token-{}", id)))
}

pub fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        reconnection: true,
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        connect_timeout: Duration::from_millis(200),
    }
}

pub fn message(id: &str, from: &str, to: &str, content: &str) -> Message {
    Message {
        id: id.to_string(),
        sender_id: from.to_string(),
        receiver_id: to.to_string(),
        content: content.to_string(),
        created_at: Utc::now(),
        status: MessageStatus::Sent,
    }
}

/// Poll `check` until it returns true, panicking after about two seconds
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {}", what);
}

// ─── Durable API ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct BackendState {
    users: Vec<User>,
    messages: Vec<Message>,
    next_id: u64,
    fail_writes: bool,
    fail_reads: bool,
    held: HashMap<String, VecDeque<oneshot::Receiver<()>>>,
    status_updates: Vec<(String, MessageStatus)>,
}

/// In-memory message store shared by every client of a test
#[derive(Clone, Default)]
pub struct Backend {
    state: Arc<Mutex<BackendState>>,
    writes: Arc<AtomicUsize>,
}

impl Backend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_for(&self, local_id: &str) -> Arc<FakeApi> {
        Arc::new(FakeApi {
            backend: self.clone(),
            local_id: local_id.to_string(),
        })
    }

    pub fn add_user(&self, id: &str, name: &str) {
        self.state.lock().unwrap().users.push(User {
            id: id.to_string(),
            username: name.to_string(),
            email: None,
        });
    }

    pub fn seed(&self, message: Message) {
        self.state.lock().unwrap().messages.push(message);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    /// Hold the next history read for `peer_id` until the returned sender fires
    pub fn hold_history(&self, peer_id: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state
            .lock()
            .unwrap()
            .held
            .entry(peer_id.to_string())
            .or_default()
            .push_back(rx);
        tx
    }

    pub fn stored(&self) -> Vec<Message> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn status_updates(&self) -> Vec<(String, MessageStatus)> {
        self.state.lock().unwrap().status_updates.clone()
    }
}

pub struct FakeApi {
    backend: Backend,
    local_id: String,
}

#[async_trait]
impl DurableApi for FakeApi {
    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.backend.state.lock().unwrap().users.clone())
    }

    async fn fetch_history(&self, peer_id: &str) -> Result<Vec<Message>> {
        let gate = self
            .backend
            .state
            .lock()
            .unwrap()
            .held
            .get_mut(peer_id)
            .and_then(VecDeque::pop_front);
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let state = self.backend.state.lock().unwrap();
        if state.fail_reads {
            return Err(ChatError::request(Some(500), "history unavailable"));
        }
        Ok(state
            .messages
            .iter()
            .filter(|m| m.is_between(&self.local_id, peer_id))
            .cloned()
            .collect())
    }

    async fn create_message(&self, receiver_id: &str, content: &str) -> Result<Message> {
        let mut state = self.backend.state.lock().unwrap();
        if state.fail_writes {
            return Err(ChatError::request(Some(500), "database unavailable"));
        }
        state.next_id += 1;
        let stored = message(
            &format!("m{}", state.next_id),
            &self.local_id,
            receiver_id,
            content,
        );
        state.messages.push(stored.clone());
        self.backend.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn update_status(&self, message_id: &str, status: MessageStatus) -> Result<()> {
        let mut state = self.backend.state.lock().unwrap();
        if state.fail_writes {
            return Err(ChatError::Auth("Token expired".to_string()));
        }
        match state.messages.iter_mut().find(|m| m.id == message_id) {
            Some(m) => m.status = status,
            None => return Err(ChatError::request(Some(404), "message not found")),
        }
        state.status_updates.push((message_id.to_string(), status));
        Ok(())
    }
}

// ─── Realtime connector ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Accept,
    Refuse,
    Unauthorized,
    Hang,
}

/// Server end of one accepted link
pub struct ServerSide {
    pub received: mpsc::Receiver<OutboundEvent>,
    pub push: mpsc::Sender<InboundEvent>,
}

impl ServerSide {
    /// Next event the client emitted
    pub async fn next_event(&mut self) -> Option<OutboundEvent> {
        timeout(Duration::from_secs(2), self.received.recv())
            .await
            .expect("timed out waiting for a client event")
    }

    pub async fn expect(&mut self) -> OutboundEvent {
        self.next_event()
            .await
            .expect("client closed the channel unexpectedly")
    }

    /// Consume join, userActive and getActiveUsers
    pub async fn expect_announcements(&mut self, id: &str) {
        assert_eq!(self.expect().await, OutboundEvent::Join(id.to_string()));
        match self.expect().await {
            OutboundEvent::UserActive(entry) => assert_eq!(entry.user_id, id),
            other => panic!("expected userActive, got {}", other),
        }
        assert_eq!(self.expect().await, OutboundEvent::GetActiveUsers);
    }

    pub async fn send(&self, event: InboundEvent) {
        self.push.send(event).await.expect("client link is gone");
    }
}

struct ConnectorState {
    script: VecDeque<Attempt>,
    servers: mpsc::UnboundedSender<ServerSide>,
}

#[derive(Clone)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
    attempts: Arc<AtomicUsize>,
}

impl FakeConnector {
    /// Connector that accepts by default. Accepted links show up on the receiver.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerSide>) {
        Self::scripted(Vec::new())
    }

    /// Connector that plays `script` in order, then accepts
    pub fn scripted(script: Vec<Attempt>) -> (Self, mpsc::UnboundedReceiver<ServerSide>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(Mutex::new(ConnectorState {
                script: script.into(),
                servers,
            })),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        (connector, rx)
    }

    pub fn push_script(&self, attempts: &[Attempt]) {
        self.state.lock().unwrap().script.extend(attempts.iter().copied());
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _token: &AuthToken) -> Result<Link> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let attempt = self
            .state
            .lock()
            .unwrap()
            .script
            .pop_front()
            .unwrap_or(Attempt::Accept);

        match attempt {
            Attempt::Accept => {
                let (client_tx, server_rx) = mpsc::channel(64);
                let (server_tx, client_rx) = mpsc::channel(64);
                let server = ServerSide {
                    received: server_rx,
                    push: server_tx,
                };
                let _ = self.state.lock().unwrap().servers.send(server);
                Ok(Link::new(client_tx, client_rx))
            }
            Attempt::Refuse => Err(ChatError::Connection("connection refused".to_string())),
            Attempt::Unauthorized => Err(ChatError::Auth("token rejected".to_string())),
            Attempt::Hang => std::future::pending::<Result<Link>>().await,
        }
    }
}

pub async fn next_server(servers: &mut mpsc::UnboundedReceiver<ServerSide>) -> ServerSide {
    timeout(Duration::from_secs(2), servers.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}
