/// Conversation store: the message thread for the selected peer
use crate::api::DurableApi;
use crate::error::Result;
use crate::messenger_types::{Message, MessageStatus};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct ConversationState {
    selected: Option<String>,
    /// Arrival order, not timestamp order
    messages: Vec<Message>,
    loading: bool,
    /// Bumped by every `select`; responses carrying an older value are stale
    generation: u64,
    pending: Option<String>,
    /// Pushes for the peer being loaded, merged once its history lands
    held_back: Vec<Message>,
}

impl ConversationState {
    fn contains(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }
}

/// Result of a `select` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    Loaded { peer_id: String, count: usize },
    /// A later `select` was issued before this one resolved
    Superseded,
}

/// Point-in-time copy of the store for rendering
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub selected: Option<String>,
    pub messages: Vec<Message>,
    pub loading: bool,
}

#[derive(Clone)]
pub struct ConversationStore {
    local_id: String,
    api: Arc<dyn DurableApi>,
    inner: Arc<RwLock<ConversationState>>,
}

impl ConversationStore {
    pub fn new(local_id: impl Into<String>, api: Arc<dyn DurableApi>) -> Self {
        Self {
            local_id: local_id.into(),
            api,
            inner: Arc::new(RwLock::new(ConversationState::default())),
        }
    }

    /// Load the full history with `peer_id` and make it the selected thread.
    ///
    /// The last call wins: a response that resolves after a newer `select`
    /// was issued is discarded.
    pub async fn select(&self, peer_id: &str) -> Result<SelectOutcome> {
        let ticket = {
            let mut state = self.inner.write().await;
            state.generation += 1;
            state.loading = true;
            if state.pending.as_deref() != Some(peer_id) {
                state.held_back.clear();
            }
            state.pending = Some(peer_id.to_string());
            state.generation
        };

        let result = self.api.fetch_history(peer_id).await;

        let mut state = self.inner.write().await;
        if state.generation != ticket {
            debug!("Discarding stale history response for {}", peer_id);
            return Ok(SelectOutcome::Superseded);
        }
        state.loading = false;
        state.pending = None;
        let held_back = std::mem::take(&mut state.held_back);

        match result {
            Ok(messages) => {
                state.messages = messages;
                state.selected = Some(peer_id.to_string());
                for message in held_back {
                    if !state.contains(&message.id) {
                        state.messages.push(message);
                    }
                }
                let count = state.messages.len();
                info!("Loaded {} messages with {}", count, peer_id);
                Ok(SelectOutcome::Loaded {
                    peer_id: peer_id.to_string(),
                    count,
                })
            }
            Err(e) => {
                warn!("Failed to load conversation with {}: {}", peer_id, e);
                // A failed reload of the open thread still shows what arrived meanwhile
                if state.selected.as_deref() == Some(peer_id) {
                    for message in held_back {
                        if !state.contains(&message.id) {
                            state.messages.push(message);
                        }
                    }
                }
                Err(e)
            }
        }
    }

    /// Append to the tail of the selected conversation.
    ///
    /// Messages outside the selected conversation and ids already present
    /// are ignored. Returns whether the message was appended.
    pub async fn append(&self, message: Message) -> bool {
        let mut state = self.inner.write().await;
        let counterpart = message.counterpart(&self.local_id).to_string();

        if state.pending.as_deref() == Some(counterpart.as_str()) {
            if !state.held_back.iter().any(|m| m.id == message.id) {
                state.held_back.push(message);
            }
            return false;
        }
        if state.selected.as_deref() != Some(counterpart.as_str()) {
            return false;
        }
        if !message.is_between(&self.local_id, &counterpart) {
            return false;
        }
        if state.contains(&message.id) {
            debug!("Ignoring duplicate message {}", message.id);
            return false;
        }
        state.messages.push(message);
        true
    }

    /// Set the status of a message in the current sequence. Unknown ids are a no-op.
    pub async fn update_status(&self, message_id: &str, status: MessageStatus) -> bool {
        let mut state = self.inner.write().await;
        match state.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                message.status = status;
                true
            }
            None => false,
        }
    }

    pub async fn selected_peer(&self) -> Option<String> {
        self.inner.read().await.selected.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.read().await.loading
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.read().await.messages.clone()
    }

    pub async fn view(&self) -> ConversationView {
        let state = self.inner.read().await;
        ConversationView {
            selected: state.selected.clone(),
            messages: state.messages.clone(),
            loading: state.loading,
        }
    }

    pub async fn clear(&self) {
        let mut state = self.inner.write().await;
        let generation = state.generation + 1;
        *state = ConversationState {
            generation,
            ..Default::default()
        };
    }
}
