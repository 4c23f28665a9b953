/// Message dispatcher: durable write first, realtime fan-out second
use crate::api::DurableApi;
use crate::conversation::ConversationStore;
use crate::error::Result;
use crate::messenger_types::Message;
use crate::realtime::protocol::OutboundEvent;
use crate::session::ChannelHandle;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to a sent message
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    /// The stored message as returned by the server
    pub message: Message,
    /// Appended to the selected conversation
    pub appended: bool,
    /// Announced on the realtime channel. When `false` the message is stored
    /// but the peer only sees it on its next history load.
    pub announced: bool,
}

#[derive(Clone)]
pub struct MessageDispatcher {
    api: Arc<dyn DurableApi>,
    conversation: ConversationStore,
    channel: ChannelHandle,
}

impl MessageDispatcher {
    pub fn new(
        api: Arc<dyn DurableApi>,
        conversation: ConversationStore,
        channel: ChannelHandle,
    ) -> Self {
        Self {
            api,
            conversation,
            channel,
        }
    }

    /// Store `content` for `peer_id`, show it locally, then announce it.
    ///
    /// Returns `Ok(None)` without doing anything when there is no peer or
    /// the content is blank. A failed durable write sends nothing.
    pub async fn send(&self, peer_id: Option<&str>, content: &str) -> Result<Option<Dispatched>> {
        let Some(peer_id) = peer_id.filter(|p| !p.is_empty()) else {
            return Ok(None);
        };
        if content.trim().is_empty() {
            return Ok(None);
        }

        let message = self.api.create_message(peer_id, content).await.map_err(|e| {
            warn!("Failed to store message for {}: {}", peer_id, e);
            e
        })?;

        let appended = self.conversation.append(message.clone()).await;

        let mut outgoing = message.clone();
        outgoing.receiver_id = peer_id.to_string();
        let announced = self.channel.emit(OutboundEvent::SendMessage(outgoing)).await;
        if announced {
            debug!("Announced message {} to {}", message.id, peer_id);
        } else {
            // No outbox: the peer picks this up on its next history load
            warn!(
                "Message {} stored but not announced, realtime channel is {:?}",
                message.id,
                self.channel.state()
            );
        }

        Ok(Some(Dispatched {
            message,
            appended,
            announced,
        }))
    }
}
