/// Realtime transport: one bidirectional event link per connection
use crate::error::{ChatError, Result};
use crate::identity::AuthToken;
use crate::realtime::protocol::{InboundEvent, OutboundEvent};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, warn};
use url::Url;

const LINK_BUFFER: usize = 64;

/// An established channel.
///
/// Dropping `outbound` terminates the channel; `inbound` yields `None`
/// once the remote side is gone.
pub struct Link {
    pub outbound: mpsc::Sender<OutboundEvent>,
    pub inbound: mpsc::Receiver<InboundEvent>,
}

impl Link {
    pub fn new(outbound: mpsc::Sender<OutboundEvent>, inbound: mpsc::Receiver<InboundEvent>) -> Self {
        Self { outbound, inbound }
    }
}

/// Opens realtime links authenticated with a bearer token
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, token: &AuthToken) -> Result<Link>;
}

/// WebSocket connector carrying one JSON event per text frame
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, token: &AuthToken) -> Result<Link> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ChatError::Configuration(format!("Invalid realtime URL: {}", e)))?;
        let header = HeaderValue::from_str(&token.bearer())
            .map_err(|_| ChatError::Auth("Token is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, header);

        let (stream, _response) = connect_async(request).await.map_err(map_ws_error)?;
        debug!("Realtime channel established to {}", self.url);

        let (mut write, mut read) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<OutboundEvent>(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<InboundEvent>(LINK_BUFFER);

        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let text = match event.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Dropping unencodable {}: {}", event, e);
                        continue;
                    }
                };
                if let Err(e) = write.send(WsMessage::text(text)).await {
                    debug!("Realtime write failed: {}", e);
                    break;
                }
            }
            // All senders gone: close the socket
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match InboundEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if in_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Skipping malformed realtime frame: {}", e),
                    },
                    Ok(WsMessage::Close(frame)) => {
                        debug!("Realtime channel closed by server: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Realtime read error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Link::new(out_tx, in_rx))
    }
}

fn map_ws_error(err: WsError) -> ChatError {
    match err {
        WsError::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
            ChatError::Auth("Realtime channel rejected the token".to_string())
        }
        WsError::Url(e) => ChatError::Configuration(format!("Invalid realtime URL: {}", e)),
        other => ChatError::Connection(other.to_string()),
    }
}
