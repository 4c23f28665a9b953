/// Durable REST API consumed by the chat core
///
/// Endpoints:
///   GET   /api/users
///   GET   /api/messages/:peer_id
///   POST  /api/messages               body: {"receiverId":"...","content":"..."}
///   PATCH /api/messages/:id/status    body: {"status":"sent|delivered|read"}
///
/// Every call carries `Authorization: Bearer <token>`.
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::identity::AuthToken;
use crate::messenger_types::{Message, MessageStatus, User};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

/// Durable read/write operations against the persistent message store
#[async_trait]
pub trait DurableApi: Send + Sync + 'static {
    /// All known users, including the caller
    async fn list_users(&self) -> Result<Vec<User>>;

    /// Full history between the caller and `peer_id`, oldest first
    async fn fetch_history(&self, peer_id: &str) -> Result<Vec<Message>>;

    /// Store a new message; the server assigns id, timestamp and status
    async fn create_message(&self, receiver_id: &str, content: &str) -> Result<Message>;

    async fn update_status(&self, message_id: &str, status: MessageStatus) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateMessageRequest<'a> {
    receiver_id: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct UpdateStatusRequest {
    status: MessageStatus,
}

/// `reqwest`-backed implementation
#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    config: Config,
    token: AuthToken,
}

impl HttpApi {
    pub fn new(config: &Config, token: AuthToken) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ChatError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config: config.clone(),
            token,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.config.endpoint("api")?;
        url.path_segments_mut()
            .map_err(|_| ChatError::Configuration("API URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .header(AUTHORIZATION, self.token.bearer())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChatError::request(None, "Request timed out")
                } else {
                    ChatError::request(None, format!("Network error: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = server_message(&body);
        if status == StatusCode::UNAUTHORIZED {
            warn!("Durable API rejected the token");
            return Err(ChatError::Auth(
                message.unwrap_or_else(|| "Session expired, please sign in again".to_string()),
            ));
        }

        debug!("Durable API returned {}: {}", status, body);
        Err(ChatError::request(
            Some(status.as_u16()),
            message.unwrap_or_else(|| format!("Request failed with status {}", status.as_u16())),
        ))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        let status = response.status().as_u16();
        response
            .json::<T>()
            .await
            .map_err(|e| ChatError::request(Some(status), format!("Invalid response body: {}", e)))
    }
}

/// Pull a human readable message out of an error body
fn server_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| value.get(key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

#[async_trait]
impl DurableApi for HttpApi {
    async fn list_users(&self) -> Result<Vec<User>> {
        let url = self.url(&["users"])?;
        self.send_json(self.client.get(url)).await
    }

    async fn fetch_history(&self, peer_id: &str) -> Result<Vec<Message>> {
        let url = self.url(&["messages", peer_id])?;
        self.send_json(self.client.get(url)).await
    }

    async fn create_message(&self, receiver_id: &str, content: &str) -> Result<Message> {
        let url = self.url(&["messages"])?;
        let body = CreateMessageRequest {
            receiver_id,
            content,
        };
        self.send_json(self.client.post(url).json(&body)).await
    }

    async fn update_status(&self, message_id: &str, status: MessageStatus) -> Result<()> {
        let url = self.url(&["messages", message_id, "status"])?;
        self.send(self.client.patch(url).json(&UpdateStatusRequest { status }))
            .await?;
        Ok(())
    }
}
