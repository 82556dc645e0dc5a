use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::{
    AppError, AppResult,
    hub::ClientEvent,
    models::{ConversationSummary, Message},
};

/// The socket leg of the chat window. A disconnected socket reports
/// `is_connected() == false` and fails `emit` with a transport error,
/// which is what flips the window onto the REST fallback.
#[async_trait]
pub trait ChatSocket: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn emit(&self, event: ClientEvent) -> AppResult<()>;
}

/// The REST leg: bulk history loads, the conversation list poll, and the
/// fallback send.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_conversations(&self) -> AppResult<Vec<ConversationSummary>>;
    async fn fetch_messages(&self, conversation_id: Uuid) -> AppResult<Vec<Message>>;
    async fn post_message(&self, conversation_id: Uuid, body: &str) -> AppResult<Message>;
}

/// reqwest-backed `ChatApi`. Timeouts surface as transport errors so the
/// caller leaves local state untouched and retries.
pub struct HttpApi {
    base_url: String,
    http: reqwest::Client,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    async fn check(response: reqwest::Response) -> AppResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 => AppError::Unauthenticated,
            403 => AppError::Forbidden,
            404 => AppError::NotFound(detail),
            400 => AppError::InvalidInput(detail),
            _ => AppError::Persistence(format!("{status}: {detail}")),
        })
    }
}

#[async_trait]
impl ChatApi for HttpApi {
    async fn list_conversations(&self) -> AppResult<Vec<ConversationSummary>> {
        let response = self
            .http
            .get(format!("{}/conversations", self.base_url))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn fetch_messages(&self, conversation_id: Uuid) -> AppResult<Vec<Message>> {
        let response = self
            .http
            .get(format!("{}/messages", self.base_url))
            .query(&[("conversationId", conversation_id.to_string())])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_message(&self, conversation_id: Uuid, body: &str) -> AppResult<Message> {
        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .json(&json!({ "conversationId": conversation_id, "body": body }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
