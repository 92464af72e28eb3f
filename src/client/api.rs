//! Pull half of the client.

use std::future::Future;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;

use super::ClientError;
use crate::proto::events::SendMessageRequest;
use crate::proto::views::{
    ConversationList, ConversationPage, CreatedConversation, MessageView, NotificationList,
    ReadAck, UnreadCount,
};

/// The queries the bridge can refetch.
pub trait PullApi: Send + Sync {
    fn conversations(&self) -> impl Future<Output = Result<ConversationList, ClientError>> + Send;

    /// Newest page of a conversation's history.
    fn messages(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<ConversationPage, ClientError>> + Send;

    fn unread_count(&self) -> impl Future<Output = Result<UnreadCount, ClientError>> + Send;

    fn notifications(&self) -> impl Future<Output = Result<NotificationList, ClientError>> + Send;
}

/// `PullApi` over the server's REST endpoints.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestClient {
    /// `base_url` is e.g. `http://host:port`, without a trailing slash.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|body| body["error"].as_str().map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            return Err(ClientError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<T>().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        Self::parse(self.request(Method::GET, path).send().await?).await
    }

    pub async fn send_message(&self, req: &SendMessageRequest) -> Result<MessageView, ClientError> {
        Self::parse(self.request(Method::POST, "/api/messages").json(req).send().await?).await
    }

    pub async fn create_conversation(
        &self,
        participant_id: &str,
        message: Option<&str>,
    ) -> Result<CreatedConversation, ClientError> {
        let body = json!({ "participantId": participant_id, "message": message });
        Self::parse(self.request(Method::POST, "/api/conversations").json(&body).send().await?)
            .await
    }

    pub async fn mark_read(&self, conversation_id: &str) -> Result<ReadAck, ClientError> {
        let path = format!("/api/conversations/{}/read", conversation_id);
        Self::parse(self.request(Method::PUT, &path).send().await?).await
    }
}

impl PullApi for RestClient {
    async fn conversations(&self) -> Result<ConversationList, ClientError> {
        self.get("/api/conversations").await
    }

    async fn messages(&self, conversation_id: &str) -> Result<ConversationPage, ClientError> {
        self.get(&format!("/api/conversations/{}/messages", conversation_id))
            .await
    }

    async fn unread_count(&self) -> Result<UnreadCount, ClientError> {
        self.get("/api/messages/unread-count").await
    }

    async fn notifications(&self) -> Result<NotificationList, ClientError> {
        self.get("/api/notifications").await
    }
}
