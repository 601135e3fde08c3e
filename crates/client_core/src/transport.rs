//! REST access to the chat server.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Message, MessageId, UserId, UserProfile},
    error::ApiReply,
    protocol::{
        ChatDeleted, ConversationList, EditMessageRequest, LoginRequest, MessageDeleted,
        ReactRequest, SeenReceipt, SendMessageRequest, UpdateProfileRequest,
    },
};

use crate::error::{ClientError, ClientResult};

/// One method per message route. The engine only talks to the server through this.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_conversations(&self, limit: Option<usize>) -> ClientResult<ConversationList>;
    async fn list_messages(&self, partner_id: &UserId) -> ClientResult<Vec<Message>>;
    async fn send_message(
        &self,
        partner_id: &UserId,
        request: &SendMessageRequest,
    ) -> ClientResult<Message>;
    async fn edit_message(&self, message_id: &MessageId, text: &str) -> ClientResult<Message>;
    async fn delete_message(&self, message_id: &MessageId) -> ClientResult<MessageDeleted>;
    async fn delete_chat(&self, partner_id: &UserId) -> ClientResult<ChatDeleted>;
    async fn react(&self, message_id: &MessageId, emoji: &str) -> ClientResult<Message>;
    async fn mark_seen(&self, message_id: &MessageId) -> ClientResult<SeenReceipt>;
}

#[derive(Debug, Clone)]
pub struct HttpChatApi {
    http: Client,
    server_url: String,
    user_id: UserId,
}

impl HttpChatApi {
    pub fn new(server_url: impl Into<String>, user_id: UserId) -> Self {
        Self::with_client(Client::new(), server_url, user_id)
    }

    pub fn with_client(http: Client, server_url: impl Into<String>, user_id: UserId) -> Self {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            server_url,
            user_id,
        }
    }

    /// Creates or fetches the account for `username` and returns an API bound to it.
    pub async fn login(
        server_url: impl Into<String>,
        username: &str,
        full_name: Option<&str>,
    ) -> ClientResult<(Self, UserProfile)> {
        let http = Client::new();
        let server_url = server_url.into().trim_end_matches('/').to_string();
        let profile: UserProfile = unwrap_reply(
            http.post(format!("{server_url}/login")).json(&LoginRequest {
                username: username.to_string(),
                full_name: full_name.map(str::to_string),
            }),
        )
        .await?;
        let api = Self::with_client(http, server_url, profile.id.clone());
        Ok((api, profile))
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub async fn user_profile(&self, user_id: &UserId) -> ClientResult<UserProfile> {
        unwrap_reply(self.http.get(self.url(&format!("/users/{user_id}")))).await
    }

    pub async fn update_profile(
        &self,
        request: &UpdateProfileRequest,
    ) -> ClientResult<UserProfile> {
        let request = self.as_caller(self.http.put(self.url("/users/profile"))).json(request);
        unwrap_reply(request).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server_url)
    }

    fn as_caller(&self, request: RequestBuilder) -> RequestBuilder {
        request.query(&[("user_id", self.user_id.as_str())])
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_conversations(&self, limit: Option<usize>) -> ClientResult<ConversationList> {
        let path = match limit {
            Some(limit) => format!("/conversations/{limit}"),
            None => "/conversations".to_string(),
        };
        unwrap_reply(self.as_caller(self.http.get(self.url(&path)))).await
    }

    async fn list_messages(&self, partner_id: &UserId) -> ClientResult<Vec<Message>> {
        let url = self.url(&format!("/messages/{partner_id}"));
        unwrap_reply(self.as_caller(self.http.get(url))).await
    }

    async fn send_message(
        &self,
        partner_id: &UserId,
        request: &SendMessageRequest,
    ) -> ClientResult<Message> {
        let url = self.url(&format!("/messages/send/{partner_id}"));
        unwrap_reply(self.as_caller(self.http.post(url)).json(request)).await
    }

    async fn edit_message(&self, message_id: &MessageId, text: &str) -> ClientResult<Message> {
        let url = self.url(&format!("/messages/edit/{message_id}"));
        let body = EditMessageRequest {
            text: text.to_string(),
        };
        unwrap_reply(self.as_caller(self.http.put(url)).json(&body)).await
    }

    async fn delete_message(&self, message_id: &MessageId) -> ClientResult<MessageDeleted> {
        let url = self.url(&format!("/messages/{message_id}"));
        unwrap_reply(self.as_caller(self.http.delete(url))).await
    }

    async fn delete_chat(&self, partner_id: &UserId) -> ClientResult<ChatDeleted> {
        let url = self.url(&format!("/messages/chat/{partner_id}"));
        unwrap_reply(self.as_caller(self.http.delete(url))).await
    }

    async fn react(&self, message_id: &MessageId, emoji: &str) -> ClientResult<Message> {
        let url = self.url(&format!("/messages/react/{message_id}"));
        let body = ReactRequest {
            emoji: emoji.to_string(),
        };
        unwrap_reply(self.as_caller(self.http.post(url)).json(&body)).await
    }

    async fn mark_seen(&self, message_id: &MessageId) -> ClientResult<SeenReceipt> {
        let url = self.url(&format!("/messages/marks/{message_id}"));
        unwrap_reply(self.as_caller(self.http.put(url))).await
    }
}

async fn unwrap_reply<T: DeserializeOwned>(request: RequestBuilder) -> ClientResult<T> {
    let reply: ApiReply<T> = request.send().await?.error_for_status()?.json().await?;
    reply.into_result().map_err(ClientError::Rejected)
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
