//! reqwest client for the chat backend (https://nupatai.onrender.com by default).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::types::{ErrorBody, ListEnvelope, SendMessageRequest, TitleRequest};
use super::{
    ApiError, ChatGateway, ChatRecord, LoginRequest, Message, SendMessageResponse, SignupRequest,
    TokenResponse, User,
};
use crate::config::{self, Config};

/// Client for the chat backend HTTP API.
#[derive(Clone)]
pub struct HttpGateway {
    base_url: String,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Client with a per-request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Base URL from config (NUPAT_API_URL overrides) and the configured timeout.
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::with_timeout(
            config::resolve_base_url(config),
            Duration::from_secs(config.backend.timeout_secs.max(1)),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Map a non-2xx response to `ApiError::Api`, keeping the `detail` field when present.
    async fn check(res: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status().as_u16();
        let body = res.bytes().await.unwrap_or_default();
        let detail = serde_json::from_slice::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.detail_message());
        log::debug!("backend returned {}: {:?}", status, detail);
        Err(ApiError::Api { status, detail })
    }

    async fn decode<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, ApiError> {
        let res = Self::check(res).await?;
        let body = res.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChatGateway for HttpGateway {
    async fn signup(&self, req: &SignupRequest) -> Result<TokenResponse, ApiError> {
        let res = self
            .client
            .post(self.url("/auth/signup"))
            .json(req)
            .send()
            .await?;
        Self::decode(res).await
    }

    async fn login(&self, req: &LoginRequest) -> Result<TokenResponse, ApiError> {
        let res = self
            .client
            .post(self.url("/auth/login"))
            .json(req)
            .send()
            .await?;
        Self::decode(res).await
    }

    async fn logout(&self, token: &str) -> Result<(), ApiError> {
        let res = self
            .client
            .post(self.url("/auth/logout"))
            .bearer_auth(token)
            .send()
            .await?;
        Self::check(res).await.map(|_| ())
    }

    async fn current_user(&self, token: &str) -> Result<User, ApiError> {
        let res = self
            .client
            .get(self.url("/auth/me"))
            .bearer_auth(token)
            .send()
            .await?;
        Self::decode(res).await
    }

    async fn create_chat(&self, token: &str, title: &str) -> Result<ChatRecord, ApiError> {
        let res = self
            .client
            .post(self.url("/chats"))
            .bearer_auth(token)
            .json(&TitleRequest { title })
            .send()
            .await?;
        Self::decode(res).await
    }

    async fn list_chats(&self, token: &str) -> Result<Vec<ChatRecord>, ApiError> {
        let res = self
            .client
            .get(self.url("/chats"))
            .bearer_auth(token)
            .send()
            .await?;
        let envelope: ListEnvelope<ChatRecord> = Self::decode(res).await?;
        Ok(envelope.into_vec())
    }

    async fn get_chat(&self, token: &str, chat_id: &str) -> Result<ChatRecord, ApiError> {
        let res = self
            .client
            .get(self.url(&format!("/chats/{}", chat_id)))
            .bearer_auth(token)
            .send()
            .await?;
        Self::decode(res).await
    }

    async fn update_chat(
        &self,
        token: &str,
        chat_id: &str,
        title: &str,
    ) -> Result<ChatRecord, ApiError> {
        let res = self
            .client
            .patch(self.url(&format!("/chats/{}", chat_id)))
            .bearer_auth(token)
            .json(&TitleRequest { title })
            .send()
            .await?;
        Self::decode(res).await
    }

    async fn delete_chat(&self, token: &str, chat_id: &str) -> Result<(), ApiError> {
        let res = self
            .client
            .delete(self.url(&format!("/chats/{}", chat_id)))
            .bearer_auth(token)
            .send()
            .await?;
        Self::check(res).await.map(|_| ())
    }

    async fn send_message(
        &self,
        token: &str,
        chat_id: &str,
        message: &str,
    ) -> Result<SendMessageResponse, ApiError> {
        let res = self
            .client
            .post(self.url(&format!("/chats/{}/messages", chat_id)))
            .bearer_auth(token)
            .json(&SendMessageRequest { message })
            .send()
            .await?;
        Self::decode(res).await
    }

    async fn list_messages(&self, token: &str, chat_id: &str) -> Result<Vec<Message>, ApiError> {
        let res = self
            .client
            .get(self.url(&format!("/chats/{}/messages", chat_id)))
            .bearer_auth(token)
            .send()
            .await?;
        let envelope: ListEnvelope<Message> = Self::decode(res).await?;
        Ok(envelope.into_vec())
    }
}
