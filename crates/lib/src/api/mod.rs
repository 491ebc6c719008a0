//! Backend gateway: the chat service's HTTP API.
//!
//! `ChatGateway` is the seam the reconciler and auth flows depend on; `HttpGateway`
//! implements it over reqwest. List endpoints always come back as plain `Vec`s,
//! whatever envelope the backend used.

mod http;
mod types;

pub use http::HttpGateway;
pub use types::{
    ChatId, ChatRecord, IdValue, LoginRequest, Message, Role, SendMessageResponse, SignupRequest,
    TokenResponse, User, DEFAULT_CHAT_TITLE,
};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api error {status}: {}", .detail.as_deref().unwrap_or("no detail"))]
    Api { status: u16, detail: Option<String> },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Message suitable for showing to a user (auth forms).
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Api {
                detail: Some(d), ..
            } => d.clone(),
            ApiError::Api { status, .. } => format!("API Error: {}", status),
            ApiError::Request(_) | ApiError::Decode(_) => "Something went wrong.".to_string(),
        }
    }

    /// True for 401/403 responses.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Api { status: 401 | 403, .. })
    }
}

/// Operations the chat backend exposes. Every chat/message call takes the bearer token.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// POST /api/v1/auth/signup
    async fn signup(&self, req: &SignupRequest) -> Result<TokenResponse, ApiError>;
    /// POST /api/v1/auth/login
    async fn login(&self, req: &LoginRequest) -> Result<TokenResponse, ApiError>;
    /// POST /api/v1/auth/logout
    async fn logout(&self, token: &str) -> Result<(), ApiError>;
    /// GET /api/v1/auth/me
    async fn current_user(&self, token: &str) -> Result<User, ApiError>;

    /// POST /api/v1/chats
    async fn create_chat(&self, token: &str, title: &str) -> Result<ChatRecord, ApiError>;
    /// GET /api/v1/chats
    async fn list_chats(&self, token: &str) -> Result<Vec<ChatRecord>, ApiError>;
    /// GET /api/v1/chats/{id}
    async fn get_chat(&self, token: &str, chat_id: &str) -> Result<ChatRecord, ApiError>;
    /// PATCH /api/v1/chats/{id}
    async fn update_chat(
        &self,
        token: &str,
        chat_id: &str,
        title: &str,
    ) -> Result<ChatRecord, ApiError>;
    /// DELETE /api/v1/chats/{id}
    async fn delete_chat(&self, token: &str, chat_id: &str) -> Result<(), ApiError>;

    /// POST /api/v1/chats/{id}/messages
    async fn send_message(
        &self,
        token: &str,
        chat_id: &str,
        message: &str,
    ) -> Result<SendMessageResponse, ApiError>;
    /// GET /api/v1/chats/{id}/messages
    async fn list_messages(&self, token: &str, chat_id: &str) -> Result<Vec<Message>, ApiError>;
}
