//! In-memory `ChatGateway` for tests: records every call, can fail or hold
//! individual operations until released.

#![allow(dead_code)]

use async_trait::async_trait;
use nupat::api::{
    ApiError, ChatGateway, ChatRecord, LoginRequest, Message, SendMessageResponse, SignupRequest,
    TokenResponse, User,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub const TOKEN: &str = "tok";

#[derive(Default)]
pub struct FakeGateway {
    chats: Mutex<Vec<ChatRecord>>,
    messages: Mutex<HashMap<String, Vec<Message>>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    send_response: Mutex<Option<serde_json::Value>>,
    token_response: Mutex<Option<serde_json::Value>>,
    next_id: AtomicU64,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        let fake = Self::default();
        fake.next_id.store(1, Ordering::SeqCst);
        Arc::new(fake)
    }

    /// Ids handed out by `create_chat` start at `id`.
    pub fn set_next_id(&self, id: u64) {
        self.next_id.store(id, Ordering::SeqCst);
    }

    pub fn add_chat(&self, id: &str, title: &str) {
        self.chats.lock().unwrap().push(ChatRecord {
            id: id.to_string(),
            title: Some(title.to_string()),
            created_at: None,
            updated_at: None,
        });
    }

    /// Append a chat given as backend JSON (e.g. with timestamps).
    pub fn add_record(&self, record: serde_json::Value) {
        self.chats
            .lock()
            .unwrap()
            .push(serde_json::from_value(record).unwrap());
    }

    pub fn set_messages(&self, chat_id: &str, messages: Vec<Message>) {
        self.messages
            .lock()
            .unwrap()
            .insert(chat_id.to_string(), messages);
    }

    /// Make every call of `op` (e.g. "send_message") fail with a 500.
    pub fn fail(&self, op: &str) {
        self.failing.lock().unwrap().insert(op.to_string());
    }

    pub fn succeed(&self, op: &str) {
        self.failing.lock().unwrap().remove(op);
    }

    /// Hold the call recorded as `key` (e.g. "list_messages:2") until the returned Notify fires.
    pub fn gate(&self, key: &str) -> Arc<Notify> {
        let n = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(key.to_string(), n.clone());
        n
    }

    /// Raw JSON returned (after decoding) by the next send_message calls.
    pub fn set_send_response(&self, value: serde_json::Value) {
        *self.send_response.lock().unwrap() = Some(value);
    }

    pub fn set_token_response(&self, value: serde_json::Value) {
        *self.token_response.lock().unwrap() = Some(value);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(':').next() == Some(op))
            .count()
    }

    /// Wait until a call recorded as `key` has started.
    pub async fn wait_for_call(&self, key: &str) {
        for _ in 0..500 {
            if self.calls().iter().any(|c| c == key) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("call {} never started; calls: {:?}", key, self.calls());
    }

    async fn enter(&self, key: String) -> Result<(), ApiError> {
        let op = key.split(':').next().unwrap_or_default().to_string();
        self.calls.lock().unwrap().push(key.clone());
        let gate = self.gates.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.failing.lock().unwrap().contains(&op) {
            return Err(ApiError::Api {
                status: 500,
                detail: Some(format!("{} failed", op)),
            });
        }
        Ok(())
    }

    fn check_token(token: &str) -> Result<(), ApiError> {
        if token == TOKEN {
            Ok(())
        } else {
            Err(ApiError::Api {
                status: 401,
                detail: Some("Not authenticated".into()),
            })
        }
    }

    fn token_for(&self, email: &str) -> TokenResponse {
        match self.token_response.lock().unwrap().clone() {
            Some(v) => serde_json::from_value(v).unwrap(),
            None => TokenResponse {
                access_token: Some(format!("{}-{}", TOKEN, email)),
                token: None,
            },
        }
    }
}

#[async_trait]
impl ChatGateway for FakeGateway {
    async fn signup(&self, req: &SignupRequest) -> Result<TokenResponse, ApiError> {
        self.enter(format!(
            "signup:{}:{}",
            req.email,
            req.phone.as_deref().unwrap_or("-")
        ))
        .await?;
        Ok(self.token_for(&req.email))
    }

    async fn login(&self, req: &LoginRequest) -> Result<TokenResponse, ApiError> {
        self.enter(format!("login:{}", req.email)).await?;
        Ok(self.token_for(&req.email))
    }

    async fn logout(&self, token: &str) -> Result<(), ApiError> {
        self.enter(format!("logout:{}", token)).await
    }

    async fn current_user(&self, token: &str) -> Result<User, ApiError> {
        self.enter("current_user".to_string()).await?;
        Ok(User {
            email: Some(token.trim_start_matches("tok-").to_string()),
            ..User::default()
        })
    }

    async fn create_chat(&self, token: &str, title: &str) -> Result<ChatRecord, ApiError> {
        self.enter(format!("create_chat:{}", title)).await?;
        Self::check_token(token)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let record = ChatRecord {
            id,
            title: Some(title.to_string()),
            created_at: None,
            updated_at: None,
        };
        self.chats.lock().unwrap().insert(0, record.clone());
        Ok(record)
    }

    async fn list_chats(&self, token: &str) -> Result<Vec<ChatRecord>, ApiError> {
        self.enter("list_chats".to_string()).await?;
        Self::check_token(token)?;
        Ok(self.chats.lock().unwrap().clone())
    }

    async fn get_chat(&self, token: &str, chat_id: &str) -> Result<ChatRecord, ApiError> {
        self.enter(format!("get_chat:{}", chat_id)).await?;
        Self::check_token(token)?;
        self.chats
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == chat_id)
            .cloned()
            .ok_or(ApiError::Api {
                status: 404,
                detail: Some("Chat not found".into()),
            })
    }

    async fn update_chat(
        &self,
        token: &str,
        chat_id: &str,
        title: &str,
    ) -> Result<ChatRecord, ApiError> {
        self.enter(format!("update_chat:{}:{}", chat_id, title)).await?;
        Self::check_token(token)?;
        let mut chats = self.chats.lock().unwrap();
        match chats.iter_mut().find(|c| c.id == chat_id) {
            Some(c) => {
                c.title = Some(title.to_string());
                Ok(c.clone())
            }
            None => Err(ApiError::Api {
                status: 404,
                detail: Some("Chat not found".into()),
            }),
        }
    }

    async fn delete_chat(&self, token: &str, chat_id: &str) -> Result<(), ApiError> {
        self.enter(format!("delete_chat:{}", chat_id)).await?;
        Self::check_token(token)?;
        self.chats.lock().unwrap().retain(|c| c.id != chat_id);
        self.messages.lock().unwrap().remove(chat_id);
        Ok(())
    }

    async fn send_message(
        &self,
        token: &str,
        chat_id: &str,
        message: &str,
    ) -> Result<SendMessageResponse, ApiError> {
        self.enter(format!("send_message:{}:{}", chat_id, message))
            .await?;
        Self::check_token(token)?;
        if let Some(v) = self.send_response.lock().unwrap().clone() {
            return serde_json::from_value(v).map_err(|e| ApiError::Decode(e.to_string()));
        }
        let n = self.calls().len();
        let user = Message::user(format!("u{}", n), message);
        let assistant = Message::assistant(format!("a{}", n), format!("echo: {}", message));
        let mut all = self.messages.lock().unwrap();
        let log = all.entry(chat_id.to_string()).or_default();
        log.push(user.clone());
        log.push(assistant.clone());
        Ok(SendMessageResponse {
            user_message: Some(user),
            assistant_message: Some(assistant),
            chat: None,
        })
    }

    async fn list_messages(&self, token: &str, chat_id: &str) -> Result<Vec<Message>, ApiError> {
        self.enter(format!("list_messages:{}", chat_id)).await?;
        Self::check_token(token)?;
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(chat_id)
            .cloned()
            .unwrap_or_default())
    }
}
