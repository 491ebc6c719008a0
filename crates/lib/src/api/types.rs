//! Wire types for the chat backend (requests, responses, list envelope, error body).

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Backend-assigned chat identifier (numeric ids are normalized to strings).
pub type ChatId = String;

pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single message in a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

impl Message {
    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Chat object as returned by create/list/get/update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    #[serde(deserialize_with = "de_id")]
    pub id: ChatId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl ChatRecord {
    /// Title, or "New Chat" when the backend sent none.
    pub fn title_or_default(&self) -> &str {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_CHAT_TITLE)
    }

    /// `updated_at`, else `created_at`, as Unix milliseconds. None when neither parses.
    pub fn timestamp_ms(&self) -> Option<i64> {
        self.updated_at
            .as_deref()
            .and_then(parse_timestamp_ms)
            .or_else(|| self.created_at.as_deref().and_then(parse_timestamp_ms))
    }
}

/// RFC 3339, or a naive ISO timestamp taken as UTC.
fn parse_timestamp_ms(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Response to POST /chats/{id}/messages. Each part is optional; a part with the
/// wrong shape is treated as missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessageResponse {
    #[serde(default, deserialize_with = "de_lenient")]
    pub user_message: Option<Message>,
    #[serde(default, deserialize_with = "de_lenient")]
    pub assistant_message: Option<Message>,
    #[serde(default, deserialize_with = "de_lenient")]
    pub chat: Option<ChatRecord>,
}

/// Authenticated user as returned by GET /auth/me. Unknown fields are kept in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(default, deserialize_with = "de_lenient")]
    pub id: Option<IdValue>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// An id field that may be a string or a number on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdValue(#[serde(deserialize_with = "de_id")] pub String);

#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Token response from signup/login. Some deployments use `token` instead of `access_token`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl TokenResponse {
    pub fn into_token(self) -> Option<String> {
        self.access_token
            .or(self.token)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TitleRequest<'a> {
    pub title: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct SendMessageRequest<'a> {
    pub message: &'a str,
}

/// The one envelope all list endpoints are decoded through: a bare array,
/// `{ "data": [...] }` or `{ "messages": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ListEnvelope<T> {
    Bare(Vec<T>),
    Data { data: Vec<T> },
    Messages { messages: Vec<T> },
}

impl<T> ListEnvelope<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            ListEnvelope::Bare(v) => v,
            ListEnvelope::Data { data } => data,
            ListEnvelope::Messages { messages } => messages,
        }
    }
}

/// Non-2xx body: `{ "detail": "..." }` or `{ "detail": [{ "msg": "...", ... }] }`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub detail: Option<Value>,
}

impl ErrorBody {
    /// Joined `msg` values for a structured detail list, the string itself for a string detail.
    pub fn detail_message(&self) -> Option<String> {
        match self.detail.as_ref()? {
            Value::String(s) => Some(s.clone()).filter(|s| !s.trim().is_empty()),
            Value::Array(items) => {
                let msgs: Vec<&str> = items
                    .iter()
                    .filter_map(|i| i.get("msg").and_then(|m| m.as_str()))
                    .collect();
                if msgs.is_empty() {
                    Some(Value::Array(items.clone()).to_string())
                } else {
                    Some(msgs.join(" | "))
                }
            }
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

fn de_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

fn de_lenient<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let v = Value::deserialize(d)?;
    Ok(serde_json::from_value(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_ids_become_strings() {
        let chat: ChatRecord = serde_json::from_value(json!({ "id": 42, "title": "A" })).unwrap();
        assert_eq!(chat.id, "42");
        let msg: Message =
            serde_json::from_value(json!({ "id": 7, "role": "assistant", "content": "hi" }))
                .unwrap();
        assert_eq!(msg.id, "7");
        assert_eq!(msg.role, Role::Assistant);
    }

    #[test]
    fn chat_title_defaults() {
        let chat: ChatRecord = serde_json::from_value(json!({ "id": "1", "title": null })).unwrap();
        assert_eq!(chat.title_or_default(), "New Chat");
        let chat: ChatRecord = serde_json::from_value(json!({ "id": "1", "title": "  " })).unwrap();
        assert_eq!(chat.title_or_default(), "New Chat");
    }

    #[test]
    fn timestamps_prefer_updated_at() {
        let chat: ChatRecord = serde_json::from_value(json!({
            "id": "1",
            "created_at": "1970-01-01T00:00:01Z",
            "updated_at": "1970-01-01T00:00:02.500"
        }))
        .unwrap();
        assert_eq!(chat.timestamp_ms(), Some(2500));

        let chat: ChatRecord = serde_json::from_value(json!({
            "id": "1",
            "created_at": "1970-01-01T00:00:01+00:00",
            "updated_at": "garbage"
        }))
        .unwrap();
        assert_eq!(chat.timestamp_ms(), Some(1000));
    }

    #[test]
    fn send_response_tolerates_bad_parts() {
        let res: SendMessageResponse = serde_json::from_value(json!({
            "user_message": { "id": "u1", "role": "user", "content": "hi" },
            "assistant_message": "oops",
        }))
        .unwrap();
        assert_eq!(res.user_message.unwrap().id, "u1");
        assert!(res.assistant_message.is_none());
        assert!(res.chat.is_none());
    }

    #[test]
    fn list_envelope_shapes() {
        let bare: ListEnvelope<ChatRecord> =
            serde_json::from_value(json!([{ "id": "1" }])).unwrap();
        assert_eq!(bare.into_vec().len(), 1);
        let data: ListEnvelope<ChatRecord> =
            serde_json::from_value(json!({ "data": [{ "id": "1" }, { "id": "2" }] })).unwrap();
        assert_eq!(data.into_vec().len(), 2);
        let msgs: ListEnvelope<Message> = serde_json::from_value(json!({
            "messages": [{ "id": "m", "role": "user", "content": "x" }]
        }))
        .unwrap();
        assert_eq!(msgs.into_vec()[0].id, "m");
    }

    #[test]
    fn error_detail_formats() {
        let body: ErrorBody = serde_json::from_value(json!({
            "detail": [{ "msg": "field required", "loc": ["body", "email"] }, { "msg": "too short" }]
        }))
        .unwrap();
        assert_eq!(body.detail_message().as_deref(), Some("field required | too short"));

        let body: ErrorBody =
            serde_json::from_value(json!({ "detail": "Invalid credentials" })).unwrap();
        assert_eq!(body.detail_message().as_deref(), Some("Invalid credentials"));

        let body: ErrorBody = serde_json::from_value(json!({})).unwrap();
        assert_eq!(body.detail_message(), None);
    }

    #[test]
    fn token_response_accepts_either_key() {
        let t: TokenResponse = serde_json::from_value(json!({ "access_token": "a" })).unwrap();
        assert_eq!(t.into_token().as_deref(), Some("a"));
        let t: TokenResponse = serde_json::from_value(json!({ "token": "b" })).unwrap();
        assert_eq!(t.into_token().as_deref(), Some("b"));
        let t: TokenResponse = serde_json::from_value(json!({ "access_token": "" })).unwrap();
        assert_eq!(t.into_token(), None);
    }
}
