//! Session reconciler: the one place that mutates the chat history list and the active chat.
//!
//! It merges backend results into the local history (persisted through `LocalHistoryStore`),
//! tracks which chat is active, and applies chat creation and message sends only after the
//! backend confirms them. Nothing is shown before confirmation: a failed create leaves no
//! placeholder chat, and a failed send leaves the message log untouched with the text kept
//! as the draft for a manual retry.
//!
//! Overlapping operations are rejected rather than queued: one chat creation at a time, and
//! one send per chat. Message fetches are never cancelled; a fetch that completes after the
//! user moved to another chat is discarded by comparing selection generations.
//!
//! Every failure is logged here at warn and also returned so the caller can decide what to
//! show. The state lock is never held across a backend call.

mod state;

pub use state::{ActiveChat, ActiveStatus, SessionSnapshot};

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::api::{ApiError, ChatGateway, ChatId, ChatRecord, Message, DEFAULT_CHAT_TITLE};
use crate::history::{self, ChatSummary, HistoryList, LocalHistoryStore};
use state::{InFlight, SessionState};

/// Assistant content used when the backend's reply is missing or malformed.
pub const FALLBACK_ASSISTANT_REPLY: &str = "No response from AI";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not logged in")]
    NotAuthenticated,
    #[error("a chat is already being created")]
    CreateInFlight,
    #[error("a message is already being sent to chat {0}")]
    SendInFlight(ChatId),
    #[error("unknown chat: {0}")]
    UnknownChat(ChatId),
    #[error("chat title cannot be empty")]
    EmptyTitle,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Result of a message fetch for a selected chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Messages were merged into the active chat.
    Applied,
    /// The user had moved on; the response was dropped.
    Stale,
}

/// A confirmed user message and the assistant's reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub chat_id: ChatId,
    pub user: Message,
    pub assistant: Message,
}

/// Coordinates the backend gateway, local history and the active chat.
pub struct SessionReconciler {
    gateway: Arc<dyn ChatGateway>,
    store: LocalHistoryStore,
    token: Option<String>,
    state: RwLock<SessionState>,
    in_flight: InFlight,
}

impl SessionReconciler {
    /// Build a reconciler; the history list starts from the persisted snapshot.
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        store: LocalHistoryStore,
        token: Option<String>,
    ) -> Self {
        let history = store.load();
        log::debug!("loaded {} chats from local history", history.len());
        Self {
            gateway,
            store,
            token: token.filter(|t| !t.trim().is_empty()),
            state: RwLock::new(SessionState::new(history)),
            in_flight: InFlight::default(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn history(&self) -> HistoryList {
        self.state.read().await.history.clone()
    }

    pub async fn active(&self) -> Option<ActiveChat> {
        self.state.read().await.active.clone()
    }

    /// Store pending input (e.g. what the user is typing).
    pub async fn set_draft(&self, text: impl Into<String>) {
        self.state.write().await.draft = text.into();
    }

    fn token(&self, op: &str) -> Result<&str, SessionError> {
        match self.token.as_deref() {
            Some(t) => Ok(t),
            None => {
                log::warn!("{}: no session token, skipping", op);
                Err(SessionError::NotAuthenticated)
            }
        }
    }

    /// Load the user's chats from the backend, replace the local history with them and
    /// select the first one. Returns the first chat's load outcome, or None when the
    /// backend has no chats. On failure the locally persisted history is kept.
    pub async fn initialize(&self) -> Result<Option<LoadOutcome>, SessionError> {
        let list = self.refresh_history().await?;
        match list.first() {
            Some(first) => self.select_chat(&first.id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Replace the local history with the backend's chat list, in the backend's order
    /// (later duplicates of an id dropped, capped), and persist it. The active chat is
    /// left alone. On failure the local history is kept.
    pub async fn refresh_history(&self) -> Result<HistoryList, SessionError> {
        let token = self.token("refresh chats")?;
        let records = match self.gateway.list_chats(token).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("failed to load chats, keeping local history: {}", e);
                return Err(e.into());
            }
        };

        let now = now_ms();
        let mut list: HistoryList = Vec::with_capacity(records.len());
        for record in &records {
            if list.iter().all(|c| c.id != record.id) {
                list.push(ChatSummary::from_record(record, now));
            }
        }
        list.truncate(history::HISTORY_CAP);

        let mut st = self.state.write().await;
        st.history = list;
        self.store.save(&st.history);
        log::info!("loaded {} chats from backend", st.history.len());
        Ok(st.history.clone())
    }

    /// Create a chat on the backend and make it active. `None` or a blank title uses "New Chat".
    ///
    /// Not optimistic: state changes only after the backend returns the new chat.
    pub async fn create_chat(&self, title: Option<&str>) -> Result<ChatSummary, SessionError> {
        let token = self.token("create chat")?;
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_CHAT_TITLE);

        let _claim = self
            .in_flight
            .claim_create()
            .ok_or(SessionError::CreateInFlight)?;

        let result = self.gateway.create_chat(token, title).await;

        let mut st = self.state.write().await;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                log::warn!("create chat failed: {}", e);
                return Err(e.into());
            }
        };

        let summary = ChatSummary::from_record(&record, now_ms());
        history::upsert_front(&mut st.history, summary.clone());
        st.clear_cached_messages_except(&summary.id);
        st.activate(ActiveChat::ready(summary.clone()));
        st.draft.clear();
        self.store.save(&st.history);
        log::info!("created chat {} ({})", summary.id, summary.title);
        Ok(summary)
    }

    /// Make a chat from the history list active and load its messages.
    ///
    /// The chat becomes active immediately with an empty log; the fetched messages are merged
    /// in only if it is still the active selection when they arrive.
    pub async fn select_chat(&self, chat_id: &str) -> Result<LoadOutcome, SessionError> {
        let token = self.token("select chat")?;

        let generation = {
            let mut st = self.state.write().await;
            let mut summary = st
                .history
                .iter()
                .find(|c| c.id == chat_id)
                .cloned()
                .ok_or_else(|| SessionError::UnknownChat(chat_id.to_string()))?;
            summary.messages = None;
            if st.clear_cached_messages_except(chat_id) {
                self.store.save(&st.history);
            }
            st.activate(ActiveChat::loading(summary))
        };
        log::debug!("selected chat {} (generation {})", chat_id, generation);

        let result = self.gateway.list_messages(token, chat_id).await;

        let mut st = self.state.write().await;
        if !st.is_current(generation, chat_id) {
            log::debug!("discarding stale messages for chat {}", chat_id);
            return Ok(LoadOutcome::Stale);
        }
        let Some(active) = st.active.as_mut() else {
            return Ok(LoadOutcome::Stale);
        };
        match result {
            Ok(messages) => {
                log::debug!("loaded {} messages for chat {}", messages.len(), chat_id);
                active.merge_fetched(messages);
                Ok(LoadOutcome::Applied)
            }
            Err(e) => {
                active.status = ActiveStatus::Ready;
                log::warn!("failed to load messages for chat {}: {}", chat_id, e);
                Err(e.into())
            }
        }
    }

    /// Send a message to the active chat, creating a chat first if none is active.
    ///
    /// Blank content is a no-op (`Ok(None)`, no backend call). On success the user message
    /// and the reply are appended in that order and the chat moves to the front of the
    /// history. On failure nothing is appended and the content is kept as the draft.
    pub async fn send_message(&self, content: &str) -> Result<Option<Exchange>, SessionError> {
        let content = content.trim();
        if content.is_empty() {
            log::debug!("ignoring empty message");
            return Ok(None);
        }
        let token = self.token("send message")?;

        let active_id = self.state.read().await.active_id().map(str::to_string);
        let chat_id = match active_id {
            Some(id) => id,
            None => {
                log::debug!("no active chat, creating one for the first message");
                match self.create_chat(None).await {
                    Ok(summary) => summary.id,
                    Err(e) => {
                        self.state.write().await.draft = content.to_string();
                        return Err(e);
                    }
                }
            }
        };

        let Some(claim) = self.in_flight.claim_send(&chat_id) else {
            log::warn!("send to chat {} rejected: previous send still in flight", chat_id);
            self.keep_draft(&chat_id, content).await;
            return Err(SessionError::SendInFlight(chat_id));
        };

        let result = self.gateway.send_message(token, &chat_id, content).await;
        drop(claim);

        let mut guard = self.state.write().await;
        let st = &mut *guard;
        let response = match result {
            Ok(r) => r,
            Err(e) => {
                log::warn!("send to chat {} failed: {}", chat_id, e);
                if st.active_id() == Some(chat_id.as_str()) {
                    st.draft = content.to_string();
                }
                return Err(e.into());
            }
        };

        if response.assistant_message.is_none() {
            log::warn!("chat {}: response had no assistant message, using fallback", chat_id);
        }
        let exchange = Exchange {
            chat_id: chat_id.clone(),
            user: response
                .user_message
                .unwrap_or_else(|| Message::user(local_message_id(), content)),
            assistant: response
                .assistant_message
                .unwrap_or_else(|| Message::assistant(local_message_id(), FALLBACK_ASSISTANT_REPLY)),
        };

        let now = now_ms();
        let title = response
            .chat
            .as_ref()
            .map(|c: &ChatRecord| c.title_or_default().to_string())
            .or_else(|| {
                st.history
                    .iter()
                    .find(|c| c.id == chat_id)
                    .map(|c| c.title.clone())
            })
            .unwrap_or_else(|| DEFAULT_CHAT_TITLE.to_string());
        let mut summary = ChatSummary::new(chat_id.clone(), title, now);

        if let Some(active) = st.active.as_mut().filter(|a| a.summary.id == chat_id) {
            active.messages.push(exchange.user.clone());
            active.messages.push(exchange.assistant.clone());
            active.summary.title = summary.title.clone();
            active.summary.ts = now;
            summary.messages = Some(active.messages.clone());
            st.draft.clear();
        } else {
            log::debug!("chat {} is no longer active; updating history only", chat_id);
        }
        history::upsert_front(&mut st.history, summary);
        self.store.save(&st.history);
        Ok(Some(exchange))
    }

    /// Keep `content` as the draft if `chat_id` is still the active chat.
    async fn keep_draft(&self, chat_id: &str, content: &str) {
        let mut st = self.state.write().await;
        if st.active_id() == Some(chat_id) {
            st.draft = content.to_string();
        }
    }

    /// Rename a chat on the backend, then update its history entry (and the active chat).
    pub async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<ChatSummary, SessionError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SessionError::EmptyTitle);
        }
        let token = self.token("rename chat")?;
        let record = match self.gateway.update_chat(token, chat_id, title).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("rename of chat {} failed: {}", chat_id, e);
                return Err(e.into());
            }
        };
        let new_title = record
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(title)
            .to_string();

        let mut guard = self.state.write().await;
        let st = &mut *guard;
        let summary = match st.history.iter_mut().find(|c| c.id == chat_id) {
            Some(entry) => {
                entry.title = new_title.clone();
                entry.clone()
            }
            None => {
                let summary = ChatSummary::from_record(&record, now_ms());
                let summary = ChatSummary {
                    title: new_title.clone(),
                    ..summary
                };
                history::upsert_front(&mut st.history, summary.clone());
                summary
            }
        };
        if let Some(active) = st.active.as_mut().filter(|a| a.summary.id == chat_id) {
            active.summary.title = new_title;
        }
        self.store.save(&st.history);
        log::info!("renamed chat {} to {}", chat_id, summary.title);
        Ok(summary)
    }

    /// Delete a chat on the backend, then drop it from history. Clears the active chat if it was this one.
    pub async fn delete_chat(&self, chat_id: &str) -> Result<(), SessionError> {
        let token = self.token("delete chat")?;
        if let Err(e) = self.gateway.delete_chat(token, chat_id).await {
            log::warn!("delete of chat {} failed: {}", chat_id, e);
            return Err(e.into());
        }
        let mut st = self.state.write().await;
        history::remove(&mut st.history, chat_id);
        if st.active_id() == Some(chat_id) {
            st.deactivate();
        }
        self.store.save(&st.history);
        log::info!("deleted chat {}", chat_id);
        Ok(())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn local_message_id() -> String {
    format!("local-{}", uuid::Uuid::new_v4())
}
