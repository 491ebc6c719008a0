//! In-memory session state: history list, active chat, draft input and in-flight flags.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use crate::api::{ChatId, Message};
use crate::history::{ChatSummary, HistoryList};

/// Where the active chat is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveStatus {
    /// Selected; its messages are being fetched.
    LoadingMessages,
    /// Message log is loaded (or failed to load and stays empty).
    Ready,
}

/// The chat currently displayed, with its message log (oldest first).
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveChat {
    pub summary: ChatSummary,
    pub messages: Vec<Message>,
    pub status: ActiveStatus,
}

impl ActiveChat {
    pub(crate) fn loading(summary: ChatSummary) -> Self {
        Self {
            summary,
            messages: Vec::new(),
            status: ActiveStatus::LoadingMessages,
        }
    }

    pub(crate) fn ready(summary: ChatSummary) -> Self {
        Self {
            summary,
            messages: Vec::new(),
            status: ActiveStatus::Ready,
        }
    }

    pub fn id(&self) -> &str {
        &self.summary.id
    }

    pub fn is_loading(&self) -> bool {
        self.status == ActiveStatus::LoadingMessages
    }

    /// Backend messages first, then any messages appended locally while the fetch
    /// was in flight that the backend list does not already contain.
    pub(crate) fn merge_fetched(&mut self, fetched: Vec<Message>) {
        let known: HashSet<String> = fetched.iter().map(|m| m.id.clone()).collect();
        let local = std::mem::replace(&mut self.messages, fetched);
        self.messages
            .extend(local.into_iter().filter(|m| !known.contains(&m.id)));
        self.status = ActiveStatus::Ready;
    }
}

/// Point-in-time copy of the session for rendering.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub history: HistoryList,
    pub active: Option<ActiveChat>,
    /// Pending input text (kept after a failed send so it can be retried).
    pub draft: String,
}

pub(crate) struct SessionState {
    pub history: HistoryList,
    pub active: Option<ActiveChat>,
    pub draft: String,
    /// Bumped whenever the active chat changes; responses issued under an older value are stale.
    pub generation: u64,
}

impl SessionState {
    pub fn new(history: HistoryList) -> Self {
        Self {
            history,
            active: None,
            draft: String::new(),
            generation: 0,
        }
    }

    /// Make `chat` the active chat and return the new generation.
    pub fn activate(&mut self, chat: ActiveChat) -> u64 {
        self.generation += 1;
        self.active = Some(chat);
        self.generation
    }

    /// Clear the active chat (it stays in history).
    pub fn deactivate(&mut self) {
        self.generation += 1;
        self.active = None;
    }

    /// True if `chat_id` is still the active chat under `generation`.
    pub fn is_current(&self, generation: u64, chat_id: &str) -> bool {
        self.generation == generation && self.active_id() == Some(chat_id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.id())
    }

    /// Drop cached message logs from every history entry except `keep`. Returns true if any were dropped.
    pub fn clear_cached_messages_except(&mut self, keep: &str) -> bool {
        let mut changed = false;
        for c in self.history.iter_mut().filter(|c| c.id != keep) {
            if c.messages.take().is_some() {
                changed = true;
            }
        }
        changed
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            history: self.history.clone(),
            active: self.active.clone(),
            draft: self.draft.clone(),
        }
    }
}

#[derive(Default)]
struct Claims {
    creating: bool,
    sending: HashSet<ChatId>,
}

/// Operations currently waiting on the backend: at most one chat creation, one send per chat.
///
/// Lives outside the async state lock so `Claim::drop` can release a slot synchronously,
/// including when the caller drops the future mid-call.
#[derive(Default)]
pub(crate) struct InFlight {
    claims: Mutex<Claims>,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, Claims> {
        self.claims.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the single creation slot. None while another creation holds it.
    pub fn claim_create(&self) -> Option<Claim<'_>> {
        let mut claims = self.lock();
        if claims.creating {
            return None;
        }
        claims.creating = true;
        Some(Claim {
            owner: self,
            kind: ClaimKind::Create,
        })
    }

    /// Claim the send slot for `chat_id`. None while a send to that chat holds it.
    pub fn claim_send(&self, chat_id: &str) -> Option<Claim<'_>> {
        if !self.lock().sending.insert(chat_id.to_string()) {
            return None;
        }
        Some(Claim {
            owner: self,
            kind: ClaimKind::Send(chat_id.to_string()),
        })
    }
}

enum ClaimKind {
    Create,
    Send(ChatId),
}

/// Held for the duration of a backend call; releases its slot when dropped.
pub(crate) struct Claim<'a> {
    owner: &'a InFlight,
    kind: ClaimKind,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut claims = self.owner.lock();
        match &self.kind {
            ClaimKind::Create => claims.creating = false,
            ClaimKind::Send(id) => {
                claims.sending.remove(id);
            }
        }
    }
}
