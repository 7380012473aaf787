//! services/session.rs
//! Displayed conversation state and the pending-retry set for one chat session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identity of a user submission, assigned once and reused by retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MessageId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayedMessage {
    pub id: MessageId,
    pub text: String,
    pub is_user: bool,
    /// Bot replies point at the user message they answer.
    pub reply_to: Option<MessageId>,
    /// Bot entry standing in for a failed turn.
    pub is_error: bool,
    /// User entry whose turn failed and can be retried.
    pub failed: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRetry {
    pub text: String,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    user_id: String,
    chat_id: Option<String>,
    history: Vec<DisplayedMessage>,
    pending: HashMap<MessageId, PendingRetry>,
}

impl ChatSession {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            chat_id: None,
            history: Vec::new(),
            pending: HashMap::new(),
        }
    }

    /// Resume an existing chat.
    pub fn with_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref()
    }

    pub fn history(&self) -> &[DisplayedMessage] {
        &self.history
    }

    pub fn pending(&self) -> &HashMap<MessageId, PendingRetry> {
        &self.pending
    }

    pub fn pending_retry(&self, id: &MessageId) -> Option<&PendingRetry> {
        self.pending.get(id)
    }

    /// Most recent failed submission, if any.
    pub fn latest_failed(&self) -> Option<MessageId> {
        self.pending
            .iter()
            .max_by_key(|(_, p)| p.failed_at)
            .map(|(id, _)| *id)
    }

    pub(crate) fn set_chat(&mut self, chat_id: String) {
        self.chat_id = Some(chat_id);
    }

    pub(crate) fn push_user(&mut self, id: MessageId, text: &str) {
        self.history.push(DisplayedMessage {
            id,
            text: text.to_string(),
            is_user: true,
            reply_to: None,
            is_error: false,
            failed: false,
            timestamp: Utc::now(),
        });
    }

    pub(crate) fn push_bot(&mut self, reply_to: MessageId, text: &str, is_error: bool) {
        self.history.push(DisplayedMessage {
            id: MessageId::new(),
            text: text.to_string(),
            is_user: false,
            reply_to: Some(reply_to),
            is_error,
            failed: false,
            timestamp: Utc::now(),
        });
    }

    /// Drop a user entry and every reply to it, so a retry replaces rather than appends.
    pub(crate) fn remove_entry(&mut self, id: MessageId) {
        self.history
            .retain(|m| m.id != id && m.reply_to != Some(id));
    }

    pub(crate) fn mark_failed(&mut self, id: MessageId, text: &str, error: &str) {
        if let Some(m) = self.history.iter_mut().find(|m| m.id == id) {
            m.failed = true;
        }
        let attempts = self.pending.get(&id).map_or(0, |p| p.attempts) + 1;
        self.pending.insert(
            id,
            PendingRetry {
                text: text.to_string(),
                attempts,
                last_error: error.to_string(),
                failed_at: Utc::now(),
            },
        );
    }

    pub(crate) fn clear_pending(&mut self, id: &MessageId) -> bool {
        self.pending.remove(id).is_some()
    }
}
