//! services/context.rs
//! Global context: recent messages from the user's other chats.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::services::chats::ChatStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalContextItem {
    pub chat_id: String,
    pub chat_name: String,
    pub message_id: String,
    pub text: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
}

/// Collect up to `max_messages_per_chat` messages from each of the `max_chats` most
/// recently updated chats other than `exclude_chat_id`, merged newest first.
///
/// Best-effort throughout: a chat whose messages cannot be read is skipped, and a
/// failing chat listing yields an empty result.
pub fn assemble_global_context(
    store: &dyn ChatStore,
    user_id: Option<&str>,
    exclude_chat_id: Option<&str>,
    max_chats: usize,
    max_messages_per_chat: usize,
) -> Vec<GlobalContextItem> {
    let Some(user_id) = user_id.filter(|u| !u.trim().is_empty()) else {
        return Vec::new();
    };

    let mut chats = match store.list_chats(user_id) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(user_id, "global context: listing chats failed: {e:#}");
            return Vec::new();
        }
    };
    chats.retain(|c| Some(c.id.as_str()) != exclude_chat_id);
    chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    chats.truncate(max_chats);

    let mut items = Vec::new();
    for chat in &chats {
        match store.get_messages(&chat.id, Some(max_messages_per_chat)) {
            Ok(messages) => items.extend(messages.into_iter().map(|m| GlobalContextItem {
                chat_id: chat.id.clone(),
                chat_name: chat.name.clone(),
                message_id: m.id,
                text: m.text,
                is_user: m.is_user,
                timestamp: m.created_at,
            })),
            Err(e) => {
                tracing::warn!(chat_id = %chat.id, "global context: skipping chat: {e:#}");
            }
        }
    }

    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    items
}
