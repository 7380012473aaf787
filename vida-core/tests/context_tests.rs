use anyhow::{Result, bail};
use std::thread::sleep;
use std::time::Duration;

use vida_core::services::chats::{
    Chat, ChatStore, ChatUpdate, MessageStore, NewMessage, SqliteChatStore, StoredMessage,
};
use vida_core::services::context::assemble_global_context;

fn tick() {
    sleep(Duration::from_millis(3));
}

/// Delegates to SQLite but refuses to read one chat's messages, or to list at all.
struct Patchy {
    inner: SqliteChatStore,
    broken_chat: Option<String>,
    listing_fails: bool,
}

impl ChatStore for Patchy {
    fn create_chat(&self, user_id: &str, name: Option<&str>) -> Result<Chat> {
        self.inner.create_chat(user_id, name)
    }
    fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>> {
        self.inner.get_chat(chat_id)
    }
    fn list_chats(&self, user_id: &str) -> Result<Vec<Chat>> {
        if self.listing_fails {
            bail!("listing unavailable");
        }
        self.inner.list_chats(user_id)
    }
    fn update_chat(&self, chat_id: &str, update: &ChatUpdate) -> Result<()> {
        self.inner.update_chat(chat_id, update)
    }
    fn delete_chat(&self, chat_id: &str) -> Result<()> {
        self.inner.delete_chat(chat_id)
    }
    fn duplicate_chat(&self, chat_id: &str, new_name: Option<&str>) -> Result<Chat> {
        self.inner.duplicate_chat(chat_id, new_name)
    }
    fn get_messages(&self, chat_id: &str, limit: Option<usize>) -> Result<Vec<StoredMessage>> {
        if self.broken_chat.as_deref() == Some(chat_id) {
            bail!("messages unavailable for {chat_id}");
        }
        self.inner.get_messages(chat_id, limit)
    }
    fn last_message(&self, chat_id: &str) -> Result<Option<StoredMessage>> {
        self.inner.last_message(chat_id)
    }
}

/// Three chats for `u1`, appended in order so that `gamma` is the most recent.
fn seeded() -> (SqliteChatStore, Vec<Chat>) {
    let s = SqliteChatStore::open_in_memory().unwrap();
    let mut chats = Vec::new();
    for (name, texts) in [
        ("alpha", ["a1", "a2", "a3"]),
        ("beta", ["b1", "b2", "b3"]),
        ("gamma", ["g1", "g2", "g3"]),
    ] {
        let chat = s.create_chat("u1", Some(name)).unwrap();
        for t in texts {
            tick();
            s.append_message(&chat.id, &NewMessage::user(t, "u1")).unwrap();
        }
        chats.push(chat);
    }
    (s, chats)
}

#[test]
fn no_user_means_no_context() {
    let (s, _) = seeded();
    assert!(assemble_global_context(&s, None, None, 3, 5).is_empty());
    assert!(assemble_global_context(&s, Some("  "), None, 3, 5).is_empty());
}

#[test]
fn current_chat_is_excluded_and_items_are_newest_first() {
    let (s, chats) = seeded();
    let items = assemble_global_context(&s, Some("u1"), Some(&chats[2].id), 3, 5);

    assert!(items.iter().all(|i| i.chat_id != chats[2].id));
    let texts: Vec<&str> = items.iter().map(|i| i.text.as_str()).collect();
    assert_eq!(texts, ["b3", "b2", "b1", "a3", "a2", "a1"]);
    assert!(items.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    assert_eq!(items[0].chat_name, "beta");
}

#[test]
fn limits_apply_per_chat_and_to_chat_count() {
    let (s, chats) = seeded();
    let items = assemble_global_context(&s, Some("u1"), None, 2, 2);

    // Only gamma and beta (most recently updated), each contributing its first two messages.
    assert_eq!(items.len(), 4);
    assert!(items.iter().all(|i| i.chat_id != chats[0].id));
    let texts: Vec<&str> = items.iter().map(|i| i.text.as_str()).collect();
    assert_eq!(texts, ["g2", "g1", "b2", "b1"]);
}

#[test]
fn unreadable_chat_is_skipped() {
    let (inner, chats) = seeded();
    let store = Patchy {
        inner,
        broken_chat: Some(chats[1].id.clone()),
        listing_fails: false,
    };
    let items = assemble_global_context(&store, Some("u1"), None, 3, 5);
    assert_eq!(items.len(), 6);
    assert!(items.iter().all(|i| i.chat_id != chats[1].id));
}

#[test]
fn failed_listing_yields_empty_context() {
    let (inner, _) = seeded();
    let store = Patchy { inner, broken_chat: None, listing_fails: true };
    assert!(assemble_global_context(&store, Some("u1"), None, 3, 5).is_empty());
}
