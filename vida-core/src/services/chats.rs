// src/services/chats.rs
//! Chat + message store.
//!
//! - [`ChatStore`] / [`MessageStore`] are the seams the orchestrator and the
//!   context assembler depend on; tests swap in their own implementations.
//! - [`SqliteChatStore`] owns one SQLite connection (WAL) behind a mutex.
//! - Timestamps are RFC3339 UTC with fixed microsecond precision so text order is time order.

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::services::stats::{ActivityStore, DayCount, UserActivity};

pub const DEFAULT_CHAT_NAME: &str = "Nuevo Chat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub chat_id: String,
    pub text: String,
    pub is_user: bool,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub text: String,
    pub is_user: bool,
    pub user_id: Option<String>,
}

impl NewMessage {
    pub fn user(text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self { text: text.into(), is_user: true, user_id: Some(user_id.into()) }
    }

    /// Assistant reply, filed under the user the conversation belongs to.
    pub fn bot(text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self { text: text.into(), is_user: false, user_id: Some(user_id.into()) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatUpdate {
    pub name: Option<String>,
}

pub trait ChatStore: Send + Sync {
    fn create_chat(&self, user_id: &str, name: Option<&str>) -> Result<Chat>;
    fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>>;
    /// Most recently updated first.
    fn list_chats(&self, user_id: &str) -> Result<Vec<Chat>>;
    fn update_chat(&self, chat_id: &str, update: &ChatUpdate) -> Result<()>;
    fn delete_chat(&self, chat_id: &str) -> Result<()>;
    /// Copy a chat and every message in it, order and authorship preserved.
    fn duplicate_chat(&self, chat_id: &str, new_name: Option<&str>) -> Result<Chat>;
    /// Oldest first; with `limit`, the first `limit` messages.
    fn get_messages(&self, chat_id: &str, limit: Option<usize>) -> Result<Vec<StoredMessage>>;
    fn last_message(&self, chat_id: &str) -> Result<Option<StoredMessage>>;
}

pub trait MessageStore: Send + Sync {
    fn append_message(&self, chat_id: &str, msg: &NewMessage) -> Result<StoredMessage>;
}

pub(crate) fn now_ts() -> DateTime<Utc> {
    // Truncate so values round-trip through the fixed-precision text column unchanged.
    let now = Utc::now();
    let s = now.to_rfc3339_opts(SecondsFormat::Micros, true);
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(now)
}

pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// SQLite-backed chat and message store.
pub struct SqliteChatStore {
    db: Mutex<Connection>,
}

const CHAT_COLS: &str = "chat_id, user_id, name, created_at, updated_at, message_count";
const MSG_COLS: &str = "message_id, chat_id, text, is_user, user_id, created_at";

impl SqliteChatStore {
    /// Open/create the database and ensure schema.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create_dir_all({:?})", parent))?;
        }
        let db = Connection::open(db_path)
            .with_context(|| format!("opening chat store {}", db_path.display()))?;
        Self::init(db)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self> {
        db.busy_timeout(std::time::Duration::from_secs(5))?;
        db.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS chats (
              chat_id       TEXT PRIMARY KEY,
              user_id       TEXT NOT NULL,
              name          TEXT NOT NULL,
              created_at    TEXT NOT NULL,     -- RFC3339 UTC
              updated_at    TEXT NOT NULL,     -- RFC3339 UTC
              message_count INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_chats_user ON chats(user_id, updated_at);

            CREATE TABLE IF NOT EXISTS messages (
              seq         INTEGER PRIMARY KEY AUTOINCREMENT,  -- insertion order
              message_id  TEXT NOT NULL UNIQUE,
              chat_id     TEXT NOT NULL,
              text        TEXT NOT NULL,
              is_user     INTEGER NOT NULL,
              user_id     TEXT,
              created_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, created_at);
            "#,
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| anyhow!("chat store lock poisoned"))
    }

    fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
        Ok(Chat {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            created_at: parse_ts(row, 3)?,
            updated_at: parse_ts(row, 4)?,
            message_count: row.get::<_, i64>(5)?.max(0) as u64,
        })
    }

    fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
        Ok(StoredMessage {
            id: row.get(0)?,
            chat_id: row.get(1)?,
            text: row.get(2)?,
            is_user: row.get::<_, i64>(3)? != 0,
            user_id: row.get(4)?,
            created_at: parse_ts(row, 5)?,
        })
    }

    fn fetch_chat(db: &Connection, chat_id: &str) -> Result<Option<Chat>> {
        let sql = format!("SELECT {CHAT_COLS} FROM chats WHERE chat_id=?1");
        Ok(db
            .query_row(&sql, [chat_id], Self::chat_from_row)
            .optional()?)
    }
}

impl ChatStore for SqliteChatStore {
    fn create_chat(&self, user_id: &str, name: Option<&str>) -> Result<Chat> {
        if user_id.trim().is_empty() {
            bail!("user id is required to create a chat");
        }
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_CHAT_NAME)
            .to_string();
        let now = now_ts();
        let chat = Chat {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name,
            created_at: now,
            updated_at: now,
            message_count: 0,
        };
        let ts = fmt_ts(&now);
        self.conn()?.execute(
            "INSERT INTO chats(chat_id, user_id, name, created_at, updated_at, message_count)
             VALUES (?1, ?2, ?3, ?4, ?4, 0)",
            (&chat.id, &chat.user_id, &chat.name, &ts),
        )?;
        tracing::debug!(chat_id = %chat.id, "chat created");
        Ok(chat)
    }

    fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>> {
        let db = self.conn()?;
        Self::fetch_chat(&db, chat_id)
    }

    fn list_chats(&self, user_id: &str) -> Result<Vec<Chat>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {CHAT_COLS} FROM chats WHERE user_id=?1 ORDER BY updated_at DESC, rowid DESC"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([user_id], Self::chat_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn update_chat(&self, chat_id: &str, update: &ChatUpdate) -> Result<()> {
        let db = self.conn()?;
        let now = fmt_ts(&now_ts());
        let changed = match update.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => db.execute(
                "UPDATE chats SET name=?1, updated_at=?2 WHERE chat_id=?3",
                (name, &now, chat_id),
            )?,
            Some(_) => bail!("chat name cannot be blank"),
            None => db.execute(
                "UPDATE chats SET updated_at=?1 WHERE chat_id=?2",
                (&now, chat_id),
            )?,
        };
        if changed == 0 {
            bail!("chat not found: {chat_id}");
        }
        Ok(())
    }

    fn delete_chat(&self, chat_id: &str) -> Result<()> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute("DELETE FROM messages WHERE chat_id=?1", [chat_id])?;
        let removed = tx.execute("DELETE FROM chats WHERE chat_id=?1", [chat_id])?;
        tx.commit()?;
        if removed == 0 {
            bail!("chat not found: {chat_id}");
        }
        Ok(())
    }

    fn duplicate_chat(&self, chat_id: &str, new_name: Option<&str>) -> Result<Chat> {
        let mut db = self.conn()?;
        let source = Self::fetch_chat(&db, chat_id)?
            .ok_or_else(|| anyhow!("chat not found: {chat_id}"))?;

        let name = new_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} (copia)", source.name));
        let now = now_ts();
        let ts = fmt_ts(&now);
        let new_id = Uuid::new_v4().to_string();

        let tx = db.transaction()?;
        let messages: Vec<StoredMessage> = {
            let sql = format!(
                "SELECT {MSG_COLS} FROM messages WHERE chat_id=?1 ORDER BY created_at ASC, seq ASC"
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map([chat_id], Self::message_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute(
            "INSERT INTO chats(chat_id, user_id, name, created_at, updated_at, message_count)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
            (&new_id, &source.user_id, &name, &ts, messages.len() as i64),
        )?;
        for m in &messages {
            tx.execute(
                "INSERT INTO messages(message_id, chat_id, text, is_user, user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    Uuid::new_v4().to_string(),
                    &new_id,
                    &m.text,
                    m.is_user as i64,
                    &m.user_id,
                    fmt_ts(&m.created_at),
                ),
            )?;
        }
        tx.commit()?;

        Ok(Chat {
            id: new_id,
            user_id: source.user_id,
            name,
            created_at: now,
            updated_at: now,
            message_count: messages.len() as u64,
        })
    }

    fn get_messages(&self, chat_id: &str, limit: Option<usize>) -> Result<Vec<StoredMessage>> {
        let db = self.conn()?;
        let limit = match limit {
            Some(n) => i64::try_from(n).map_err(|_| anyhow!("limit out of range for i64: {n}"))?,
            None => -1, // SQLite: no limit
        };
        let sql = format!(
            "SELECT {MSG_COLS} FROM messages WHERE chat_id=?1
             ORDER BY created_at ASC, seq ASC LIMIT ?2"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map((chat_id, limit), Self::message_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn last_message(&self, chat_id: &str) -> Result<Option<StoredMessage>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {MSG_COLS} FROM messages WHERE chat_id=?1
             ORDER BY created_at DESC, seq DESC LIMIT 1"
        );
        Ok(db
            .query_row(&sql, [chat_id], Self::message_from_row)
            .optional()?)
    }
}

impl MessageStore for SqliteChatStore {
    fn append_message(&self, chat_id: &str, msg: &NewMessage) -> Result<StoredMessage> {
        if chat_id.trim().is_empty() {
            bail!("chat id is required to store a message");
        }
        let text = msg.text.trim();
        if text.is_empty() {
            bail!("message text cannot be empty");
        }

        let mut db = self.conn()?;
        let now = now_ts();
        let ts = fmt_ts(&now);
        let stored = StoredMessage {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            is_user: msg.is_user,
            user_id: msg.user_id.clone(),
            created_at: now,
        };

        let tx = db.transaction()?;
        let bumped = tx.execute(
            "UPDATE chats SET message_count = message_count + 1, updated_at=?1 WHERE chat_id=?2",
            (&ts, chat_id),
        )?;
        if bumped == 0 {
            bail!("chat not found: {chat_id}");
        }
        tx.execute(
            "INSERT INTO messages(message_id, chat_id, text, is_user, user_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                &stored.id,
                &stored.chat_id,
                &stored.text,
                stored.is_user as i64,
                &stored.user_id,
                &ts,
            ),
        )?;
        tx.commit()?;
        Ok(stored)
    }
}

impl ActivityStore for SqliteChatStore {
    fn user_activity(&self) -> Result<Vec<UserActivity>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT user_id, COUNT(*), COALESCE(SUM(message_count), 0), MIN(created_at), MAX(updated_at)
             FROM chats GROUP BY user_id ORDER BY MAX(updated_at) DESC, user_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UserActivity {
                user_id: row.get(0)?,
                chat_count: row.get::<_, i64>(1)?.max(0) as u64,
                message_count: row.get::<_, i64>(2)?.max(0) as u64,
                first_seen_at: parse_ts(row, 3)?,
                last_active_at: parse_ts(row, 4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn message_counts_by_day(&self, since: DateTime<Utc>) -> Result<Vec<DayCount>> {
        let db = self.conn()?;
        // Fixed-width RFC3339 UTC: the first 10 chars are the day, text order is time order.
        let mut stmt = db.prepare(
            "SELECT substr(created_at, 1, 10) AS day, COUNT(*) FROM messages
             WHERE created_at >= ?1 GROUP BY day ORDER BY day ASC",
        )?;
        let rows = stmt.query_map([fmt_ts(&since)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = Vec::new();
        for r in rows {
            let (day, count) = r?;
            let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                .with_context(|| format!("bad message date {day:?}"))?;
            out.push(DayCount { date, count: count.max(0) as u64 });
        }
        Ok(out)
    }
}
