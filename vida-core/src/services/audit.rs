//! services/audit.rs
//! Write-once audit trail for risk-evaluated turns.
//!
//! - [`TurnRecord`] is sealed with a blake3 checksum when built and never updated.
//! - [`JsonlAuditLog`] keeps the newest `cap` records in a local JSONL file.
//! - [`SqliteAuditStore`] is the durable, insert-only table.
//! - [`AuditTrail`] fans a record out to both and parks it in a pending buffer when the
//!   durable store is unreachable; `flush_pending` replays the buffer later.
//!
//! There is no update or delete path.

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;
use vida_rules::{RiskAssessment, RiskLevel};

use crate::config::AuditConfig;
use crate::services::chats::{fmt_ts, now_ts, parse_ts};
use crate::utils::logbook::{append_jsonl, read_jsonl, rewrite_jsonl};

/// Audit entity for one risk-evaluated turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub record_id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    /// `None` when the turn ran before a chat could be created.
    #[serde(default)]
    pub chat_id: Option<String>,
    pub user_message: String,
    pub raw_model_response: String,
    pub risk_level: RiskLevel,
    pub risk_score: u32,
    pub issues: Vec<String>,
    pub was_blocked: bool,
    pub final_response: String,
    /// blake3 hex over the record serialized with an empty checksum.
    #[serde(default)]
    pub checksum: String,
}

impl TurnRecord {
    pub fn new(
        user_id: &str,
        chat_id: Option<&str>,
        user_message: &str,
        raw_model_response: &str,
        assessment: &RiskAssessment,
        was_blocked: bool,
        final_response: &str,
    ) -> Self {
        let mut rec = Self {
            record_id: Uuid::new_v4().to_string(),
            timestamp: now_ts(),
            user_id: user_id.to_string(),
            chat_id: chat_id.map(str::to_string),
            user_message: user_message.to_string(),
            raw_model_response: raw_model_response.to_string(),
            risk_level: assessment.risk_level,
            risk_score: assessment.risk_score,
            issues: assessment.issue_lines(),
            was_blocked,
            final_response: final_response.to_string(),
            checksum: String::new(),
        };
        rec.checksum = rec.compute_checksum();
        rec
    }

    pub fn compute_checksum(&self) -> String {
        let mut unsealed = self.clone();
        unsealed.checksum.clear();
        // Serializing a plain struct of strings/numbers cannot fail.
        let bytes = serde_json::to_vec(&unsealed).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    /// True when the record still matches the checksum it was sealed with.
    pub fn verify(&self) -> bool {
        !self.checksum.is_empty() && self.checksum == self.compute_checksum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<String>,
    pub chat_id: Option<String>,
    pub level: Option<RiskLevel>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, r: &TurnRecord) -> bool {
        self.user_id.as_deref().is_none_or(|u| r.user_id == u)
            && self
                .chat_id
                .as_deref()
                .is_none_or(|c| r.chat_id.as_deref() == Some(c))
            && self.level.is_none_or(|l| r.risk_level == l)
    }

    /// Filter newest-first records and apply the limit.
    fn apply(&self, newest_first: Vec<TurnRecord>) -> Vec<TurnRecord> {
        let it = newest_first.into_iter().filter(|r| self.matches(r));
        match self.limit {
            Some(n) => it.take(n).collect(),
            None => it.collect(),
        }
    }
}

/// Audit collaborator contract.
pub trait AuditStore: Send + Sync {
    fn append_turn_record(&self, record: &TurnRecord) -> Result<()>;
    /// Newest first.
    fn query_turn_records(&self, filter: &AuditFilter) -> Result<Vec<TurnRecord>>;
}

// ----------------- Local JSONL -----------------

/// Capped local log: the newest `cap` records survive, older lines are pruned.
pub struct JsonlAuditLog {
    path: PathBuf,
    cap: usize,
    lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            path: path.into(),
            cap: cap.max(1),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock.lock().map_err(|_| anyhow!("audit log lock poisoned"))
    }
}

impl AuditStore for JsonlAuditLog {
    fn append_turn_record(&self, record: &TurnRecord) -> Result<()> {
        let _g = self.guard()?;
        append_jsonl(&self.path, record)
            .with_context(|| format!("appending audit record to {}", self.path.display()))?;

        let all: Vec<TurnRecord> = read_jsonl(&self.path)?;
        if all.len() > self.cap {
            let keep = &all[all.len() - self.cap..];
            rewrite_jsonl(&self.path, keep)?;
            tracing::debug!(pruned = all.len() - self.cap, "local audit log pruned");
        }
        Ok(())
    }

    fn query_turn_records(&self, filter: &AuditFilter) -> Result<Vec<TurnRecord>> {
        let _g = self.guard()?;
        let mut all: Vec<TurnRecord> = read_jsonl(&self.path)?;
        all.reverse();
        Ok(filter.apply(all))
    }
}

// ----------------- Durable SQLite -----------------

/// Insert-only `turn_records` table.
pub struct SqliteAuditStore {
    db: Mutex<Connection>,
}

impl SqliteAuditStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create_dir_all({:?})", parent))?;
        }
        let db = Connection::open(db_path)
            .with_context(|| format!("opening audit store {}", db_path.display()))?;
        Self::init(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self> {
        db.busy_timeout(std::time::Duration::from_secs(5))?;
        db.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS turn_records (
              record_id          TEXT PRIMARY KEY,
              timestamp          TEXT NOT NULL,   -- RFC3339 UTC
              user_id            TEXT NOT NULL,
              chat_id            TEXT,
              user_message       TEXT NOT NULL,
              raw_model_response TEXT NOT NULL,
              risk_level         TEXT NOT NULL,   -- low | medium | high
              risk_score         INTEGER NOT NULL,
              issues             TEXT NOT NULL,   -- JSON array of strings
              was_blocked        INTEGER NOT NULL,
              final_response     TEXT NOT NULL,
              checksum           TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_turns_user ON turn_records(user_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_turns_chat ON turn_records(chat_id, timestamp);
            "#,
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| anyhow!("audit store lock poisoned"))
    }
}

impl AuditStore for SqliteAuditStore {
    fn append_turn_record(&self, r: &TurnRecord) -> Result<()> {
        let issues = serde_json::to_string(&r.issues)?;
        self.conn()?.execute(
            r#"
            INSERT INTO turn_records(record_id, timestamp, user_id, chat_id, user_message,
              raw_model_response, risk_level, risk_score, issues, was_blocked, final_response, checksum)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            rusqlite::params![
                r.record_id,
                fmt_ts(&r.timestamp),
                r.user_id,
                r.chat_id,
                r.user_message,
                r.raw_model_response,
                r.risk_level.as_str(),
                r.risk_score,
                issues,
                r.was_blocked,
                r.final_response,
                r.checksum,
            ],
        )?;
        Ok(())
    }

    fn query_turn_records(&self, filter: &AuditFilter) -> Result<Vec<TurnRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT record_id, timestamp, user_id, chat_id, user_message, raw_model_response,
                    risk_level, risk_score, issues, was_blocked, final_response, checksum
             FROM turn_records
             ORDER BY timestamp DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let level: String = row.get(6)?;
            let issues: String = row.get(8)?;
            Ok((
                TurnRecord {
                    record_id: row.get(0)?,
                    timestamp: parse_ts(row, 1)?,
                    user_id: row.get(2)?,
                    chat_id: row.get(3)?,
                    user_message: row.get(4)?,
                    raw_model_response: row.get(5)?,
                    risk_level: RiskLevel::High,
                    risk_score: row.get(7)?,
                    issues: Vec::new(),
                    was_blocked: row.get(9)?,
                    final_response: row.get(10)?,
                    checksum: row.get(11)?,
                },
                level,
                issues,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (mut rec, level, issues) = row?;
            rec.risk_level = RiskLevel::parse(&level)
                .ok_or_else(|| anyhow!("unknown risk level {level:?} in record {}", rec.record_id))?;
            rec.issues = serde_json::from_str(&issues)
                .with_context(|| format!("decoding issues of record {}", rec.record_id))?;
            out.push(rec);
        }
        Ok(filter.apply(out))
    }
}

// ----------------- Trail -----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub replayed: usize,
    pub remaining: usize,
}

/// Local log + durable store + pending buffer.
pub struct AuditTrail {
    enabled: bool,
    local: Option<JsonlAuditLog>,
    durable: Option<Arc<dyn AuditStore>>,
    pending_path: Option<PathBuf>,
    pending_lock: Mutex<()>,
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditTrail {
    pub fn new() -> Self {
        Self {
            enabled: true,
            local: None,
            durable: None,
            pending_path: None,
            pending_lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::new() }
    }

    pub fn with_local(mut self, log: JsonlAuditLog) -> Self {
        self.local = Some(log);
        self
    }

    pub fn with_durable(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.durable = Some(store);
        self
    }

    pub fn with_pending(mut self, path: impl Into<PathBuf>) -> Self {
        self.pending_path = Some(path.into());
        self
    }

    /// Wire the trail from `[audit]`; `durable` is only used when `remote_enabled`.
    pub fn from_config(cfg: &AuditConfig, durable: Option<Arc<dyn AuditStore>>) -> Self {
        if !cfg.enabled {
            return Self::disabled();
        }
        let mut trail = Self::new()
            .with_local(JsonlAuditLog::new(&cfg.local_log, cfg.local_cap))
            .with_pending(&cfg.pending_path);
        if cfg.remote_enabled {
            if let Some(store) = durable {
                trail = trail.with_durable(store);
            }
        }
        trail
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Write one record. Succeeds when at least one durable write (local log,
    /// durable store, or pending buffer) took it.
    pub fn record(&self, rec: &TurnRecord) -> Result<()> {
        if !self.enabled {
            tracing::debug!(record_id = %rec.record_id, "audit disabled; record dropped");
            return Ok(());
        }

        let mut stored = false;
        let mut last_err: Option<anyhow::Error> = None;

        if let Some(local) = &self.local {
            match local.append_turn_record(rec) {
                Ok(()) => stored = true,
                Err(e) => {
                    tracing::warn!("local audit write failed: {e:#}");
                    last_err = Some(e);
                }
            }
        }

        if let Some(durable) = &self.durable {
            match durable.append_turn_record(rec) {
                Ok(()) => stored = true,
                Err(e) => {
                    tracing::warn!(record_id = %rec.record_id, "durable audit write failed, buffering: {e:#}");
                    match self.push_pending(rec) {
                        Ok(()) => stored = true,
                        Err(pe) => {
                            tracing::error!("pending audit buffer write failed: {pe:#}");
                            last_err = Some(pe);
                        }
                    }
                }
            }
        }

        if stored {
            return Ok(());
        }
        match last_err {
            Some(e) => Err(e.context("audit record was not stored anywhere")),
            None => bail!("audit trail has no store configured"),
        }
    }

    fn push_pending(&self, rec: &TurnRecord) -> Result<()> {
        let path = self
            .pending_path
            .as_ref()
            .ok_or_else(|| anyhow!("no pending buffer configured"))?;
        let _g = self.pending_lock.lock().map_err(|_| anyhow!("pending lock poisoned"))?;
        append_jsonl(path, rec)
    }

    pub fn pending_count(&self) -> Result<usize> {
        match &self.pending_path {
            Some(p) => Ok(read_jsonl::<TurnRecord>(p)?.len()),
            None => Ok(0),
        }
    }

    /// Replay buffered records into the durable store; failures stay buffered.
    pub fn flush_pending(&self) -> Result<FlushReport> {
        let (Some(path), Some(durable)) = (&self.pending_path, &self.durable) else {
            return Ok(FlushReport { replayed: 0, remaining: self.pending_count()? });
        };
        let _g = self.pending_lock.lock().map_err(|_| anyhow!("pending lock poisoned"))?;
        let pending: Vec<TurnRecord> = read_jsonl(path)?;
        if pending.is_empty() {
            return Ok(FlushReport { replayed: 0, remaining: 0 });
        }

        let mut remaining = Vec::new();
        let mut replayed = 0;
        for rec in pending {
            match durable.append_turn_record(&rec) {
                Ok(()) => replayed += 1,
                Err(e) => {
                    tracing::warn!(record_id = %rec.record_id, "replay failed: {e:#}");
                    remaining.push(rec);
                }
            }
        }
        rewrite_jsonl(path, &remaining)?;
        tracing::info!(replayed, remaining = remaining.len(), "pending audit buffer flushed");
        Ok(FlushReport { replayed, remaining: remaining.len() })
    }

    /// Newest first; the durable store is preferred, the local log is the fallback.
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<TurnRecord>> {
        if let Some(durable) = &self.durable {
            match durable.query_turn_records(filter) {
                Ok(v) => return Ok(v),
                Err(e) => tracing::warn!("durable audit query failed, using local log: {e:#}"),
            }
        }
        match &self.local {
            Some(local) => local.query_turn_records(filter),
            None => Ok(Vec::new()),
        }
    }
}

impl AuditStore for AuditTrail {
    fn append_turn_record(&self, record: &TurnRecord) -> Result<()> {
        self.record(record)
    }

    fn query_turn_records(&self, filter: &AuditFilter) -> Result<Vec<TurnRecord>> {
        self.query(filter)
    }
}

// ----------------- Reporting -----------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditStats {
    pub total: usize,
    pub by_level: LevelCounts,
    pub blocked: usize,
    pub average_risk_score: f64,
}

pub fn statistics(records: &[TurnRecord]) -> AuditStats {
    let mut s = AuditStats { total: records.len(), ..Default::default() };
    let mut total_score = 0u64;
    for r in records {
        match r.risk_level {
            RiskLevel::Low => s.by_level.low += 1,
            RiskLevel::Medium => s.by_level.medium += 1,
            RiskLevel::High => s.by_level.high += 1,
        }
        if r.was_blocked {
            s.blocked += 1;
        }
        total_score += u64::from(r.risk_score);
    }
    if !records.is_empty() {
        s.average_risk_score = total_score as f64 / records.len() as f64;
    }
    s
}

pub fn export_json(records: &[TurnRecord]) -> Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

const CSV_HEADERS: [&str; 7] = [
    "Timestamp",
    "Risk Level",
    "Risk Score",
    "Was Blocked",
    "Issues Count",
    "User Message (truncated)",
    "LLM Response (truncated)",
];

const CSV_TRUNCATE: usize = 50;

/// Header row plus one quoted row per record; empty input yields an empty string.
pub fn export_csv(records: &[TurnRecord]) -> String {
    if records.is_empty() {
        return String::new();
    }
    let quote = |cell: &str| format!("\"{}\"", cell.replace('"', "\"\""));
    let cut = |s: &str| s.chars().take(CSV_TRUNCATE).collect::<String>();

    let mut lines = vec![CSV_HEADERS.join(",")];
    for r in records {
        let cells = [
            r.timestamp.to_rfc3339(),
            r.risk_level.as_str().to_string(),
            r.risk_score.to_string(),
            if r.was_blocked { "Yes" } else { "No" }.to_string(),
            r.issues.len().to_string(),
            cut(&r.user_message),
            cut(&r.raw_model_response),
        ];
        lines.push(cells.iter().map(|c| quote(c)).collect::<Vec<_>>().join(","));
    }
    lines.join("\n")
}
