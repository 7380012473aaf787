// src/commands/api.rs
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::commands::init::{InitReport, ensure_initialized_at, ensure_initialized_once};
use crate::config::CoreConfig;
use crate::services::audit::{
    AuditFilter, AuditStats, AuditStore, AuditTrail, FlushReport, SqliteAuditStore, TurnRecord,
    export_csv, export_json, statistics,
};
use crate::services::chats::{Chat, ChatStore, ChatUpdate, SqliteChatStore, StoredMessage};
use crate::services::ethos::RiskAssessor;
use crate::services::generation::{Generator, HttpGenerator};
use crate::services::retrieval::{Corpus, RagStats, RetrievalHit};
use crate::services::session::{ChatSession, MessageId};
use crate::services::stats::{
    DayCount, GlobalStats, UserActivity, UserStats, active_users, global_stats, messages_by_day,
    user_stats,
};
use crate::services::turn::{TurnError, TurnOrchestrator, TurnOutcome, TurnRequest, TurnSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

/// Everything wired from one data root.
pub struct Commands {
    root: PathBuf,
    config: CoreConfig,
    store: Arc<SqliteChatStore>,
    audit: Arc<AuditTrail>,
    orchestrator: TurnOrchestrator,
}

impl Commands {
    /// Wire against the global root (`VIDA_ROOT` or `.vida`).
    pub fn new() -> Result<Self> {
        let report = ensure_initialized_once()?;
        Self::from_report(report)
    }

    /// Initialize (idempotent) and wire against an explicit root.
    pub fn open(root: &Path) -> Result<Self> {
        Self::from_report(&ensure_initialized_at(root)?)
    }

    /// Same as [`Commands::open`] with a caller-supplied generator.
    pub fn open_with_generator(root: &Path, generator: Arc<dyn Generator>) -> Result<Self> {
        Self::build(&ensure_initialized_at(root)?, generator)
    }

    pub fn from_report(report: &InitReport) -> Result<Self> {
        let generator = HttpGenerator::new(report.config.generation.clone())
            .context("building HTTP generator")?;
        Self::build(report, Arc::new(generator))
    }

    fn build(report: &InitReport, generator: Arc<dyn Generator>) -> Result<Self> {
        let config = report.config.clone();

        let store = Arc::new(SqliteChatStore::open(&config.storage.db_path)?);
        let durable: Option<Arc<dyn AuditStore>> = if config.audit.remote_enabled {
            match SqliteAuditStore::open(&config.storage.db_path) {
                Ok(s) => Some(Arc::new(s)),
                Err(e) => {
                    tracing::warn!("durable audit store unavailable, local log only: {e:#}");
                    None
                }
            }
        } else {
            None
        };
        let audit = Arc::new(AuditTrail::from_config(&config.audit, durable));

        let corpus = Arc::new(Corpus::load(
            &config.retrieval.embeddings_path,
            &config.retrieval.documents_path,
        ));
        let assessor = Arc::new(RiskAssessor::from_config(&config.rules)?);

        let orchestrator = TurnOrchestrator::new(
            corpus,
            store.clone(),
            store.clone(),
            generator,
            assessor,
            audit.clone(),
        )
        .with_settings(TurnSettings::from_config(&config));

        Ok(Self {
            root: report.root.clone(),
            config,
            store,
            audit,
            orchestrator,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &TurnOrchestrator {
        &self.orchestrator
    }

    // ---------- turns ----------

    pub fn session(&self, user_id: &str, chat_id: Option<&str>) -> ChatSession {
        let s = ChatSession::new(user_id);
        match chat_id {
            Some(c) => s.with_chat(c),
            None => s,
        }
    }

    pub fn ask(&self, session: &mut ChatSession, text: &str) -> Result<TurnOutcome, TurnError> {
        self.orchestrator.submit_turn(session, TurnRequest::new(text))
    }

    pub fn retry(&self, session: &mut ChatSession, id: MessageId) -> Result<TurnOutcome, TurnError> {
        self.orchestrator.retry_turn(session, id)
    }

    // ---------- retrieval ----------

    pub fn search(&self, query: &str, k: Option<usize>) -> Vec<RetrievalHit> {
        let k = k.unwrap_or(self.config.retrieval.top_k);
        self.orchestrator.corpus().search(query, k)
    }

    pub fn rag_stats(&self) -> RagStats {
        self.orchestrator.corpus().stats()
    }

    // ---------- audit ----------

    pub fn audit_records(&self, filter: &AuditFilter) -> Result<Vec<TurnRecord>> {
        self.audit.query(filter)
    }

    pub fn audit_stats(&self, filter: &AuditFilter) -> Result<AuditStats> {
        Ok(statistics(&self.audit.query(filter)?))
    }

    pub fn export_audit(&self, filter: &AuditFilter, format: ExportFormat) -> Result<String> {
        let records = self.audit.query(filter)?;
        match format {
            ExportFormat::Json => export_json(&records),
            ExportFormat::Csv => Ok(export_csv(&records)),
        }
    }

    pub fn flush_audit(&self) -> Result<FlushReport> {
        self.audit.flush_pending()
    }

    pub fn pending_audit(&self) -> Result<usize> {
        self.audit.pending_count()
    }

    // ---------- chats ----------

    pub fn list_chats(&self, user_id: &str) -> Result<Vec<Chat>> {
        self.store.list_chats(user_id)
    }

    pub fn chat_messages(&self, chat_id: &str, limit: Option<usize>) -> Result<Vec<StoredMessage>> {
        self.store.get_messages(chat_id, limit)
    }

    pub fn rename_chat(&self, chat_id: &str, name: &str) -> Result<()> {
        self.store.update_chat(chat_id, &ChatUpdate { name: Some(name.to_string()) })
    }

    pub fn duplicate_chat(&self, chat_id: &str, name: Option<&str>) -> Result<Chat> {
        self.store.duplicate_chat(chat_id, name)
    }

    pub fn delete_chat(&self, chat_id: &str) -> Result<()> {
        self.store.delete_chat(chat_id)
    }

    pub fn user_stats(&self, user_id: &str) -> Result<UserStats> {
        user_stats(self.store.as_ref(), self.audit.as_ref(), user_id)
    }

    pub fn global_stats(&self) -> Result<GlobalStats> {
        global_stats(self.store.as_ref(), self.audit.as_ref(), Utc::now())
    }

    pub fn messages_by_day(&self, days: u32) -> Result<Vec<DayCount>> {
        messages_by_day(self.store.as_ref(), days, Utc::now())
    }

    pub fn active_users(&self, days: u32) -> Result<Vec<UserActivity>> {
        active_users(self.store.as_ref(), days, Utc::now())
    }
}
