//! services/turn.rs
//! Turn orchestrator: one user submission through the whole pipeline.
//!
//! STARTED → CONTEXT_GATHERED → GENERATED → RISK_EVALUATED → MITIGATED → LOGGED → PERSISTED,
//! or ERRORED when generation fails.
//!
//! Only validation errors come back as `Err`. Generation failure is a normal outcome
//! (`is_error = true`) with the submission kept retryable; every other collaborator
//! failure is logged and the turn carries on with a degraded result.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use vida_rules::RiskAssessment;

use crate::config::CoreConfig;
use crate::services::audit::{AuditStore, TurnRecord};
use crate::services::chats::{ChatStore, MessageStore, NewMessage};
use crate::services::context::{GlobalContextItem, assemble_global_context};
use crate::services::ethos::RiskAssessor;
use crate::services::generation::{DEFAULT_SYSTEM_PROMPT, GenerationRequest, Generator};
use crate::services::mitigation::{apply_mitigation, should_block};
use crate::services::retrieval::{Corpus, RetrievalHit};
use crate::services::session::{ChatSession, MessageId};
use crate::utils::logbook::preview;

/// Shown in place of a reply when generation failed.
pub const ERROR_REPLY: &str = "Lo siento, ocurrió un error. Por favor, intenta de nuevo más tarde.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnState {
    Started,
    ContextGathered,
    Generated,
    RiskEvaluated,
    Mitigated,
    Logged,
    Persisted,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    #[error("message text is empty")]
    EmptyMessage,
    #[error("user identity is required")]
    MissingUser,
    #[error("no failed turn with id {0}")]
    UnknownRetry(MessageId),
}

impl TurnError {
    /// Plain-language text for the person chatting.
    pub fn user_message(&self) -> &'static str {
        match self {
            TurnError::EmptyMessage => "Escribe un mensaje antes de enviarlo.",
            TurnError::MissingUser => "Necesitas iniciar sesión para enviar mensajes.",
            TurnError::UnknownRetry(_) => "Ese mensaje ya no se puede reintentar.",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub text: String,
    pub retry_of: Option<MessageId>,
}

impl TurnRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), retry_of: None }
    }

    pub fn retry(id: MessageId, text: impl Into<String>) -> Self {
        Self { text: text.into(), retry_of: Some(id) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub message_id: MessageId,
    pub final_text: String,
    pub is_error: bool,
    pub assessment: Option<RiskAssessment>,
    pub trace: Vec<TurnState>,
    /// Operator-facing cause; never shown as `final_text`.
    pub error: Option<String>,
    pub chat_id: Option<String>,
    pub record_id: Option<String>,
}

impl TurnOutcome {
    pub fn was_blocked(&self) -> bool {
        self.assessment.as_ref().is_some_and(should_block)
    }
}

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub system_prompt: String,
    pub top_k: usize,
    pub max_chats: usize,
    pub max_messages_per_chat: usize,
    pub preview_len: usize,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            top_k: 3,
            max_chats: 3,
            max_messages_per_chat: 5,
            preview_len: 160,
        }
    }
}

impl TurnSettings {
    pub fn from_config(cfg: &CoreConfig) -> Self {
        Self {
            system_prompt: cfg
                .generation
                .system_prompt
                .clone()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            top_k: cfg.retrieval.top_k,
            max_chats: cfg.context.max_chats,
            max_messages_per_chat: cfg.context.max_messages_per_chat,
            preview_len: cfg.audit.preview_len,
        }
    }
}

pub struct TurnOrchestrator {
    corpus: Arc<Corpus>,
    chats: Arc<dyn ChatStore>,
    messages: Arc<dyn MessageStore>,
    generator: Arc<dyn Generator>,
    assessor: Arc<RiskAssessor>,
    audit: Arc<dyn AuditStore>,
    settings: TurnSettings,
    chat_locks: ChatLocks,
}

type ChatLocks = Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// Handle on one chat's turn lock; the map entry goes away with the last lease.
struct ChatLockLease<'a> {
    locks: &'a ChatLocks,
    key: String,
    lock: Arc<Mutex<()>>,
}

impl ChatLockLease<'_> {
    fn acquire(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ChatLockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // New leases are only handed out under the map lock, so a count of 2 (map + us) is final.
        let ours = locks.get(&self.key).is_some_and(|l| Arc::ptr_eq(l, &self.lock));
        if ours && Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

impl TurnOrchestrator {
    pub fn new(
        corpus: Arc<Corpus>,
        chats: Arc<dyn ChatStore>,
        messages: Arc<dyn MessageStore>,
        generator: Arc<dyn Generator>,
        assessor: Arc<RiskAssessor>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            corpus,
            chats,
            messages,
            generator,
            assessor,
            audit,
            settings: TurnSettings::default(),
            chat_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_settings(mut self, settings: TurnSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &TurnSettings {
        &self.settings
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    /// Re-run a failed submission with its retained text.
    pub fn retry_turn(
        &self,
        session: &mut ChatSession,
        message_id: MessageId,
    ) -> Result<TurnOutcome, TurnError> {
        let text = session
            .pending_retry(&message_id)
            .map(|p| p.text.clone())
            .ok_or(TurnError::UnknownRetry(message_id))?;
        self.submit_turn(session, TurnRequest::retry(message_id, text))
    }

    pub fn submit_turn(
        &self,
        session: &mut ChatSession,
        request: TurnRequest,
    ) -> Result<TurnOutcome, TurnError> {
        // STARTED: validate before any side effect.
        let text = request.text.trim().to_string();
        if text.is_empty() {
            return Err(TurnError::EmptyMessage);
        }
        let user_id = session.user_id().trim().to_string();
        if user_id.is_empty() {
            return Err(TurnError::MissingUser);
        }
        if let Some(id) = request.retry_of {
            if session.pending_retry(&id).is_none() {
                return Err(TurnError::UnknownRetry(id));
            }
        }

        let mut trace = vec![TurnState::Started];
        let message_id = match request.retry_of {
            Some(id) => {
                session.remove_entry(id);
                id
            }
            None => MessageId::new(),
        };
        session.push_user(message_id, &text);

        let chat_id = self.ensure_chat(session, &user_id);
        let lock_key = match &chat_id {
            Some(c) => format!("chat:{c}"),
            None => format!("user:{user_id}"),
        };
        let lease = self.chat_lock(&lock_key);
        let _turn = lease.acquire();

        // CONTEXT_GATHERED
        let (hits, global) = self.gather_context(&text, &user_id, chat_id.as_deref());
        trace.push(TurnState::ContextGathered);
        tracing::debug!(%message_id, hits = hits.len(), global = global.len(), "context gathered");

        // GENERATED
        let request = GenerationRequest {
            system_prompt: self.settings.system_prompt.clone(),
            user_text: text.clone(),
            retrieval_texts: hits.iter().map(|h| h.text.clone()).collect(),
            global_context: global,
        };
        let raw = match self.generator.generate(&request) {
            Ok(r) => r,
            Err(e) => {
                let cause = format!("generation failed: {e}");
                tracing::error!(%message_id, "{cause}");
                trace.push(TurnState::Errored);
                session.mark_failed(message_id, &text, &cause);
                session.push_bot(message_id, ERROR_REPLY, true);
                return Ok(TurnOutcome {
                    message_id,
                    final_text: ERROR_REPLY.to_string(),
                    is_error: true,
                    assessment: None,
                    trace,
                    error: Some(cause),
                    chat_id,
                    record_id: None,
                });
            }
        };
        trace.push(TurnState::Generated);

        // RISK_EVALUATED
        let assessment = self.assessor.assess(&text, &raw, &hits);
        trace.push(TurnState::RiskEvaluated);

        // MITIGATED
        let was_blocked = should_block(&assessment);
        let final_text = apply_mitigation(&raw, &assessment).to_string();
        if was_blocked {
            tracing::warn!(
                %message_id,
                score = assessment.risk_score,
                issues = assessment.issues.len(),
                response = %preview(&raw, self.settings.preview_len),
                "response blocked; safe fallback used"
            );
        }
        trace.push(TurnState::Mitigated);

        // LOGGED
        let record = TurnRecord::new(
            &user_id,
            chat_id.as_deref(),
            &text,
            &raw,
            &assessment,
            was_blocked,
            &final_text,
        );
        let record_id = match self.audit.append_turn_record(&record) {
            Ok(()) => Some(record.record_id.clone()),
            Err(e) => {
                tracing::error!(record_id = %record.record_id, "audit write failed: {e:#}");
                None
            }
        };
        trace.push(TurnState::Logged);

        // PERSISTED
        self.persist(chat_id.as_deref(), &user_id, &text, &final_text);
        trace.push(TurnState::Persisted);

        if session.clear_pending(&message_id) {
            tracing::info!(%message_id, "retried turn completed");
        }
        session.push_bot(message_id, &final_text, false);

        tracing::info!(
            %message_id,
            level = %assessment.risk_level,
            score = assessment.risk_score,
            blocked = was_blocked,
            "turn completed"
        );

        Ok(TurnOutcome {
            message_id,
            final_text,
            is_error: false,
            assessment: Some(assessment),
            trace,
            error: None,
            chat_id,
            record_id,
        })
    }

    /// Session chat, or a new one. Creation failure leaves the turn without a chat.
    fn ensure_chat(&self, session: &mut ChatSession, user_id: &str) -> Option<String> {
        if let Some(c) = session.chat_id() {
            return Some(c.to_string());
        }
        match self.chats.create_chat(user_id, None) {
            Ok(chat) => {
                session.set_chat(chat.id.clone());
                Some(chat.id)
            }
            Err(e) => {
                tracing::warn!(user_id, "chat creation failed; turn will not be persisted: {e:#}");
                None
            }
        }
    }

    fn chat_lock(&self, key: &str) -> ChatLockLease<'_> {
        let mut locks = self.chat_locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = locks.entry(key.to_string()).or_default().clone();
        ChatLockLease { locks: &self.chat_locks, key: key.to_string(), lock }
    }

    /// Chat locks currently held or awaited.
    pub fn active_chat_locks(&self) -> usize {
        self.chat_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Retrieval and global context are independent reads; run them side by side.
    fn gather_context(
        &self,
        text: &str,
        user_id: &str,
        chat_id: Option<&str>,
    ) -> (Vec<RetrievalHit>, Vec<GlobalContextItem>) {
        let corpus: &Corpus = &self.corpus;
        let chats: &dyn ChatStore = self.chats.as_ref();
        let s = &self.settings;

        std::thread::scope(|scope| {
            let search = scope.spawn(|| corpus.search(text, s.top_k));
            let global = scope.spawn(|| {
                assemble_global_context(
                    chats,
                    Some(user_id),
                    chat_id,
                    s.max_chats,
                    s.max_messages_per_chat,
                )
            });
            let hits = search.join().unwrap_or_else(|_| {
                tracing::warn!("retrieval panicked; continuing without retrieval context");
                Vec::new()
            });
            let global = global.join().unwrap_or_else(|_| {
                tracing::warn!("global context panicked; continuing without it");
                Vec::new()
            });
            (hits, global)
        })
    }

    /// Both writes are attempted independently; failures are logged only.
    fn persist(&self, chat_id: Option<&str>, user_id: &str, text: &str, final_text: &str) {
        let Some(chat_id) = chat_id else {
            tracing::warn!("no chat for this turn; messages kept in session only");
            return;
        };
        if let Err(e) = self
            .messages
            .append_message(chat_id, &NewMessage::user(text, user_id))
        {
            tracing::error!(chat_id, "persisting user message failed: {e:#}");
        }
        if let Err(e) = self
            .messages
            .append_message(chat_id, &NewMessage::bot(final_text, user_id))
        {
            tracing::error!(chat_id, "persisting bot message failed: {e:#}");
        }
    }
}
