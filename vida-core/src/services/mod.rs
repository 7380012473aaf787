// src/services/mod.rs

pub mod audit;
pub mod chats;        // SQLite chat + message store
pub mod context;      // global context from the user's other chats
pub mod ethos;        // rule-book risk assessor
pub mod generation;
pub mod mitigation;
pub mod retrieval;
pub mod session;
pub mod stats;
pub mod turn;         // the per-turn pipeline

// Public API
pub use audit::{AuditFilter, AuditStore, AuditTrail, JsonlAuditLog, SqliteAuditStore, TurnRecord};
pub use chats::{Chat, ChatStore, ChatUpdate, MessageStore, NewMessage, SqliteChatStore, StoredMessage};
pub use context::{GlobalContextItem, assemble_global_context};
pub use ethos::RiskAssessor;
pub use generation::{GenerationError, GenerationRequest, Generator, HttpGenerator};
pub use mitigation::{apply_mitigation, should_block};
pub use retrieval::{Corpus, RetrievalHit, TextVector, build_vector, similarity};
pub use session::{ChatSession, MessageId};
pub use stats::{ActivityStore, DayCount, GlobalStats, UserActivity, UserStats};
pub use turn::{TurnError, TurnOrchestrator, TurnOutcome, TurnRequest, TurnState};
