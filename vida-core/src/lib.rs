//! Per-turn pipeline for the Vida supportive chat assistant.
//!
//! retrieval + global context → generation → risk scoring → mitigation → audit → persistence.

pub mod commands;
pub mod config;
pub mod services;
pub mod utils;

pub use commands::{Commands, InitReport, ensure_initialized_once};
pub use config::CoreConfig;
