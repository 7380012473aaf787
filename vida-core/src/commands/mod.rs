// src/commands/mod.rs
pub mod init;
mod api;

pub use api::{Commands, ExportFormat};

pub use init::{InitReport, ensure_initialized, ensure_initialized_at, ensure_initialized_once};
