// vida-core/src/commands/init.rs

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::CoreConfig;

#[derive(Debug, Clone)]
pub struct InitReport {
    pub root: PathBuf,
    pub created: Vec<String>,
    pub existed: Vec<String>,
    pub config: CoreConfig,
}

// ---------- single global init gate ----------

static INIT: OnceCell<InitReport> = OnceCell::new();

/// Idempotent global initializer. Safe to call often.
/// Returns a &'static InitReport once initialization has completed.
pub fn ensure_initialized_once() -> Result<&'static InitReport> {
    INIT.get_or_try_init(ensure_initialized)
}

/// Resolve the data root. Allow override via VIDA_ROOT (tests/deployments).
pub fn vida_root() -> PathBuf {
    std::env::var_os("VIDA_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".vida"))
}

/// Public API: ensure initialized (idempotent). Safe to call often.
pub fn ensure_initialized() -> Result<InitReport> {
    ensure_initialized_at(&vida_root())
}

/// Same as [`ensure_initialized`] against an explicit root.
pub fn ensure_initialized_at(root: &Path) -> Result<InitReport> {
    let root = root.to_path_buf();
    let mut created = Vec::new();
    let mut existed = Vec::new();

    // Directories
    ensure_dir(&root, "", &mut created, &mut existed)?;
    ensure_dir(&root, "cache", &mut created, &mut existed)?;
    ensure_dir(&root, "corpus", &mut created, &mut existed)?;
    ensure_dir(&root, "logbook", &mut created, &mut existed)?;
    ensure_dir(&root, "rules", &mut created, &mut existed)?;

    // Config
    ensure_file(
        &root,
        "config.toml",
        Some(DEFAULT_CONFIG_TOML),
        &mut created,
        &mut existed,
    )?;

    // Empty corpus: RAG stays disabled until documents are dropped in.
    let corpus = root.join("corpus");
    ensure_file(&corpus, "embeddings.json", Some("[]\n"), &mut created, &mut existed)?;
    ensure_file(&corpus, "documents.json", Some("[]\n"), &mut created, &mut existed)?;

    // Default rule book
    for name in vida_rules::write_default_rule_books(root.join("rules"))? {
        created.push(format!("rules/{name}"));
    }

    let config = CoreConfig::load(&root)?;
    tracing::debug!(root = %root.display(), created = created.len(), "data root ready");

    Ok(InitReport {
        root,
        created,
        existed,
        config,
    })
}

fn ensure_dir(
    base: &Path,
    rel: &str,
    created: &mut Vec<String>,
    existed: &mut Vec<String>,
) -> Result<()> {
    let p = if rel.is_empty() { base.to_path_buf() } else { base.join(rel) };
    let label = if rel.is_empty() { ".".to_string() } else { rel.to_string() };
    if p.exists() {
        existed.push(label);
        return Ok(());
    }
    fs::create_dir_all(&p).with_context(|| format!("create_dir_all({:?})", p))?;
    created.push(label);
    Ok(())
}

fn ensure_file(
    base: &Path,
    rel_file: &str,
    content_if_absent: Option<&str>,
    created: &mut Vec<String>,
    existed: &mut Vec<String>,
) -> Result<()> {
    let p = base.join(rel_file);
    if p.exists() {
        existed.push(rel_file.to_string());
        return Ok(());
    }
    write_atomic(&p, content_if_absent.unwrap_or("").as_bytes())?;
    created.push(rel_file.to_string());
    Ok(())
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create_dir_all({:?})", parent))?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut f = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .with_context(|| format!("open temp file {:?}", tmp))?;
        f.write_all(bytes)?;
        f.flush()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("rename {:?} -> {:?}", tmp, path))?;
    Ok(())
}

// ---------- defaults ----------

const DEFAULT_CONFIG_TOML: &str = r#"[system]
name = "vida"
version = "0.1.0"

[storage]
db_path = "cache/vida.db"

[retrieval]
embeddings_path = "corpus/embeddings.json"
documents_path = "corpus/documents.json"
top_k = 3

[context]
max_chats = 3
max_messages_per_chat = 5

[generation]
enabled = true
endpoint = "https://api.openai.com/v1/chat/completions"
# proxy_url = "http://localhost:3001"
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"
temperature = 0.7
max_tokens = 1000
timeout_secs = 30

[audit]
enabled = true
local_log = "logbook/risk_log.jsonl"
local_cap = 1000
pending_path = "logbook/pending.jsonl"
remote_enabled = true
preview_len = 160

[rules]
path = "rules/risk_rules.toml"
locked = true
"#;
