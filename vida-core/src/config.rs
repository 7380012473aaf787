use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CoreConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub rules: RulesConfig,
}

impl CoreConfig {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("config.toml");
        let mut cfg = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            Self::from_toml_str(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            tracing::info!(
                "No config file found at {}. Using CoreConfig::default().",
                path.display()
            );
            CoreConfig::default()
        };
        cfg.resolve_paths(root);
        Ok(cfg)
    }

    /// Parse without resolving relative paths.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str::<CoreConfig>(text)?)
    }

    pub fn resolve_paths(&mut self, root: &Path) {
        self.storage.db_path = absolutize(root, &self.storage.db_path);
        self.retrieval.embeddings_path = absolutize(root, &self.retrieval.embeddings_path);
        self.retrieval.documents_path = absolutize(root, &self.retrieval.documents_path);
        self.audit.local_log = absolutize(root, &self.audit.local_log);
        self.audit.pending_path = absolutize(root, &self.audit.pending_path);
        self.rules.path = absolutize(root, &self.rules.path);
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "SystemConfig::default_name")]
    pub name: String,
    #[serde(default = "SystemConfig::default_version")]
    pub version: String,
}

impl SystemConfig {
    fn default_name() -> String {
        "vida".to_string()
    }

    fn default_version() -> String {
        "0.1.0".to_string()
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            version: Self::default_version(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_db_path")]
    pub db_path: PathBuf,
}

impl StorageConfig {
    fn default_db_path() -> PathBuf {
        PathBuf::from("cache/vida.db")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: Self::default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "RetrievalConfig::default_embeddings_path")]
    pub embeddings_path: PathBuf,
    #[serde(default = "RetrievalConfig::default_documents_path")]
    pub documents_path: PathBuf,
    #[serde(default = "RetrievalConfig::default_top_k")]
    pub top_k: usize,
}

impl RetrievalConfig {
    fn default_embeddings_path() -> PathBuf {
        PathBuf::from("corpus/embeddings.json")
    }

    fn default_documents_path() -> PathBuf {
        PathBuf::from("corpus/documents.json")
    }

    fn default_top_k() -> usize {
        3
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            embeddings_path: Self::default_embeddings_path(),
            documents_path: Self::default_documents_path(),
            top_k: Self::default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "ContextConfig::default_max_chats")]
    pub max_chats: usize,
    #[serde(default = "ContextConfig::default_max_messages_per_chat")]
    pub max_messages_per_chat: usize,
}

impl ContextConfig {
    fn default_max_chats() -> usize {
        3
    }

    fn default_max_messages_per_chat() -> usize {
        5
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chats: Self::default_max_chats(),
            max_messages_per_chat: Self::default_max_messages_per_chat(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "GenerationConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "GenerationConfig::default_endpoint")]
    pub endpoint: String,
    /// When set, requests go through `<proxy_url>/openai-proxy` and no key is sent.
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default = "GenerationConfig::default_model")]
    pub model: String,
    #[serde(default = "GenerationConfig::default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "GenerationConfig::default_temperature")]
    pub temperature: f32,
    #[serde(default = "GenerationConfig::default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "GenerationConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl GenerationConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_endpoint() -> String {
        "https://api.openai.com/v1/chat/completions".to_string()
    }

    fn default_model() -> String {
        "gpt-4o-mini".to_string()
    }

    fn default_api_key_env() -> String {
        "OPENAI_API_KEY".to_string()
    }

    fn default_temperature() -> f32 {
        0.7
    }

    fn default_max_tokens() -> u32 {
        1000
    }

    fn default_timeout_secs() -> u64 {
        30
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            endpoint: Self::default_endpoint(),
            proxy_url: None,
            model: Self::default_model(),
            api_key_env: Self::default_api_key_env(),
            temperature: Self::default_temperature(),
            max_tokens: Self::default_max_tokens(),
            timeout_secs: Self::default_timeout_secs(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "AuditConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "AuditConfig::default_local_log")]
    pub local_log: PathBuf,
    #[serde(default = "AuditConfig::default_local_cap")]
    pub local_cap: usize,
    #[serde(default = "AuditConfig::default_pending_path")]
    pub pending_path: PathBuf,
    /// Also write to the durable SQLite table.
    #[serde(default = "AuditConfig::default_remote_enabled")]
    pub remote_enabled: bool,
    #[serde(default = "AuditConfig::default_preview_len")]
    pub preview_len: usize,
}

impl AuditConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_local_log() -> PathBuf {
        PathBuf::from("logbook/risk_log.jsonl")
    }

    fn default_local_cap() -> usize {
        1000
    }

    fn default_pending_path() -> PathBuf {
        PathBuf::from("logbook/pending.jsonl")
    }

    fn default_remote_enabled() -> bool {
        true
    }

    fn default_preview_len() -> usize {
        160
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            local_log: Self::default_local_log(),
            local_cap: Self::default_local_cap(),
            pending_path: Self::default_pending_path(),
            remote_enabled: Self::default_remote_enabled(),
            preview_len: Self::default_preview_len(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "RulesConfig::default_path")]
    pub path: PathBuf,
    /// Restore the embedded rule book when the file on disk was edited.
    #[serde(default = "RulesConfig::default_locked")]
    pub locked: bool,
}

impl RulesConfig {
    fn default_path() -> PathBuf {
        PathBuf::from("rules").join(vida_rules::assets::DEFAULT_RULES_TOML_NAME)
    }

    fn default_locked() -> bool {
        true
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            locked: Self::default_locked(),
        }
    }
}

fn absolutize(root: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        root.join(value)
    }
}
