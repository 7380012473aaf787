//! services/generation.rs
//! Response generation collaborator.
//!
//! Two transports behind one [`Generator`] contract:
//! - proxy mode: `POST <proxy_url>/openai-proxy`, credentials injected server-side;
//! - direct mode: OpenAI-compatible chat completions with a bearer key from the environment.

use serde_json::{Value, json};
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::services::context::GlobalContextItem;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Vida, an emotional support assistant for people \
living with cancer and for those who care for them.

Guidelines:
- Be empathetic and supportive
- Avoid medical diagnoses or treatment recommendations
- Focus on emotional support
- Use a warm, caring tone";

const RAG_HEADER: &str = "\n\nContexto relevante (RAG):\n";
const GLOBAL_HEADER: &str = "\n\nContexto de conversaciones anteriores:\n";
const UNNAMED_CHAT: &str = "Chat anterior";

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("generation is disabled in configuration")]
    Disabled,

    #[error("API key not set (expected in ${0})")]
    MissingApiKey(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response body: {0}")]
    InvalidResponse(String),

    #[error("request timeout after {0} seconds")]
    Timeout(u64),
}

#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_text: String,
    pub retrieval_texts: Vec<String>,
    pub global_context: Vec<GlobalContextItem>,
}

impl GenerationRequest {
    /// User turn content: the text, then retrieval hits, then prior-conversation lines.
    pub fn user_content(&self) -> String {
        let mut out = self.user_text.clone();
        if !self.retrieval_texts.is_empty() {
            out.push_str(RAG_HEADER);
            let lines: Vec<String> = self.retrieval_texts.iter().map(|t| format!("- {t}")).collect();
            out.push_str(&lines.join("\n"));
        }
        if !self.global_context.is_empty() {
            out.push_str(GLOBAL_HEADER);
            let lines: Vec<String> = self
                .global_context
                .iter()
                .map(|c| {
                    let name = if c.chat_name.trim().is_empty() { UNNAMED_CHAT } else { &c.chat_name };
                    format!("[{name}]: {}", c.text)
                })
                .collect();
            out.push_str(&lines.join("\n"));
        }
        out
    }
}

/// Generation collaborator contract.
pub trait Generator: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// Blocking HTTP generator.
pub struct HttpGenerator {
    config: GenerationConfig,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpGenerator {
    /// Build from config; in direct mode the key is read from `config.api_key_env`.
    pub fn new(config: GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: GenerationConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self { config, api_key, client })
    }

    fn proxy_url(&self) -> Option<String> {
        self.config
            .proxy_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(|u| format!("{}/openai-proxy", u.trim_end_matches('/')))
    }

    fn body(&self, request: &GenerationRequest) -> Value {
        json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_content() },
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::Timeout(self.config.timeout_secs)
        } else {
            GenerationError::Http(format!("Request failed: {}", e))
        }
    }

    fn post(&self, url: &str, body: &Value, bearer: Option<&str>) -> Result<Value, GenerationError> {
        let mut req = self.client.post(url).json(body);
        if let Some(key) = bearer {
            req = req.bearer_auth(key);
        }
        let response = req.send().map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let payload: Value = match response.json::<Value>() {
            Ok(v) => v,
            Err(e) if status.is_success() => {
                return Err(GenerationError::InvalidResponse(e.to_string()));
            }
            Err(_) => Value::Null,
        };

        if !status.is_success() {
            let message = payload
                .pointer("/error/message")
                .or_else(|| payload.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
            return Err(GenerationError::Status { status: status.as_u16(), message });
        }
        Ok(payload)
    }
}

/// First choice's content; absent content reads as an empty response.
fn completion_text(completion: &Value) -> String {
    match completion.pointer("/choices/0/message/content").and_then(Value::as_str) {
        Some(t) => t.to_string(),
        None => {
            tracing::warn!("completion carried no message content");
            String::new()
        }
    }
}

impl Generator for HttpGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        if !self.config.enabled {
            return Err(GenerationError::Disabled);
        }
        let body = self.body(request);

        if let Some(url) = self.proxy_url() {
            tracing::debug!(%url, "generation via proxy");
            let envelope = self.post(&url, &body, None)?;
            let ok = envelope.get("success").and_then(Value::as_bool).unwrap_or(false);
            let data = envelope.get("data").filter(|d| !d.is_null());
            return match (ok, data) {
                (true, Some(d)) => Ok(completion_text(d)),
                _ => Err(GenerationError::InvalidResponse("proxy envelope without data".into())),
            };
        }

        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GenerationError::MissingApiKey(self.config.api_key_env.clone()))?;
        tracing::debug!(endpoint = %self.config.endpoint, "generation direct");
        let completion = self.post(&self.config.endpoint, &body, Some(key))?;
        Ok(completion_text(&completion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_without_content_is_empty() {
        assert_eq!(completion_text(&json!({"choices": []})), "");
        assert_eq!(
            completion_text(&json!({"choices": [{"message": {"content": "hola"}}]})),
            "hola"
        );
    }
}
