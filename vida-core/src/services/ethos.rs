//! services/ethos.rs
//! Rule-book backed risk assessor for generated responses.
//!
//! Loads the rule book from the data root (verified against the embedded copy when
//! locked) and scores candidate responses. Stateless per call.

use anyhow::{Context, Result};
use std::path::Path;

use vida_rules::{RiskAssessment, RiskEngine, read_verified_or_embedded};

use crate::config::RulesConfig;
use crate::services::retrieval::RetrievalHit;

pub struct RiskAssessor {
    engine: RiskEngine,
}

impl RiskAssessor {
    /// Assessor over the embedded default rule book.
    pub fn embedded() -> Result<Self> {
        let engine = RiskEngine::embedded().context("compiling embedded rule book")?;
        Ok(Self { engine })
    }

    pub fn from_engine(engine: RiskEngine) -> Self {
        Self { engine }
    }

    /// Load `[rules].path`. In locked mode a tampered file is restored to the embedded copy.
    pub fn from_config(cfg: &RulesConfig) -> Result<Self> {
        Self::load(&cfg.path, cfg.locked)
    }

    pub fn load(path: &Path, locked: bool) -> Result<Self> {
        let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
        let text = read_verified_or_embedded(path, name, locked)
            .with_context(|| format!("reading rule book {}", path.display()))?;
        if text.trim().is_empty() {
            tracing::warn!(path = %path.display(), "rule book empty or unknown; using embedded rules");
            return Self::embedded();
        }
        let book = vida_rules::parse_rule_book(&text)
            .with_context(|| format!("parsing rule book {}", path.display()))?;
        let engine = RiskEngine::new(book)
            .with_context(|| format!("compiling rule book {}", path.display()))?;
        tracing::info!(
            rule_book = %engine.rule_book().name,
            version = %engine.rule_book().version,
            locked,
            "risk rules loaded"
        );
        Ok(Self { engine })
    }

    pub fn assess(&self, user_text: &str, response: &str, hits: &[RetrievalHit]) -> RiskAssessment {
        let context: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        self.engine.evaluate(user_text, response, &context)
    }

    pub fn engine(&self) -> &RiskEngine {
        &self.engine
    }
}
