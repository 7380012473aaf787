//! services/retrieval.rs
//! Lexical retrieval over a static corpus.
//!
//! - `build_vector` is a bag-of-words placeholder, not a semantic embedding.
//! - The corpus is loaded once and never mutated; share it behind an `Arc`.
//! - Nothing here fails: unreadable corpus files degrade to an empty corpus.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Slots per vector, for queries and corpus entries alike.
pub const VECTOR_DIM: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextVector(Vec<f64>);

impl TextVector {
    pub fn from_weights(weights: Vec<f64>) -> Self {
        Self(weights)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Whitespace tokens, lower-cased; distinct tokens take slots in order of first
/// appearance and carry `count / total_tokens`. Tokens past the last slot are dropped.
pub fn build_vector(text: &str) -> TextVector {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered.split_whitespace().collect();
    let mut weights = vec![0.0; VECTOR_DIM];
    if tokens.is_empty() {
        return TextVector(weights);
    }

    let mut slot_of: HashMap<&str, usize> = HashMap::new();
    let mut counts = [0usize; VECTOR_DIM];
    for &tok in &tokens {
        let next = slot_of.len();
        let slot = *slot_of.entry(tok).or_insert(next);
        if slot < VECTOR_DIM {
            counts[slot] += 1;
        }
    }

    let total = tokens.len() as f64;
    for (w, c) in weights.iter_mut().zip(counts) {
        *w = c as f64 / total;
    }
    TextVector(weights)
}

/// Cosine similarity. Zero when lengths differ or either norm is zero.
pub fn similarity(a: &TextVector, b: &TextVector) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.0.iter().zip(&b.0) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }
    let s = dot / denom;
    if s.is_finite() { s } else { 0.0 }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusEntry {
    pub vector: TextVector,
    pub text: String,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalHit {
    pub source_index: usize,
    pub similarity_score: f64,
    pub text: String,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RagStats {
    pub documents: usize,
    pub embeddings: usize,
    pub status: &'static str,
}

// ----------------- On-disk shapes -----------------

#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingItem {
    Bare(Vec<f64>),
    Wrapped { vector: Vec<f64> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentItem {
    Bare(String),
    Wrapped {
        #[serde(default)]
        text: String,
        #[serde(default)]
        metadata: Option<Value>,
    },
}

/// Static, index-aligned corpus.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    entries: Vec<CorpusEntry>,
    raw_documents: usize,
    raw_embeddings: usize,
}

impl Corpus {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<CorpusEntry>) -> Self {
        let n = entries.len();
        Self {
            entries,
            raw_documents: n,
            raw_embeddings: n,
        }
    }

    /// Build a corpus from raw texts, vectorizing each with [`build_vector`].
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = texts
            .into_iter()
            .map(|t| {
                let text = t.into();
                CorpusEntry {
                    vector: build_vector(&text),
                    text,
                    metadata: None,
                }
            })
            .collect();
        Self::from_entries(entries)
    }

    /// Load `embeddings.json` + `documents.json`. Never fails: any problem yields an empty corpus.
    pub fn load(embeddings_path: &Path, documents_path: &Path) -> Self {
        let embeddings = match read_items::<EmbeddingItem>(embeddings_path) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("RAG disabled: cannot load {}: {e:#}", embeddings_path.display());
                return Self::empty();
            }
        };
        let documents = match read_items::<DocumentItem>(documents_path) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("RAG disabled: cannot load {}: {e:#}", documents_path.display());
                return Self::empty();
            }
        };

        let (raw_embeddings, raw_documents) = (embeddings.len(), documents.len());
        if raw_embeddings != raw_documents {
            tracing::warn!(
                embeddings = raw_embeddings,
                documents = raw_documents,
                "corpus files are not index-aligned; truncating to the shorter"
            );
        }

        let entries: Vec<CorpusEntry> = embeddings
            .into_iter()
            .zip(documents)
            .map(|(e, d)| {
                let vector = match e {
                    EmbeddingItem::Bare(v) | EmbeddingItem::Wrapped { vector: v } => v,
                };
                let (text, metadata) = match d {
                    DocumentItem::Bare(t) => (t, None),
                    DocumentItem::Wrapped { text, metadata } => (text, metadata),
                };
                CorpusEntry {
                    vector: TextVector(vector),
                    text,
                    metadata,
                }
            })
            .collect();

        if entries.is_empty() {
            tracing::warn!("RAG: corpus is empty; retrieval runs in empty mode");
        } else {
            tracing::info!("RAG: loaded {} corpus entries", entries.len());
        }

        Self {
            entries,
            raw_documents,
            raw_embeddings,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    /// Top `k` hits with similarity > 0, best first; ties keep corpus order.
    pub fn search(&self, query: &str, k: usize) -> Vec<RetrievalHit> {
        if self.entries.is_empty() {
            tracing::warn!("RAG: no corpus loaded; returning no hits");
            return Vec::new();
        }
        let q = build_vector(query);
        let mut scored: Vec<(usize, f64)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, similarity(&q, &e.vector)))
            .collect();
        // Stable sort keeps ascending index among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        scored
            .into_iter()
            .take(k)
            .filter(|(_, s)| *s > 0.0)
            .map(|(i, s)| {
                let e = &self.entries[i];
                RetrievalHit {
                    source_index: i,
                    similarity_score: s,
                    text: e.text.clone(),
                    metadata: e.metadata.clone(),
                }
            })
            .collect()
    }

    pub fn stats(&self) -> RagStats {
        RagStats {
            documents: self.raw_documents,
            embeddings: self.raw_embeddings,
            status: if self.entries.is_empty() { "empty" } else { "loaded" },
        }
    }
}

fn read_items<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    use anyhow::Context;
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
