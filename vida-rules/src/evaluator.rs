use crate::assets::DEFAULT_RULES_TOML;
use crate::normalize::for_rules;
use crate::types::{
    RiskAssessment, RiskCategory, RiskIssue, RiskLevel, RuleBook, TriggerKind,
    HIGH_RISK_THRESHOLD, MEDIUM_RISK_THRESHOLD,
};
use anyhow::Context;
use regex::Regex;
use std::{fs, path::Path};

/// Order in which rule sets run; issues are reported in this order.
pub const CATEGORY_ORDER: [RiskCategory; 4] = [
    RiskCategory::Emotional,
    RiskCategory::Technical,
    RiskCategory::Regulatory,
    RiskCategory::Bias,
];

pub const EMPTY_RESPONSE_ISSUE: &str = "empty or invalid response";

const HIGH_NARRATIVE: &str =
    "Response blocked due to high risk. Manual review or a safe fallback message is required.";
const MEDIUM_NARRATIVE: &str =
    "Medium-risk response. Consider rewriting it in a more careful tone.";
const LOW_NARRATIVE: &str = "Safe response. No mitigation needed.";

#[derive(Debug, thiserror::Error)]
pub enum RuleBookError {
    #[error("rule book is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid regex trigger {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

// ----------------- I/O -----------------

pub fn parse_rule_book(text: &str) -> Result<RuleBook, RuleBookError> {
    Ok(toml::from_str(text)?)
}

pub fn load_rule_book(path: impl AsRef<Path>) -> anyhow::Result<RuleBook> {
    let path = path.as_ref();
    let content =
        fs::read_to_string(path).with_context(|| format!("reading rule book {}", path.display()))?;
    parse_rule_book(&content).with_context(|| format!("parsing rule book {}", path.display()))
}

// ----------------- Helpers -----------------

/// Fixed score → level mapping.
pub fn classify(score: u32) -> RiskLevel {
    if score >= HIGH_RISK_THRESHOLD {
        RiskLevel::High
    } else if score >= MEDIUM_RISK_THRESHOLD {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Operator-facing explanation; names at most 3 issues (high) or 2 (medium).
pub fn mitigation_narrative(level: RiskLevel, issues: &[RiskIssue]) -> String {
    let listed = |n: usize| {
        issues
            .iter()
            .take(n)
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    match level {
        RiskLevel::High => format!("{HIGH_NARRATIVE}\n\nDetected issues: {}", listed(3)),
        RiskLevel::Medium => format!("{MEDIUM_NARRATIVE}\n\nDetected issues: {}", listed(2)),
        RiskLevel::Low => LOW_NARRATIVE.to_string(),
    }
}

enum Matcher {
    Phrase(String),
    Pattern(Regex),
}

struct CompiledTrigger {
    matcher: Matcher,
    weight: u32,
    issue: String,
    pattern: String,
}

struct Tally {
    issues: Vec<RiskIssue>,
    score: u32,
}

impl Tally {
    fn hit(&mut self, category: RiskCategory, message: String, weight: u32) {
        self.issues.push(RiskIssue {
            category: Some(category),
            message,
        });
        self.score = self.score.saturating_add(weight);
    }
}

// ----------------- Core -----------------

/// Stateless scorer over a compiled [`RuleBook`].
pub struct RiskEngine {
    book: RuleBook,
    compiled: Vec<(RiskCategory, Vec<CompiledTrigger>)>,
}

impl RiskEngine {
    pub fn new(book: RuleBook) -> Result<Self, RuleBookError> {
        let mut compiled = Vec::new();
        for category in CATEGORY_ORDER {
            let mut triggers = Vec::new();
            for set in book.sets_for(category) {
                for rule in &set.rules {
                    if rule.pattern.trim().is_empty() {
                        continue;
                    }
                    let matcher = match rule.kind {
                        TriggerKind::Phrase => Matcher::Phrase(for_rules(&rule.pattern)),
                        TriggerKind::Regex => {
                            let re = Regex::new(&rule.pattern).map_err(|source| {
                                RuleBookError::InvalidPattern {
                                    pattern: rule.pattern.clone(),
                                    source,
                                }
                            })?;
                            Matcher::Pattern(re)
                        }
                    };
                    triggers.push(CompiledTrigger {
                        matcher,
                        weight: rule.weight,
                        issue: rule.issue.clone(),
                        pattern: rule.pattern.clone(),
                    });
                }
            }
            compiled.push((category, triggers));
        }
        Ok(Self { book, compiled })
    }

    /// Engine over the embedded default rule book.
    pub fn embedded() -> Result<Self, RuleBookError> {
        Self::new(parse_rule_book(DEFAULT_RULES_TOML)?)
    }

    pub fn rule_book(&self) -> &RuleBook {
        &self.book
    }

    /// Score a candidate response.
    ///
    /// `user_message` and `context` are carried for parity with the turn inputs; no trigger
    /// fires on them. An empty or whitespace-only response short-circuits to `High` with a
    /// single issue and a score equal to [`HIGH_RISK_THRESHOLD`]. Length thresholds count
    /// UTF-16 code units; the score saturates at `u32::MAX`.
    pub fn evaluate(&self, user_message: &str, response: &str, context: &[&str]) -> RiskAssessment {
        let _ = (user_message, context);

        if response.trim().is_empty() {
            let issues = vec![RiskIssue {
                category: None,
                message: EMPTY_RESPONSE_ISSUE.to_string(),
            }];
            return RiskAssessment {
                risk_level: RiskLevel::High,
                risk_score: HIGH_RISK_THRESHOLD,
                mitigation_narrative: mitigation_narrative(RiskLevel::High, &issues),
                issues,
            };
        }

        let normalized = for_rules(response);
        let length = response.to_lowercase().encode_utf16().count();
        let mut tally = Tally {
            issues: Vec::new(),
            score: 0,
        };

        for (category, triggers) in &self.compiled {
            for t in triggers {
                match &t.matcher {
                    Matcher::Phrase(p) => {
                        if normalized.contains(p.as_str()) {
                            tally.hit(*category, format!("{}: \"{}\"", t.issue, t.pattern), t.weight);
                        }
                    }
                    Matcher::Pattern(re) => {
                        if re.is_match(response) {
                            tally.hit(*category, t.issue.clone(), t.weight);
                        }
                    }
                }
            }
            if *category == RiskCategory::Emotional {
                self.structural_checks(&normalized, length, &mut tally);
            }
        }

        let risk_level = classify(tally.score);
        RiskAssessment {
            risk_level,
            risk_score: tally.score,
            mitigation_narrative: mitigation_narrative(risk_level, &tally.issues),
            issues: tally.issues,
        }
    }

    fn structural_checks(&self, normalized: &str, length: usize, tally: &mut Tally) {
        if let Some(b) = &self.book.brevity {
            if length < b.min_chars {
                tally.hit(RiskCategory::Emotional, b.issue.clone(), b.weight);
            }
        }
        if let Some(g) = &self.book.generic_closings {
            let matches = g
                .phrases
                .iter()
                .filter(|p| !p.is_empty() && normalized.contains(&for_rules(p)))
                .count();
            if matches >= g.min_matches && length < g.max_chars {
                tally.hit(RiskCategory::Emotional, g.issue.clone(), g.weight);
            }
        }
    }
}
