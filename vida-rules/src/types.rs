use serde::{Deserialize, Serialize};
use std::fmt;

/// Score at or above which a response is classified `High` (and blocked).
pub const HIGH_RISK_THRESHOLD: u32 = 8;
/// Score at or above which a response is classified at least `Medium`.
pub const MEDIUM_RISK_THRESHOLD: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Emotional,
    Technical,
    Regulatory,
    Bias,
}

impl RiskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Emotional => "emotional",
            RiskCategory::Technical => "technical",
            RiskCategory::Regulatory => "regulatory",
            RiskCategory::Bias => "bias",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding, tagged with the rule set that produced it.
///
/// `Display` renders the audit form: `[category] message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskIssue {
    /// `None` only for the empty-response short-circuit, which runs no rule set.
    pub category: Option<RiskCategory>,
    pub message: String,
}

impl fmt::Display for RiskIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            Some(c) => write!(f, "[{}] {}", c, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub risk_score: u32,
    pub issues: Vec<RiskIssue>,
    pub mitigation_narrative: String,
}

impl RiskAssessment {
    /// Issues rendered as audit strings, in detection order.
    pub fn issue_lines(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.to_string()).collect()
    }
}

// ----------------- Rule book -----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Substring match on the normalized text.
    #[default]
    Phrase,
    /// Regular expression evaluated against the raw response.
    Regex,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TriggerRule {
    #[serde(default)]
    pub kind: TriggerKind,
    pub pattern: String,
    pub weight: u32,
    pub issue: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleSet {
    pub category: RiskCategory,
    #[serde(default)]
    pub rules: Vec<TriggerRule>,
}

/// Emotional check: responses shorter than `min_chars` read as curt.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrevityRule {
    pub min_chars: usize,
    pub weight: u32,
    pub issue: String,
}

/// Emotional check: several stock closings packed into a short reply.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenericClosingRule {
    pub phrases: Vec<String>,
    pub min_matches: usize,
    pub max_chars: usize,
    pub weight: u32,
    pub issue: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleBook {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub brevity: Option<BrevityRule>,
    #[serde(default)]
    pub generic_closings: Option<GenericClosingRule>,
    #[serde(default)]
    pub sets: Vec<RuleSet>,
}

impl RuleBook {
    /// All rule sets for one category, in book order.
    pub fn sets_for(&self, category: RiskCategory) -> impl Iterator<Item = &RuleSet> {
        self.sets.iter().filter(move |s| s.category == category)
    }
}
