//! services/mitigation.rs
//! Pass-through or fallback, decided by risk level alone.

use vida_rules::{RiskAssessment, RiskLevel, safe_fallback_text};

pub fn should_block(assessment: &RiskAssessment) -> bool {
    assessment.risk_level == RiskLevel::High
}

/// The original text unless blocked; blocked responses become the static fallback,
/// which never echoes the flagged content.
pub fn apply_mitigation<'a>(original: &'a str, assessment: &RiskAssessment) -> &'a str {
    if should_block(assessment) {
        safe_fallback_text()
    } else {
        original
    }
}
