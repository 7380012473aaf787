// Public modules so vida-core can use them
pub mod assets;
pub mod evaluator;
pub mod normalize;
pub mod types;

pub use assets::{
    default_rule_book_text, read_verified_or_embedded, safe_fallback_text,
    write_default_rule_books,
};
pub use evaluator::{
    classify, load_rule_book, mitigation_narrative, parse_rule_book, RiskEngine, RuleBookError,
};
pub use types::{
    RiskAssessment, RiskCategory, RiskIssue, RiskLevel, RuleBook, HIGH_RISK_THRESHOLD,
    MEDIUM_RISK_THRESHOLD,
};

/// --- Pure Rust API for callers that ship their own rule book as TOML text ---
pub fn evaluate_with_rule_book(
    rule_book_toml: &str,
    user_message: &str,
    response: &str,
) -> Result<RiskAssessment, RuleBookError> {
    let engine = RiskEngine::new(parse_rule_book(rule_book_toml)?)?;
    Ok(engine.evaluate(user_message, response, &[]))
}
