//! Text normalization used for trigger matching.
//!
//! Policy:
//! - Unicode-aware lowercasing (`char::to_lowercase`).
//! - Drop common zero-width characters (ZWS/ZWNJ/ZWJ/WJ/BOM) so they cannot split a phrase.
//! - Whitespace controls (`\n`, `\r`, `\t`) become a single space; other controls are dropped.
//!
//! Keep this logic single-sourced so phrase tables and callers agree on matching.

/// Normalize text for rule matching and case-insensitive search.
pub fn for_rules(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch.is_control() {
            if ch.is_whitespace() {
                out.push(' ');
            }
            continue;
        }
        for lc in ch.to_lowercase() {
            match lc {
                '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' => {}
                _ => out.push(lc),
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::for_rules;

    #[test]
    fn zero_width_cannot_split_a_phrase() {
        assert_eq!(for_rules("Te\u{200B} Diagnostico"), "te diagnostico");
    }

    #[test]
    fn newlines_keep_word_boundaries() {
        assert_eq!(for_rules("debes\ntomar"), "debes tomar");
    }
}
