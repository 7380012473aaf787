use anyhow::{Context, Result};
use std::{
    borrow::Cow,
    fs,
    path::{Path, PathBuf},
};

/// === Embedded canon assets ===
pub const DEFAULT_RULES_TOML_NAME: &str = "risk_rules.toml";
pub const DEFAULT_RULES_TOML: &str = include_str!("../assets/risk_rules.toml");

const SAFE_FALLBACK: &str = include_str!("../assets/safe_fallback.txt");

/// Pre-authored reply shown instead of a blocked response.
/// Static on purpose: it never echoes flagged content back.
pub fn safe_fallback_text() -> &'static str {
    SAFE_FALLBACK.trim_end()
}

/// Return the embedded text for a known rule book, if any.
pub fn default_rule_book_text(name: &str) -> Option<&'static str> {
    match name {
        DEFAULT_RULES_TOML_NAME => Some(DEFAULT_RULES_TOML),
        _ => None,
    }
}

/// Seed missing default rule books into a destination directory (idempotent).
/// Returns a list of files that were created.
pub fn write_default_rule_books(dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("create_dir_all({:?})", dir))?;

    let mut created = Vec::new();
    for (name, text) in [(DEFAULT_RULES_TOML_NAME, DEFAULT_RULES_TOML)] {
        let path = dir.join(name);
        if !path.exists() {
            fs::write(&path, text).with_context(|| format!("write {:?}", path))?;
            created.push(name.to_string());
        }
    }
    Ok(created)
}

/// Verified reader with “locked” mode.
///
/// - File present and a canonical copy is embedded under `name`:
///   - hashes match → file contents.
///   - mismatch and `locked` → file is overwritten with the embedded copy, which is returned.
///   - mismatch and not locked → local edits win.
/// - File present, nothing embedded → file contents as-is.
/// - File missing → embedded copy (written to disk best-effort), or empty text.
pub fn read_verified_or_embedded(
    path: &Path,
    name: &str,
    locked: bool,
) -> Result<Cow<'static, str>> {
    let embedded_opt = default_rule_book_text(name);

    if path.exists() {
        let file_bytes = fs::read(path).with_context(|| format!("read {:?}", path))?;
        let Some(embedded) = embedded_opt else {
            return Ok(Cow::Owned(String::from_utf8_lossy(&file_bytes).to_string()));
        };
        let file_hash = blake3::hash(&file_bytes);
        let embedded_hash = blake3::hash(embedded.as_bytes());
        if file_hash == embedded_hash || !locked {
            return Ok(Cow::Owned(String::from_utf8_lossy(&file_bytes).to_string()));
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).ok();
        }
        fs::write(path, embedded).with_context(|| format!("restore embedded {:?}", path))?;
        return Ok(Cow::Borrowed(embedded));
    }

    match embedded_opt {
        Some(embedded) => {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).ok();
            }
            let _ = fs::write(path, embedded);
            Ok(Cow::Borrowed(embedded))
        }
        None => Ok(Cow::Owned(String::new())),
    }
}

/// Convenience: resolve `<root>/rules/<name>`
pub fn rules_path(root: &Path, name: &str) -> PathBuf {
    root.join("rules").join(name)
}
