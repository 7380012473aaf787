// src/utils/logbook.rs
use anyhow::{Context, Result};
use serde::{Serialize, de::DeserializeOwned};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Append one JSON value as a line. Creates parent directories as needed.
pub fn append_jsonl<S: Serialize>(path: &Path, val: &S) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create_dir_all({:?})", parent))?;
    }
    let json = serde_json::to_string(val)?;
    let mut f = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {:?}", path))?;
    writeln!(f, "{}", json)?;
    Ok(())
}

/// Read every parseable line, oldest first. Missing file reads as empty;
/// malformed lines are skipped with a warning.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let f = fs::File::open(path).with_context(|| format!("open {:?}", path))?;
    let mut out = Vec::new();
    for (n, line) in BufReader::new(f).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(v) => out.push(v),
            Err(e) => tracing::warn!(path = %path.display(), line = n + 1, "skipping malformed jsonl line: {e}"),
        }
    }
    Ok(out)
}

/// Replace the file's content with `vals`, one per line (temp file + rename).
pub fn rewrite_jsonl<S: Serialize>(path: &Path, vals: &[S]) -> Result<()> {
    let mut buf = String::new();
    for v in vals {
        buf.push_str(&serde_json::to_string(v)?);
        buf.push('\n');
    }
    crate::commands::init::write_atomic(path, buf.as_bytes())
}

/// Single-line preview: newlines flattened, cut at `max_chars` with an ellipsis.
pub fn preview(s: &str, max_chars: usize) -> String {
    let flat = s.replace(['\n', '\r'], " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut t: String = flat.chars().take(max_chars).collect();
    t.push('…');
    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_counts_chars_not_bytes() {
        assert_eq!(preview("áéíóú", 3), "áéí…");
        assert_eq!(preview("a\nb", 10), "a b");
    }
}
