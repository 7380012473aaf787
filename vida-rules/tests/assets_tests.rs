use std::fs;
use vida_rules::assets::{
    read_verified_or_embedded, rules_path, write_default_rule_books, DEFAULT_RULES_TOML,
    DEFAULT_RULES_TOML_NAME,
};
use vida_rules::safe_fallback_text;

#[test]
fn seeding_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_default_rule_books(dir.path()).unwrap();
    assert_eq!(first, vec![DEFAULT_RULES_TOML_NAME.to_string()]);
    let second = write_default_rule_books(dir.path()).unwrap();
    assert!(second.is_empty());
}

#[test]
fn locked_mode_restores_tampered_book() {
    let root = tempfile::tempdir().unwrap();
    let path = rules_path(root.path(), DEFAULT_RULES_TOML_NAME);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "name = \"tampered\"\nversion = \"0\"\n").unwrap();

    let text = read_verified_or_embedded(&path, DEFAULT_RULES_TOML_NAME, true).unwrap();
    assert_eq!(text.as_ref(), DEFAULT_RULES_TOML);
    assert_eq!(fs::read_to_string(&path).unwrap(), DEFAULT_RULES_TOML);
}

#[test]
fn unlocked_mode_keeps_local_edits() {
    let root = tempfile::tempdir().unwrap();
    let path = rules_path(root.path(), DEFAULT_RULES_TOML_NAME);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let local = "name = \"local\"\nversion = \"0\"\n";
    fs::write(&path, local).unwrap();

    let text = read_verified_or_embedded(&path, DEFAULT_RULES_TOML_NAME, false).unwrap();
    assert_eq!(text.as_ref(), local);
}

#[test]
fn missing_book_falls_back_to_embedded_and_is_written() {
    let root = tempfile::tempdir().unwrap();
    let path = rules_path(root.path(), DEFAULT_RULES_TOML_NAME);
    let text = read_verified_or_embedded(&path, DEFAULT_RULES_TOML_NAME, false).unwrap();
    assert_eq!(text.as_ref(), DEFAULT_RULES_TOML);
    assert!(path.exists());
}

#[test]
fn fallback_text_is_static_and_supportive() {
    let t = safe_fallback_text();
    assert!(t.starts_with("Gracias por compartir esto conmigo"));
    assert!(t.ends_with('?'));
}
