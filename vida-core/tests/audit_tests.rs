use anyhow::{Result, bail};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use vida_core::services::audit::{
    AuditFilter, AuditStore, AuditTrail, JsonlAuditLog, SqliteAuditStore, TurnRecord, export_csv,
    export_json, statistics,
};
use vida_rules::{RiskAssessment, RiskCategory, RiskIssue, RiskLevel};

// ----------------------- helpers -----------------------

fn assessment(level: RiskLevel, score: u32, issues: &[&str]) -> RiskAssessment {
    RiskAssessment {
        risk_level: level,
        risk_score: score,
        issues: issues
            .iter()
            .map(|m| RiskIssue { category: Some(RiskCategory::Regulatory), message: m.to_string() })
            .collect(),
        mitigation_narrative: String::new(),
    }
}

fn record(user: &str, chat: Option<&str>, level: RiskLevel, score: u32) -> TurnRecord {
    let blocked = level == RiskLevel::High;
    TurnRecord::new(
        user,
        chat,
        "Tengo miedo",
        "respuesta del modelo",
        &assessment(level, score, &[]),
        blocked,
        if blocked { "fallback" } else { "respuesta del modelo" },
    )
}

/// Durable store that can be switched off to simulate an outage.
struct Flaky {
    up: AtomicBool,
    inner: SqliteAuditStore,
}

impl Flaky {
    fn new(up: bool) -> Arc<Self> {
        Arc::new(Self { up: AtomicBool::new(up), inner: SqliteAuditStore::open_in_memory().unwrap() })
    }
}

impl AuditStore for Flaky {
    fn append_turn_record(&self, record: &TurnRecord) -> Result<()> {
        if !self.up.load(Ordering::SeqCst) {
            bail!("durable store offline");
        }
        self.inner.append_turn_record(record)
    }

    fn query_turn_records(&self, filter: &AuditFilter) -> Result<Vec<TurnRecord>> {
        if !self.up.load(Ordering::SeqCst) {
            bail!("durable store offline");
        }
        self.inner.query_turn_records(filter)
    }
}

// ----------------------- records -----------------------

#[test]
fn records_are_sealed_and_tamper_evident() {
    let rec = TurnRecord::new(
        "u1",
        Some("c1"),
        "Tengo miedo",
        "Te diagnostico ansiedad",
        &assessment(RiskLevel::Medium, 4, &["possible diagnosis detected"]),
        false,
        "Te diagnostico ansiedad",
    );
    assert!(rec.verify());
    assert_eq!(rec.issues, vec!["[regulatory] possible diagnosis detected".to_string()]);

    let mut forged = rec.clone();
    forged.was_blocked = true;
    assert!(!forged.verify());

    let mut unsealed = rec;
    unsealed.checksum.clear();
    assert!(!unsealed.verify());
}

#[test]
fn sqlite_store_round_trips_and_is_write_once() {
    let store = SqliteAuditStore::open_in_memory().unwrap();
    let rec = record("u1", Some("c1"), RiskLevel::Medium, 4);
    store.append_turn_record(&rec).unwrap();

    let back = store.query_turn_records(&AuditFilter::default()).unwrap();
    assert_eq!(back, vec![rec.clone()]);
    assert!(back[0].verify());

    assert!(store.append_turn_record(&rec).is_err());
    assert_eq!(store.query_turn_records(&AuditFilter::default()).unwrap().len(), 1);
}

#[test]
fn local_log_keeps_newest_records_up_to_cap() {
    let dir = tempfile::tempdir().unwrap();
    let log = JsonlAuditLog::new(dir.path().join("risk_log.jsonl"), 3);
    let recs: Vec<TurnRecord> = (0..5).map(|i| record(&format!("u{i}"), None, RiskLevel::Low, 0)).collect();
    for r in &recs {
        log.append_turn_record(r).unwrap();
    }

    let kept = log.query_turn_records(&AuditFilter::default()).unwrap();
    let users: Vec<&str> = kept.iter().map(|r| r.user_id.as_str()).collect();
    assert_eq!(users, ["u4", "u3", "u2"]);
}

#[test]
fn filters_apply_to_user_chat_level_and_limit() {
    let store = SqliteAuditStore::open_in_memory().unwrap();
    store.append_turn_record(&record("u1", Some("a"), RiskLevel::Low, 0)).unwrap();
    store.append_turn_record(&record("u1", Some("b"), RiskLevel::High, 9)).unwrap();
    store.append_turn_record(&record("u2", Some("a"), RiskLevel::High, 8)).unwrap();

    let by_user = AuditFilter { user_id: Some("u1".into()), ..Default::default() };
    assert_eq!(store.query_turn_records(&by_user).unwrap().len(), 2);

    let by_chat = AuditFilter { chat_id: Some("a".into()), ..Default::default() };
    assert_eq!(store.query_turn_records(&by_chat).unwrap().len(), 2);

    let high_u1 = AuditFilter {
        user_id: Some("u1".into()),
        level: Some(RiskLevel::High),
        ..Default::default()
    };
    let got = store.query_turn_records(&high_u1).unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].risk_score, 9);

    let limited = AuditFilter { limit: Some(1), ..Default::default() };
    assert_eq!(store.query_turn_records(&limited).unwrap().len(), 1);
}

// ----------------------- trail -----------------------

#[test]
fn outage_buffers_records_and_flush_replays_them() {
    let dir = tempfile::tempdir().unwrap();
    let durable = Flaky::new(false);
    let trail = AuditTrail::new()
        .with_local(JsonlAuditLog::new(dir.path().join("risk_log.jsonl"), 100))
        .with_durable(durable.clone())
        .with_pending(dir.path().join("pending.jsonl"));

    let rec = record("u1", Some("c1"), RiskLevel::Medium, 5);
    trail.record(&rec).unwrap();
    assert_eq!(trail.pending_count().unwrap(), 1);

    // Durable side is down: queries fall back to the local log.
    let seen = trail.query(&AuditFilter::default()).unwrap();
    assert_eq!(seen.len(), 1);

    // Still down: nothing replays, nothing is lost.
    let report = trail.flush_pending().unwrap();
    assert_eq!((report.replayed, report.remaining), (0, 1));

    durable.up.store(true, Ordering::SeqCst);
    let report = trail.flush_pending().unwrap();
    assert_eq!((report.replayed, report.remaining), (1, 0));
    assert_eq!(trail.pending_count().unwrap(), 0);

    let stored = durable.query_turn_records(&AuditFilter::default()).unwrap();
    assert_eq!(stored, vec![rec]);
}

#[test]
fn trail_without_any_store_reports_failure() {
    let durable = Flaky::new(false);
    let trail = AuditTrail::new().with_durable(durable);
    assert!(trail.record(&record("u1", None, RiskLevel::Low, 0)).is_err());
}

#[test]
fn disabled_trail_accepts_and_drops() {
    let trail = AuditTrail::disabled();
    assert!(!trail.is_enabled());
    trail.record(&record("u1", None, RiskLevel::Low, 0)).unwrap();
    assert!(trail.query(&AuditFilter::default()).unwrap().is_empty());
}

// ----------------------- reporting -----------------------

#[test]
fn statistics_count_levels_blocks_and_average() {
    let recs = vec![
        record("u1", None, RiskLevel::Low, 0),
        record("u1", None, RiskLevel::Medium, 4),
        record("u1", None, RiskLevel::High, 8),
        record("u1", None, RiskLevel::High, 12),
    ];
    let s = statistics(&recs);
    assert_eq!(s.total, 4);
    assert_eq!((s.by_level.low, s.by_level.medium, s.by_level.high), (1, 1, 2));
    assert_eq!(s.blocked, 2);
    assert!((s.average_risk_score - 6.0).abs() < 1e-9);

    assert_eq!(statistics(&[]).average_risk_score, 0.0);
}

#[test]
fn csv_export_quotes_and_truncates() {
    assert_eq!(export_csv(&[]), "");

    let long = "a".repeat(80);
    let rec = TurnRecord::new(
        "u1",
        None,
        "dijo \"hola\"",
        &long,
        &assessment(RiskLevel::High, 9, &["x", "y"]),
        true,
        "fallback",
    );
    let csv = export_csv(std::slice::from_ref(&rec));
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines[0],
        "Timestamp,Risk Level,Risk Score,Was Blocked,Issues Count,User Message (truncated),LLM Response (truncated)"
    );
    let expected = format!(
        "\"{}\",\"high\",\"9\",\"Yes\",\"2\",\"dijo \"\"hola\"\"\",\"{}\"",
        rec.timestamp.to_rfc3339(),
        "a".repeat(50)
    );
    assert_eq!(lines[1], expected);
}

#[test]
fn json_export_is_parseable() {
    let recs = vec![record("u1", Some("c1"), RiskLevel::Low, 0)];
    let text = export_json(&recs).unwrap();
    let parsed: Vec<TurnRecord> = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, recs);
}
