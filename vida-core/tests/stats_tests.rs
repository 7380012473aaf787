use anyhow::{Result, bail};
use chrono::{Duration, Utc};
use std::thread::sleep;

use vida_core::services::audit::{AuditFilter, AuditStore, SqliteAuditStore, TurnRecord};
use vida_core::services::chats::{ChatStore, MessageStore, NewMessage, SqliteChatStore};
use vida_core::services::stats::{
    ActivityStore, active_users, global_stats, messages_by_day, user_stats,
};
use vida_rules::{RiskAssessment, RiskLevel};

struct AuditDown;

impl AuditStore for AuditDown {
    fn append_turn_record(&self, _: &TurnRecord) -> Result<()> {
        bail!("audit offline")
    }
    fn query_turn_records(&self, _: &AuditFilter) -> Result<Vec<TurnRecord>> {
        bail!("audit offline")
    }
}

fn calm() -> RiskAssessment {
    RiskAssessment {
        risk_level: RiskLevel::Low,
        risk_score: 0,
        issues: Vec::new(),
        mitigation_narrative: String::new(),
    }
}

/// ana: two chats, three messages. luis: one chat, one message.
fn seeded() -> SqliteChatStore {
    let s = SqliteChatStore::open_in_memory().unwrap();
    let a1 = s.create_chat("ana", None).unwrap();
    s.append_message(&a1.id, &NewMessage::user("tengo miedo", "ana")).unwrap();
    s.append_message(&a1.id, &NewMessage::bot("estoy aquí", "ana")).unwrap();
    let a2 = s.create_chat("ana", Some("otra")).unwrap();
    s.append_message(&a2.id, &NewMessage::user("hola", "ana")).unwrap();
    sleep(std::time::Duration::from_millis(3));
    let l1 = s.create_chat("luis", None).unwrap();
    s.append_message(&l1.id, &NewMessage::user("buenas", "luis")).unwrap();
    s
}

#[test]
fn user_activity_groups_chats_by_owner() {
    let s = seeded();
    let users = s.user_activity().unwrap();
    let ids: Vec<_> = users.iter().map(|u| u.user_id.as_str()).collect();
    assert_eq!(ids, vec!["luis", "ana"]);
    assert_eq!((users[1].chat_count, users[1].message_count), (2, 3));
    assert_eq!((users[0].chat_count, users[0].message_count), (1, 1));
    assert!(users[1].first_seen_at <= users[1].last_active_at);
}

#[test]
fn global_stats_totals_and_active_window() {
    let s = seeded();
    let audit = SqliteAuditStore::open_in_memory().unwrap();
    for user in ["ana", "ana", "luis"] {
        let r = TurnRecord::new(user, None, "hola", "respuesta", &calm(), false, "respuesta");
        audit.append_turn_record(&r).unwrap();
    }

    let now = Utc::now();
    let g = global_stats(&s, &audit, now).unwrap();
    assert_eq!(g.total_users, 2);
    assert_eq!(g.total_chats, 3);
    assert_eq!(g.total_messages, 4);
    assert_eq!(g.total_risk_events, 3);
    assert_eq!(g.active_users, 2);

    let later = global_stats(&s, &audit, now + Duration::days(8)).unwrap();
    assert_eq!(later.active_users, 0);
    assert_eq!(later.total_users, 2);
}

#[test]
fn unreadable_audit_counts_zero_risk_events() {
    let s = seeded();
    let g = global_stats(&s, &AuditDown, Utc::now()).unwrap();
    assert_eq!(g.total_risk_events, 0);
    assert_eq!(g.total_messages, 4);

    let u = user_stats(&s, &AuditDown, "ana").unwrap();
    assert_eq!((u.chat_count, u.total_messages, u.risk_events_count), (2, 3, 0));
}

#[test]
fn messages_by_day_is_zero_filled_and_ends_today() {
    let s = seeded();
    let now = Utc::now();
    let days = messages_by_day(&s, 5, now).unwrap();
    assert_eq!(days.len(), 5);
    assert_eq!(days[4].date, now.date_naive());
    for pair in days.windows(2) {
        assert_eq!(pair[1].date - pair[0].date, Duration::days(1));
    }
    assert_eq!(days.iter().map(|d| d.count).sum::<u64>(), 4);

    let ana = s.list_chats("ana").unwrap();
    let when = s.get_messages(&ana[0].id, None).unwrap()[0].created_at.date_naive();
    assert!(days.iter().any(|d| d.date == when && d.count > 0));

    assert!(messages_by_day(&s, 0, now).unwrap().is_empty());
}

#[test]
fn old_messages_fall_out_of_the_day_window() {
    let s = seeded();
    let days = messages_by_day(&s, 3, Utc::now() + Duration::days(10)).unwrap();
    assert_eq!(days.len(), 3);
    assert!(days.iter().all(|d| d.count == 0));
}

#[test]
fn active_users_respects_the_window() {
    let s = seeded();
    let now = Utc::now() + Duration::days(3);
    assert_eq!(active_users(&s, 7, now).unwrap().len(), 2);
    assert!(active_users(&s, 2, now).unwrap().is_empty());

    let empty = SqliteChatStore::open_in_memory().unwrap();
    assert!(active_users(&empty, 7, Utc::now()).unwrap().is_empty());
}
