//! services/stats.rs
//! Per-user and dashboard statistics over the chat store and the audit trail.

use anyhow::{Result, bail};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::services::audit::{AuditFilter, AuditStore};
use crate::services::chats::ChatStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub user_id: String,
    pub chat_count: usize,
    pub total_messages: usize,
    pub risk_events_count: usize,
    pub last_active_at: Option<DateTime<Utc>>,
}

/// Per-user activity summary. A chat whose messages cannot be read is skipped;
/// an unreadable audit trail counts as zero risk events.
pub fn user_stats(chats: &dyn ChatStore, audit: &dyn AuditStore, user_id: &str) -> Result<UserStats> {
    if user_id.trim().is_empty() {
        bail!("user id is required");
    }
    let list = chats.list_chats(user_id)?;

    let mut total_messages = 0;
    for chat in &list {
        match chats.get_messages(&chat.id, None) {
            Ok(m) => total_messages += m.len(),
            Err(e) => tracing::warn!(chat_id = %chat.id, "stats: skipping chat: {e:#}"),
        }
    }

    let filter = AuditFilter { user_id: Some(user_id.to_string()), ..Default::default() };
    let risk_events_count = match audit.query_turn_records(&filter) {
        Ok(r) => r.len(),
        Err(e) => {
            tracing::warn!(user_id, "stats: audit query failed: {e:#}");
            0
        }
    };

    Ok(UserStats {
        user_id: user_id.to_string(),
        chat_count: list.len(),
        total_messages,
        risk_events_count,
        last_active_at: list.iter().map(|c| c.updated_at).max(),
    })
}

/// Window used by [`global_stats`] to count active users.
pub const ACTIVE_WINDOW_DAYS: u32 = 7;

/// One user as seen through their chats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserActivity {
    pub user_id: String,
    pub chat_count: u64,
    pub message_count: u64,
    pub first_seen_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayCount {
    pub date: NaiveDate,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalStats {
    pub total_users: usize,
    pub total_chats: u64,
    pub total_messages: u64,
    pub total_risk_events: usize,
    pub active_users: usize,
}

/// Aggregate reads the dashboard needs; users are whoever owns at least one chat.
pub trait ActivityStore: Send + Sync {
    /// Most recently active first.
    fn user_activity(&self) -> Result<Vec<UserActivity>>;
    /// Messages created at or after `since`, grouped by UTC day, oldest day first.
    fn message_counts_by_day(&self, since: DateTime<Utc>) -> Result<Vec<DayCount>>;
}

fn window_start(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(days))
}

pub fn global_stats(
    activity: &dyn ActivityStore,
    audit: &dyn AuditStore,
    now: DateTime<Utc>,
) -> Result<GlobalStats> {
    let users = activity.user_activity()?;
    let cutoff = window_start(now, ACTIVE_WINDOW_DAYS);

    let total_risk_events = match audit.query_turn_records(&AuditFilter::default()) {
        Ok(r) => r.len(),
        Err(e) => {
            tracing::warn!("stats: audit query failed: {e:#}");
            0
        }
    };

    Ok(GlobalStats {
        total_users: users.len(),
        total_chats: users.iter().map(|u| u.chat_count).sum(),
        total_messages: users.iter().map(|u| u.message_count).sum(),
        total_risk_events,
        active_users: users.iter().filter(|u| u.last_active_at >= cutoff).count(),
    })
}

/// One entry per day for the last `days` days ending today (UTC), zero-filled.
pub fn messages_by_day(activity: &dyn ActivityStore, days: u32, now: DateTime<Utc>) -> Result<Vec<DayCount>> {
    if days == 0 {
        return Ok(Vec::new());
    }
    let today = now.date_naive();
    let first = today - Duration::days(i64::from(days) - 1);
    let since = first.and_hms_opt(0, 0, 0).map(|d| d.and_utc()).unwrap_or(now);

    let counted = activity.message_counts_by_day(since)?;
    Ok(first
        .iter_days()
        .take(days as usize)
        .map(|date| DayCount {
            date,
            count: counted.iter().find(|c| c.date == date).map_or(0, |c| c.count),
        })
        .collect())
}

/// Users whose latest chat activity falls within the last `days` days.
pub fn active_users(activity: &dyn ActivityStore, days: u32, now: DateTime<Utc>) -> Result<Vec<UserActivity>> {
    let cutoff = window_start(now, days);
    Ok(activity
        .user_activity()?
        .into_iter()
        .filter(|u| u.last_active_at >= cutoff)
        .collect())
}
