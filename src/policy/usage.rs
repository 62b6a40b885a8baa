use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Serialize;

use super::{Denial, StreamDecision};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyUsageRecord {
    pub user_id: String,
    pub date_key: NaiveDate,
    pub bytes_transferred: u64,
}

/// Advisory raised when a user's usage crosses the warning fraction of the quota.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageWarning {
    pub used_bytes: u64,
    pub limit_bytes: u64,
    pub percent_used: f64,
}

/// In-process usage counters, partitioned by user and UTC day.
///
/// Both maps lock per key. Admission holds the user's stream slot while it
/// reads the usage counter; nothing takes them in the opposite order.
#[derive(Debug, Default)]
pub struct UsageTracker {
    daily: DashMap<(String, NaiveDate), u64>,
    active: DashMap<String, u32>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn usage(&self, user_id: &str, day: NaiveDate) -> u64 {
        self.daily
            .get(&(user_id.to_string(), day))
            .map(|v| *v)
            .unwrap_or(0)
    }

    pub fn record(&self, user_id: &str, day: NaiveDate) -> DailyUsageRecord {
        DailyUsageRecord {
            user_id: user_id.to_string(),
            date_key: day,
            bytes_transferred: self.usage(user_id, day),
        }
    }

    /// Add `bytes` to the day's counter and return `(before, after)`.
    pub fn add(&self, user_id: &str, day: NaiveDate, bytes: u64) -> (u64, u64) {
        let mut counter = self.daily.entry((user_id.to_string(), day)).or_insert(0);
        let before = *counter;
        *counter = before.saturating_add(bytes);
        (before, *counter)
    }

    /// Total bytes delivered to everyone on `day`.
    pub fn total_for_day(&self, day: NaiveDate) -> u64 {
        self.daily
            .iter()
            .filter(|entry| entry.key().1 == day)
            .map(|entry| *entry.value())
            .fold(0u64, u64::saturating_add)
    }

    pub fn active_streams(&self, user_id: &str) -> u32 {
        self.active.get(user_id).map(|v| *v).unwrap_or(0)
    }

    pub fn total_active_streams(&self) -> u64 {
        self.active.iter().map(|entry| u64::from(*entry.value())).sum()
    }

    /// Check and take a stream slot as one step. `check` sees the user's
    /// current usage and active count while the slot is locked.
    pub fn try_acquire<F>(&self, user_id: &str, day: NaiveDate, check: F) -> Result<u32, Denial>
    where
        F: FnOnce(u64, u32) -> StreamDecision,
    {
        let mut slot = self.active.entry(user_id.to_string()).or_insert(0);
        let usage = self.usage(user_id, day);
        match check(usage, *slot) {
            StreamDecision::Allowed => {
                *slot += 1;
                Ok(*slot)
            }
            StreamDecision::Denied(denial) => Err(denial),
        }
    }

    /// Give back a stream slot taken by [`try_acquire`](Self::try_acquire).
    pub fn release(&self, user_id: &str) {
        if let Some(mut slot) = self.active.get_mut(user_id) {
            *slot = slot.saturating_sub(1);
        }
        self.active.remove_if(user_id, |_, count| *count == 0);
    }

    /// Drop counters older than `day`. Old records are never read again.
    pub fn prune_before(&self, day: NaiveDate) -> usize {
        let before = self.daily.len();
        self.daily.retain(|(_, date), _| *date >= day);
        before - self.daily.len()
    }
}
