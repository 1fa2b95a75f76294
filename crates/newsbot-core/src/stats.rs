//! Usage statistics: command counts, daily activity, category popularity and
//! live subscription counts. Every event rewrites the snapshot on disk.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Write as _,
    path::PathBuf,
};

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{domain::UserId, persist, utils::local_today};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    #[serde(rename = "commands", default)]
    pub command_count: u64,
    #[serde(default)]
    pub unique_users: BTreeSet<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    #[serde(default)]
    pub total_users: u64,
    #[serde(rename = "commands_used", default)]
    pub command_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub daily_stats: BTreeMap<NaiveDate, DailyStats>,
    #[serde(rename = "category_requests", default)]
    pub category_request_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub subscription_counts: BTreeMap<String, u64>,
}

pub struct StatsAggregator {
    path: PathBuf,
    snapshot: Mutex<StatsSnapshot>,
}

impl StatsAggregator {
    /// Open the stats file and pre-seed zero counters for the tracked commands
    /// and categories. Counters for names outside these sets are never created.
    pub fn open(path: impl Into<PathBuf>, commands: &[&str], categories: &[String]) -> Self {
        let path = path.into();
        let mut snapshot: StatsSnapshot = persist::load_or_default(&path);

        for c in commands {
            snapshot.command_counts.entry(c.to_string()).or_insert(0);
        }
        for c in categories {
            snapshot
                .category_request_counts
                .entry(c.clone())
                .or_insert(0);
            snapshot.subscription_counts.entry(c.clone()).or_insert(0);
        }

        info!(
            path = %path.display(),
            total_users = snapshot.total_users,
            "stats loaded"
        );
        Self {
            path,
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot.lock().clone()
    }

    pub fn record_command(&self, name: &str, user_id: UserId) {
        self.record_command_on(name, user_id, local_today());
    }

    /// Count one command. Unrecognized names still count toward the day's
    /// activity but get no per-command counter.
    pub fn record_command_on(&self, name: &str, user_id: UserId, day: NaiveDate) {
        let mut s = self.snapshot.lock();
        if let Some(n) = s.command_counts.get_mut(name) {
            *n += 1;
        }
        let daily = s.daily_stats.entry(day).or_default();
        daily.command_count += 1;
        daily.unique_users.insert(user_id.0);
        self.flush(&s);
    }

    pub fn record_category_request(&self, category: &str) {
        let mut s = self.snapshot.lock();
        let Some(n) = s.category_request_counts.get_mut(category) else {
            return;
        };
        *n += 1;
        self.flush(&s);
    }

    /// Live subscriber count per category, floored at zero.
    pub fn record_subscription_change(&self, category: &str, subscribed: bool) {
        let mut s = self.snapshot.lock();
        let Some(n) = s.subscription_counts.get_mut(category) else {
            return;
        };
        *n = if subscribed {
            n.saturating_add(1)
        } else {
            n.saturating_sub(1)
        };
        self.flush(&s);
    }

    pub fn record_new_user(&self) {
        let mut s = self.snapshot.lock();
        s.total_users += 1;
        self.flush(&s);
    }

    /// Human-readable report. On ties the alphabetically first name wins.
    pub fn summarize(&self) -> String {
        let s = self.snapshot.lock();
        let total_commands: u64 = s.command_counts.values().sum();

        let mut out = String::from("📊 Bot Statistics Summary\n\n");
        let _ = writeln!(out, "👥 Total Users: {}", s.total_users);
        let _ = writeln!(out, "🔧 Total Commands Used: {total_commands}");
        match most_used(&s.command_counts) {
            Some((name, n)) => {
                let _ = writeln!(out, "📈 Most Used Command: /{name} ({n} times)");
            }
            None => out.push_str("📈 Most Used Command: n/a\n"),
        }
        match most_used(&s.category_request_counts) {
            Some((name, n)) => {
                let _ = writeln!(out, "📰 Most Requested Category: {name} ({n} requests)");
            }
            None => out.push_str("📰 Most Requested Category: n/a\n"),
        }
        if let Some((day, d)) = s.daily_stats.iter().next_back() {
            let _ = writeln!(
                out,
                "📅 Latest Day ({day}): {} commands from {} users",
                d.command_count,
                d.unique_users.len()
            );
        }

        out.push_str("\n📊 Command Usage:\n");
        for (cmd, n) in &s.command_counts {
            let _ = writeln!(out, "  /{cmd}: {n}");
        }

        out.push_str("\n📚 Category Requests:\n");
        for (cat, n) in &s.category_request_counts {
            let _ = writeln!(out, "  {cat}: {n}");
        }

        out.push_str("\n📝 Active Subscriptions:\n");
        for (cat, n) in &s.subscription_counts {
            let _ = writeln!(out, "  {cat}: {n}");
        }

        out
    }

    fn flush(&self, s: &StatsSnapshot) {
        if let Err(e) = persist::save_atomic(&self.path, s) {
            warn!("stats not persisted, keeping in-memory state: {e}");
        }
    }
}

fn most_used(counts: &BTreeMap<String, u64>) -> Option<(&str, u64)> {
    let mut best: Option<(&str, u64)> = None;
    for (name, &n) in counts {
        if best.map(|(_, b)| n > b).unwrap_or(true) {
            best = Some((name.as_str(), n));
        }
    }
    best
}
