//! Per-user sliding-window admission control (minute + hour caps).
//!
//! Both caps are checked against one timestamp sequence per user. Rejected
//! requests are never recorded, so a throttled user is not locked out further
//! by retrying.

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::debug;

use crate::domain::UserId;

pub const MINUTE_WINDOW: Duration = Duration::from_secs(60);
pub const HOUR_WINDOW: Duration = Duration::from_secs(3600);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitKind {
    Minute,
    Hour,
}

impl LimitKind {
    pub fn message(self) -> &'static str {
        match self {
            LimitKind::Minute => {
                "You're sending requests too quickly. Please wait a moment and try again."
            }
            LimitKind::Hour => {
                "You've reached the hourly limit of news requests. Please try again later."
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub limited_by: Option<LimitKind>,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            limited_by: None,
        }
    }

    fn deny(kind: LimitKind) -> Self {
        Self {
            allowed: false,
            reason: Some(kind.message().to_string()),
            limited_by: Some(kind),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserRateStats {
    pub requests_last_minute: usize,
    pub requests_last_hour: usize,
    pub minute_limit: u32,
    pub hour_limit: u32,
}

#[derive(Debug)]
struct LimiterState {
    windows: HashMap<UserId, VecDeque<Instant>>,
    last_sweep: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    max_per_minute: u32,
    max_per_hour: u32,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(enabled: bool, max_per_minute: u32, max_per_hour: u32) -> Self {
        Self {
            enabled,
            max_per_minute,
            max_per_hour,
            state: Mutex::new(LimiterState {
                windows: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn admit(&self, user_id: UserId) -> Decision {
        self.admit_at(user_id, Instant::now())
    }

    /// Check and record one request at `now`. The whole check-then-record runs
    /// under the limiter lock, so concurrent callers for the same user cannot
    /// both take the last free slot.
    pub fn admit_at(&self, user_id: UserId, now: Instant) -> Decision {
        if !self.enabled {
            return Decision::allow();
        }

        let mut st = self.state.lock();

        if now.saturating_duration_since(st.last_sweep) > SWEEP_INTERVAL {
            st.sweep(now);
            st.last_sweep = now;
        }

        let window = st.windows.entry(user_id).or_default();
        prune(window, now);

        let decision = if window.len() >= self.max_per_hour as usize {
            Decision::deny(LimitKind::Hour)
        } else if count_within(window, now, MINUTE_WINDOW) >= self.max_per_minute as usize {
            Decision::deny(LimitKind::Minute)
        } else {
            window.push_back(now);
            Decision::allow()
        };

        if window.is_empty() {
            st.windows.remove(&user_id);
        }

        if let Some(kind) = decision.limited_by {
            debug!(user_id = user_id.0, ?kind, "request rate limited");
        }
        decision
    }

    pub fn stats(&self, user_id: UserId) -> UserRateStats {
        self.stats_at(user_id, Instant::now())
    }

    /// Read-only view of a user's counters. Does not prune or record anything.
    pub fn stats_at(&self, user_id: UserId, now: Instant) -> UserRateStats {
        let st = self.state.lock();
        let (minute, hour) = st
            .windows
            .get(&user_id)
            .map(|w| {
                (
                    count_within(w, now, MINUTE_WINDOW),
                    count_within(w, now, HOUR_WINDOW),
                )
            })
            .unwrap_or((0, 0));

        UserRateStats {
            requests_last_minute: minute,
            requests_last_hour: hour,
            minute_limit: self.max_per_minute,
            hour_limit: self.max_per_hour,
        }
    }

    /// Number of users with a non-empty window.
    pub fn tracked_users(&self) -> usize {
        self.state.lock().windows.len()
    }
}

impl LimiterState {
    fn sweep(&mut self, now: Instant) {
        let before = self.windows.len();
        self.windows.retain(|_, w| {
            prune(w, now);
            !w.is_empty()
        });
        let removed = before - self.windows.len();
        if removed > 0 {
            debug!(removed, remaining = self.windows.len(), "rate limit windows swept");
        }
    }
}

/// Drop timestamps that fell out of the trailing hour.
fn prune(window: &mut VecDeque<Instant>, now: Instant) {
    while window
        .front()
        .map(|t| now.saturating_duration_since(*t) >= HOUR_WINDOW)
        .unwrap_or(false)
    {
        window.pop_front();
    }
}

fn count_within(window: &VecDeque<Instant>, now: Instant, span: Duration) -> usize {
    window
        .iter()
        .rev()
        .take_while(|t| now.saturating_duration_since(**t) < span)
        .count()
}
