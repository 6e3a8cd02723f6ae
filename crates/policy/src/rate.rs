//! Fixed-window rate counters.
//!
//! Counters are keyed by `(scope, subject)` and reset when the window
//! rolls over. Check-and-increment is atomic across all scopes of one
//! evaluation: either every applicable counter has room and all are
//! bumped, or none are touched.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Scope of a rate counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateScope {
    Global,
    User,
    Resource,
}

impl RateScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateScope::Global => "global",
            RateScope::User => "user",
            RateScope::Resource => "resource",
        }
    }
}

struct WindowCount {
    window_start: DateTime<Utc>,
    count: u32,
}

/// One counter check: scope, subject id, and the window limit.
pub struct RateCheck {
    pub scope: RateScope,
    pub subject: String,
    pub limit: u32,
}

pub struct RateCounters {
    window: ChronoDuration,
    counters: Mutex<HashMap<(RateScope, String), WindowCount>>,
}

impl RateCounters {
    /// Counters with the standard one-hour window.
    pub fn hourly() -> Self {
        Self::with_window(ChronoDuration::hours(1))
    }

    pub fn with_window(window: ChronoDuration) -> Self {
        Self {
            window,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically verify every check has room and commit all increments.
    /// On failure returns the scope that exceeded its limit and commits
    /// nothing.
    pub fn check_and_increment(
        &self,
        now: DateTime<Utc>,
        checks: &[RateCheck],
    ) -> std::result::Result<(), RateScope> {
        let mut counters = self.counters.lock();

        // Phase 1: verify, resetting any rolled-over windows as we look.
        for check in checks {
            let key = (check.scope, check.subject.clone());
            if let Some(entry) = counters.get_mut(&key) {
                if now - entry.window_start >= self.window {
                    entry.window_start = now;
                    entry.count = 0;
                }
                if entry.count >= check.limit {
                    return Err(check.scope);
                }
            }
        }

        // Phase 2: commit.
        for check in checks {
            let key = (check.scope, check.subject.clone());
            let entry = counters.entry(key).or_insert(WindowCount {
                window_start: now,
                count: 0,
            });
            entry.count += 1;
        }
        Ok(())
    }

    /// Current count within the active window, for observability and tests.
    pub fn count(&self, scope: RateScope, subject: &str, now: DateTime<Utc>) -> u32 {
        let counters = self.counters.lock();
        match counters.get(&(scope, subject.to_owned())) {
            Some(entry) if now - entry.window_start < self.window => entry.count,
            _ => 0,
        }
    }
}
