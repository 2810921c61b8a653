// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Time sources for the agent.
//!
//! Two kinds of time matter here: monotonic readings for elapsed-time
//! budgets (registration retry, drain windows) and wall-clock readings for
//! absolute deadlines, chiefly the signing-key transition expiry. Both come
//! through one trait so the key-rotation tests can move time instead of
//! sleeping through a transition window.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub trait Clock: Clone + Send + Sync {
    /// Monotonic reading; safe for measuring elapsed time.
    fn now(&self) -> Instant;

    /// Wall-clock reading; compared against absolute deadlines such as
    /// `transition_expires`. Subject to host clock skew.
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Controllable clock for tests. Both timelines stand still until moved,
/// and the wall clock can be pinned independently so a test can place
/// itself before or after a key-transition deadline.
#[derive(Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<FakeNow>>,
}

struct FakeNow {
    instant: Instant,
    wall: DateTime<Utc>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeNow { instant: Instant::now(), wall: Utc::now() })),
        }
    }

    /// Move both timelines forward by `step`.
    pub fn advance(&self, step: Duration) {
        let mut now = self.inner.lock();
        now.instant += step;
        now.wall += ChronoDuration::from_std(step).unwrap_or(ChronoDuration::zero());
    }

    /// Pin the wall clock to an absolute time. The monotonic reading is
    /// left alone; deadline checks never mix the two.
    pub fn set_utc(&self, at: DateTime<Utc>) {
        self.inner.lock().wall = at;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.inner.lock().instant
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.inner.lock().wall
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
