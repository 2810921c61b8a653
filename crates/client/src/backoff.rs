// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! Exponential backoff shared by the registrar and the event stream.

use std::time::Duration;

use crate::error::{ClientError, ErrorClass};

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(60);
const JITTER: f64 = 0.25;

/// Doubling delay from 1s to a 60s cap, jittered ±25%. Server-supplied
/// waits bypass the progression entirely.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self { current: INITIAL_DELAY }
    }

    /// Next delay in the progression, jittered; advances the state.
    pub fn next_delay(&mut self) -> Duration {
        let delay = apply_jitter(self.current, JITTER);
        self.current = (self.current * 2).min(MAX_DELAY);
        delay
    }

    /// Delay appropriate for a failed operation: a `RespectServer` wait is
    /// used verbatim without advancing the progression; anything else
    /// follows the backoff.
    pub fn delay_for(&mut self, err: &ClientError) -> Duration {
        match err {
            ClientError::RespectServer { retry_after, .. }
                if err.class() == ErrorClass::RespectServer =>
            {
                *retry_after
            }
            _ => self.next_delay(),
        }
    }

    pub fn reset(&mut self) {
        self.current = INITIAL_DELAY;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Scale a delay by a random factor in `[1 - jitter, 1 + jitter]`.
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    use rand::Rng;
    let factor = 1.0 - jitter + rand::thread_rng().gen::<f64>() * 2.0 * jitter;
    Duration::from_millis((delay.as_millis() as f64 * factor).round() as u64)
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
