//! Retry policy (spec §6.1, §9 "Retry control flow"): distinguishes a
//! transient SQL failure's backoff from a "not yet" poll's backoff, since
//! the two are governed by different configuration knobs.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub cmd_retry_naptime: Duration,
    pub poll_interval: Duration,
}

impl RetryPolicy {
    pub fn new(cmd_retry_naptime: Duration, poll_interval: Duration) -> Self {
        Self {
            cmd_retry_naptime,
            poll_interval,
        }
    }

    /// When a SQL statement or connection attempt failed transiently.
    pub fn after_sql_error(&self, now: Instant) -> Instant {
        now + self.cmd_retry_naptime
    }

    /// When a condition we are polling for ("is tablesync ready", "has dst
    /// caught up") was not yet true.
    pub fn after_not_yet(&self, now: Instant) -> Instant {
        now + self.poll_interval
    }
}
