//! Idle-stream watchdog shared by snapshot and device blob reassembly.
//!
//! A stream is stalled once no record has arrived for `idle`. A stalled
//! stream is re-requested at most once per `gap` and at most `max_retries`
//! times per session.

use embassy_time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct StallPolicy {
    pub idle: Duration,
    pub gap: Duration,
    pub max_retries: u8,
}

impl StallPolicy {
    pub fn from_millis(idle_ms: u32, gap_ms: u32, max_retries: u8) -> Self {
        Self {
            idle: Duration::from_millis(u64::from(idle_ms)),
            gap: Duration::from_millis(u64::from(gap_ms)),
            max_retries,
        }
    }
}

#[derive(Debug)]
pub struct StallWatch {
    policy: StallPolicy,
    last_activity: Option<Instant>,
    last_retry: Option<Instant>,
    retries: u8,
}

impl StallWatch {
    pub fn new(policy: StallPolicy) -> Self {
        Self {
            policy,
            last_activity: None,
            last_retry: None,
            retries: 0,
        }
    }

    /// Start watching a fresh session.
    pub fn start(&mut self, now: Instant) {
        self.last_activity = Some(now);
        self.last_retry = None;
        self.retries = 0;
    }

    /// A record arrived.
    pub fn touch(&mut self, now: Instant) {
        if self.last_activity.is_some() {
            self.last_activity = Some(now);
        }
    }

    /// Stop watching.
    pub fn stop(&mut self) {
        self.last_activity = None;
        self.last_retry = None;
        self.retries = 0;
    }

    pub fn retries(&self) -> u8 {
        self.retries
    }

    /// Returns `true` if the stream is stalled and a re-request is due now.
    /// Counts the retry.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(last) = self.last_activity else {
            return false;
        };
        let idle = now.saturating_duration_since(last) > self.policy.idle;
        let gap_ok = self
            .last_retry
            .is_none_or(|t| now.saturating_duration_since(t) > self.policy.gap);
        if idle && gap_ok && self.retries < self.policy.max_retries {
            self.last_retry = Some(now);
            self.retries += 1;
            return true;
        }
        false
    }
}
