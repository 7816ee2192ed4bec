//! Poller state machine.
//!
//! ```text
//! Idle ──tick──▶ Fetching ──ok──▶ Idle
//!                   │
//!                   └──err──▶ Backoff ──tick──▶ Fetching
//!                                │
//!                                └──total failures ≥ max_retries──▶ Stopped
//! ```
//!
//! Reaching `max_consecutive_errors` does not stop the poller; it discards
//! the watermark so the next successful fetch re-baselines.
//!
//! Everything here is synchronous and clock-free so transitions can be
//! tested without timers.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{EmitMode, PollerConfig};
use crate::fetch::Validators;
use crate::reading::CanonicalReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Fetching,
    Backoff,
    Stopped,
}

/// What a failed fetch did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Try again on the next tick.
    Retry,
    /// Consecutive-error threshold hit; watermark discarded.
    BaselineReset,
    /// Total-failure ceiling hit; the poller is now `Stopped`.
    Exhausted,
}

#[derive(Debug, Clone, Default)]
pub struct PollerState {
    pub last_seen: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub total_failures: u32,
    pub phase: Phase,
    pub validators: Validators,
    pub body_fingerprint: Option<u64>,
}

impl PollerState {
    /// Clears counters for a fresh `start_monitoring`. The watermark survives.
    pub fn restart(&mut self) {
        self.consecutive_errors = 0;
        self.total_failures = 0;
        self.phase = Phase::Idle;
    }

    pub fn begin_cycle(&mut self) {
        if self.phase != Phase::Stopped {
            self.phase = Phase::Fetching;
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
        if self.phase != Phase::Stopped {
            self.phase = Phase::Idle;
        }
    }

    /// Forgets everything used to recognise already-seen data.
    pub fn reset_baseline(&mut self) {
        self.last_seen = None;
        self.validators = Validators::default();
        self.body_fingerprint = None;
    }

    pub fn record_failure(&mut self, config: &PollerConfig) -> FailureOutcome {
        self.consecutive_errors += 1;
        self.total_failures += 1;

        let mut outcome = FailureOutcome::Retry;

        if config.max_consecutive_errors > 0 && self.consecutive_errors >= config.max_consecutive_errors {
            self.reset_baseline();
            self.consecutive_errors = 0;
            outcome = FailureOutcome::BaselineReset;
        }

        if self.phase == Phase::Stopped {
            return outcome;
        }

        if config.max_retries > 0 && self.total_failures >= config.max_retries {
            self.phase = Phase::Stopped;
            return FailureOutcome::Exhausted;
        }

        self.phase = Phase::Backoff;
        outcome
    }

    /// Keeps readings strictly newer than the watermark and advances it.
    ///
    /// Readings sharing a timestamp are duplicates; the first one in fetch
    /// order is kept. The result is sorted oldest first. Returns `None` when
    /// nothing is new.
    pub fn select_new(
        &mut self,
        readings: Vec<CanonicalReading>,
        mode: EmitMode,
    ) -> Option<Vec<CanonicalReading>> {
        let mut seen = HashSet::new();
        let mut fresh: Vec<CanonicalReading> = readings
            .into_iter()
            .filter(|r| self.last_seen.is_none_or(|last| r.timestamp > last))
            .filter(|r| seen.insert(r.timestamp))
            .collect();

        if fresh.is_empty() {
            return None;
        }

        fresh.sort_by_key(|r| r.timestamp);
        if mode == EmitMode::LatestOnly {
            fresh = fresh.split_off(fresh.len() - 1);
        }

        self.last_seen = fresh.last().map(|r| r.timestamp);
        Some(fresh)
    }
}
