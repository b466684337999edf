//! Adaptive pacing policy
//!
//! Pure configuration plus counters. The backoff level widens the delay bounds
//! geometrically on failure streaks and relaxes one level after a run of
//! successes. No I/O happens here apart from the cancellable sleep helper.

use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use shared::{delay_from_secs, DelayRange, PacingConfig, PacingConfigPatch, SharedResult};
use crate::types::{Outcome, PacingState};

/// Level transition caused by one recorded outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacingChange {
    Unchanged,
    Engaged { level: u32, consecutive_failures: u32 },
    Relaxed { level: u32 },
}

pub struct PacingPolicy {
    config: PacingConfig,
    state: PacingState,
}

impl PacingPolicy {
    pub fn new(config: PacingConfig) -> Self {
        Self::with_state(config, PacingState::default())
    }

    pub fn with_state(config: PacingConfig, mut state: PacingState) -> Self {
        state.backoff_level = state.backoff_level.min(config.max_backoff_level);
        Self { config, state }
    }

    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    pub fn state(&self) -> &PacingState {
        &self.state
    }

    pub fn item_multiplier(&self) -> f64 {
        self.config.item_backoff_factor.powi(self.state.backoff_level as i32)
    }

    pub fn batch_multiplier(&self) -> f64 {
        self.config.batch_backoff_factor.powi(self.state.backoff_level as i32)
    }

    /// Current inter-item bounds with backoff applied
    pub fn inter_item_bounds(&self) -> DelayRange {
        self.config.inter_item.scaled(self.item_multiplier())
    }

    /// Current inter-batch bounds with backoff applied
    pub fn inter_batch_bounds(&self) -> DelayRange {
        self.config.inter_batch.scaled(self.batch_multiplier())
    }

    pub fn next_inter_item_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        draw(self.inter_item_bounds(), rng)
    }

    pub fn next_inter_batch_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        draw(self.inter_batch_bounds(), rng)
    }

    pub fn record_outcome(&mut self, outcome: &Outcome) -> PacingChange {
        self.record_outcome_on(outcome, Utc::now().date_naive())
    }

    /// Update the streak counters for one attempt outcome observed on `today`
    pub fn record_outcome_on(&mut self, outcome: &Outcome, today: NaiveDate) -> PacingChange {
        match outcome {
            Outcome::Success | Outcome::AlreadyPresent => {
                if matches!(outcome, Outcome::Success) {
                    self.roll_day(today);
                    self.state.successes_today += 1;
                }
                self.state.consecutive_failures = 0;
                self.state.streak_escalations = 0;
                if self.state.backoff_level == 0 {
                    return PacingChange::Unchanged;
                }
                self.state.consecutive_successes += 1;
                if self.state.consecutive_successes < self.config.recovery_successes {
                    return PacingChange::Unchanged;
                }
                self.state.consecutive_successes = 0;
                self.state.backoff_level -= 1;
                PacingChange::Relaxed {
                    level: self.state.backoff_level,
                }
            }
            Outcome::PermanentFailure(_) if !self.config.count_permanent_failures => {
                PacingChange::Unchanged
            }
            Outcome::PermanentFailure(_) | Outcome::TransientFailure(_) => {
                self.state.consecutive_successes = 0;
                self.state.consecutive_failures += 1;
                self.escalate()
            }
        }
    }

    /// Raise the level once for every threshold multiple the streak has crossed
    ///
    /// Crossing rather than landing exactly on a multiple keeps a threshold
    /// lowered mid-streak effective right away.
    fn escalate(&mut self) -> PacingChange {
        let threshold = self.config.failure_threshold.max(1);
        let mut change = PacingChange::Unchanged;
        while self.state.backoff_level < self.config.max_backoff_level
            && self.state.consecutive_failures
                >= threshold.saturating_mul(self.state.streak_escalations + 1)
        {
            self.state.streak_escalations += 1;
            self.state.backoff_level += 1;
            change = PacingChange::Engaged {
                level: self.state.backoff_level,
                consecutive_failures: self.state.consecutive_failures,
            };
        }
        change
    }

    /// Hot-apply a partial config update
    ///
    /// The current failure streak is re-evaluated against the new threshold,
    /// so the returned change reports a level engaged by the patch itself.
    pub fn apply_patch(
        &mut self,
        patch: &PacingConfigPatch,
    ) -> SharedResult<(PacingConfig, PacingChange)> {
        self.config = self.config.patched(patch)?;
        self.state.backoff_level = self.state.backoff_level.min(self.config.max_backoff_level);
        let change = self.escalate();
        Ok((self.config.clone(), change))
    }

    /// When the daily ceiling is hit, the instant it resets
    pub fn cap_reset_at(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let cap = self.config.daily_success_cap?;
        self.roll_day(now.date_naive());
        if self.state.successes_today < cap {
            return None;
        }
        now.date_naive()
            .checked_add_days(Days::new(1))
            .and_then(|day| day.and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc())
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if self.state.day != Some(today) {
            self.state.day = Some(today);
            self.state.successes_today = 0;
        }
    }
}

fn draw<R: Rng + ?Sized>(range: DelayRange, rng: &mut R) -> Duration {
    if range.max_secs <= range.min_secs {
        return range.min();
    }
    delay_from_secs(rng.gen_range(range.min_secs..=range.max_secs))
}

/// Sleep for `duration` unless `cancel` fires first; true when the sleep completed
pub async fn cancellable_sleep(duration: Duration, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}
