//! Scheduler-internal types

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use shared::{ItemStatus, PacingConfig, Totals, WorkItem};

/// Result code returned by the membership capability for one add call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddResultCode {
    Success,
    AlreadyMember,
    Forbidden,
    NotFound,
    RateLimited,
    ServerError,
    Timeout,
}

/// Terminal classification of one attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    AlreadyPresent,
    PermanentFailure(String),
    TransientFailure(String),
}

impl Outcome {
    /// Success and AlreadyPresent both count as a healthy response
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::AlreadyPresent)
    }

    pub fn status(&self) -> ItemStatus {
        match self {
            Outcome::Success => ItemStatus::Success,
            Outcome::AlreadyPresent => ItemStatus::AlreadyPresent,
            Outcome::PermanentFailure(_) | Outcome::TransientFailure(_) => ItemStatus::Error,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::PermanentFailure(reason) | Outcome::TransientFailure(reason) => Some(reason.as_str()),
            _ => None,
        }
    }

    /// Fold a terminal outcome into aggregate counters
    pub fn tally(&self, totals: &mut Totals) {
        match self {
            Outcome::Success => totals.succeeded += 1,
            Outcome::AlreadyPresent => totals.already_present += 1,
            Outcome::PermanentFailure(_) | Outcome::TransientFailure(_) => totals.failed += 1,
        }
    }
}

/// What happened to an item handed to the executor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Execution {
    Done(Outcome),
    /// Cancelled before a terminal outcome; the item goes back to the backlog
    Interrupted,
}

/// Per-call result of `enqueue`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueReport {
    pub accepted: usize,
    pub rejected_duplicates: Vec<String>,
    pub rejected_invalid: Vec<String>,
}

/// Group of items executed back to back, followed by a pause
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubBurst {
    pub items: Vec<WorkItem>,
    pub pause_after: Duration,
}

/// Adaptive part of the pacing policy
///
/// The current delay bounds are derived from the configured base ranges and
/// `backoff_level`, so only the counters are stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingState {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub backoff_level: u32,
    /// Levels engaged by the current failure streak
    pub streak_escalations: u32,
    pub successes_today: u32,
    /// UTC day `successes_today` refers to
    pub day: Option<NaiveDate>,
}

/// Contents of `state.json`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub pacing: PacingState,
    /// Pacing config as last tuned through the API, if it was
    pub pacing_config: Option<PacingConfig>,
    pub totals: Totals,
    pub paused: bool,
}
