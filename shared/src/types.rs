//! Core shared types and identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{SharedError, SharedResult};
use crate::messages::config::PacingConfig;

/// Identifier of one processing context (typically one linked account)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContextId(String);

impl ContextId {
    /// Parse a context id; only `[A-Za-z0-9_-]` are accepted since the id
    /// doubles as a directory name for persisted state
    pub fn parse(raw: &str) -> SharedResult<Self> {
        let valid = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(SharedError::InvalidContextId {
                input: raw.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContextId {
    type Error = SharedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContextId> for String {
    fn from(value: ContextId) -> Self {
        value.0
    }
}

/// One pending "add identifier to group" unit of work
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub target_group: String,
    pub target_identifier: String,
    #[serde(default)]
    pub attempt_count: u32,
}

impl WorkItem {
    pub fn new(target_group: impl Into<String>, target_identifier: impl Into<String>) -> Self {
        Self {
            target_group: target_group.into(),
            target_identifier: target_identifier.into(),
            attempt_count: 0,
        }
    }

    /// True when both items address the same (group, identifier) pair
    pub fn same_target(&self, other: &WorkItem) -> bool {
        self.target_group == other.target_group && self.target_identifier == other.target_identifier
    }
}

/// Aggregate outcome counters for a context
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub succeeded: u64,
    pub already_present: u64,
    pub failed: u64,
}

/// Terminal status of one item, as reported to the push layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Success,
    AlreadyPresent,
    Error,
}

/// Observable phase of a context's drain loop
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    #[default]
    Idle,
    Draining,
    Executing,
    Waiting,
    Cooldown,
    Paused,
}

impl fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerPhase::Idle => "idle",
            SchedulerPhase::Draining => "draining",
            SchedulerPhase::Executing => "executing",
            SchedulerPhase::Waiting => "waiting",
            SchedulerPhase::Cooldown => "cooldown",
            SchedulerPhase::Paused => "paused",
        };
        write!(f, "{name}")
    }
}

/// Point-in-time status of one context, returned by the operational API
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub context: ContextId,
    pub phase: SchedulerPhase,
    pub backlog_size: usize,
    pub in_flight: usize,
    pub is_processing: bool,
    pub is_paused: bool,
    pub connected: bool,
    pub totals: Totals,
    pub pacing: PacingConfig,
    pub consecutive_failures: u32,
    pub backoff_level: u32,
    pub successes_today: u32,
}
