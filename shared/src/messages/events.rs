//! Scheduler → push layer events
//!
//! Every state transition the operator should see is one variant here. The
//! push layer receives them wrapped in an [`EventEnvelope`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ContextId, ItemStatus, Totals};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    BatchStart {
        batch_id: Uuid,
        group: String,
        count: usize,
        sub_bursts: usize,
        remaining: usize,
    },
    ItemResult {
        batch_id: Uuid,
        group: String,
        identifier: String,
        status: ItemStatus,
        reason: Option<String>,
        attempts: u32,
    },
    ItemRetry {
        batch_id: Uuid,
        identifier: String,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        reason: String,
    },
    /// Announced before each sub-burst with the identifiers it will attempt
    SubBurstStart {
        batch_id: Uuid,
        burst_index: usize,
        total_bursts: usize,
        identifiers: Vec<String>,
    },
    SubBurstWait {
        batch_id: Uuid,
        burst_index: usize,
        total_bursts: usize,
        remaining_secs: u64,
    },
    BatchDone {
        batch_id: Uuid,
        processed: usize,
        totals: Totals,
        remaining: usize,
        /// `None` when the backlog is empty and the loop finishes
        next_batch_in_ms: Option<u64>,
    },
    BackoffEngaged {
        level: u32,
        consecutive_failures: u32,
        inter_item_max_secs: f64,
        inter_batch_max_secs: f64,
    },
    BackoffRelaxed {
        level: u32,
    },
    DailyCapReached {
        cap: u32,
        resume_at: DateTime<Utc>,
    },
    ConnectivityChanged {
        connected: bool,
    },
    Paused {
        remaining: usize,
    },
    Resumed {
        remaining: usize,
    },
    Stopped {
        discarded: usize,
        totals: Totals,
    },
    QueueCompleted {
        totals: Totals,
    },
    SchedulerFault {
        reason: String,
        remaining: usize,
    },
}

impl SchedulerEvent {
    /// Wire name of the event, matching the serde tag
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerEvent::BatchStart { .. } => "batch_start",
            SchedulerEvent::ItemResult { .. } => "item_result",
            SchedulerEvent::ItemRetry { .. } => "item_retry",
            SchedulerEvent::SubBurstStart { .. } => "sub_burst_start",
            SchedulerEvent::SubBurstWait { .. } => "sub_burst_wait",
            SchedulerEvent::BatchDone { .. } => "batch_done",
            SchedulerEvent::BackoffEngaged { .. } => "backoff_engaged",
            SchedulerEvent::BackoffRelaxed { .. } => "backoff_relaxed",
            SchedulerEvent::DailyCapReached { .. } => "daily_cap_reached",
            SchedulerEvent::ConnectivityChanged { .. } => "connectivity_changed",
            SchedulerEvent::Paused { .. } => "paused",
            SchedulerEvent::Resumed { .. } => "resumed",
            SchedulerEvent::Stopped { .. } => "stopped",
            SchedulerEvent::QueueCompleted { .. } => "queue_completed",
            SchedulerEvent::SchedulerFault { .. } => "scheduler_fault",
        }
    }
}

/// Event tagged with its originating context
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub context: ContextId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SchedulerEvent,
}

impl EventEnvelope {
    pub fn new(context: ContextId, event: SchedulerEvent) -> Self {
        Self {
            context,
            timestamp: Utc::now(),
            event,
        }
    }
}
