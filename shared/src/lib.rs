//! Shared types for the batch membership scheduler
//!
//! Contains the types an outer layer (HTTP, CLI, push channel) needs to talk to
//! the scheduler core: identifiers, work items, status snapshots, events and
//! configuration, plus the logging bootstrap used by every binary.

pub mod errors;
pub mod logging;
pub mod messages;
pub mod types;

pub use errors::*;
pub use types::*;

pub use messages::{
    // Events
    EventEnvelope, SchedulerEvent,

    // Configuration
    delay_from_secs, BurstPlan, BurstTable, DelayRange, IdentifierRules, PacingConfig,
    PacingConfigPatch, RetryConfig, SchedulerConfig, MAX_DELAY_SECS,
};
